//! Resolved, validated run configuration built from parsed CLI flags.
//!
//! Kept separate from `cli` so the CLI-parsing layer stays a thin shell
//! around `clap` while every cross-flag rule lives in one place:
//! [`RawFlags::resolve`].

use std::path::PathBuf;

use crate::error::{EngineError, Result};

pub const DEFAULT_SIEVE_SIZE_CLASSICAL: usize = 33_554_432;
pub const DEFAULT_SIEVE_SIZE_GPU: usize = 12_000_000;
pub const DEFAULT_SIEVE_PRIMES_CPU: usize = 900_000;
pub const DEFAULT_SIEVE_PRIMES_GPU: usize = 3_000_000;
pub const DEFAULT_THREADS: u32 = 1;
pub const DEFAULT_SHIFT_CPU: u16 = 25;
pub const DEFAULT_SHIFT_GPU: u16 = 64;
pub const DEFAULT_FERMAT_THREADS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Amd,
    Nvidia,
}

/// The three sieve dispatch modes a worker can run.
#[derive(Debug, Clone)]
pub enum ModeConfig {
    Classical {
        sieve_size: usize,
        sieve_primes: usize,
    },
    Chinese {
        cset_path: PathBuf,
        fermat_threads: u32,
    },
    Gpu {
        sieve_size: usize,
        sieve_primes: usize,
        gpu_dev: usize,
        platform: Platform,
        work_items: usize,
        n_tests: usize,
        queue_size: usize,
    },
}

/// Default number of smallest primes the CRT optimizer folds into a layer
/// when `--ctr-n-primes` is not given (modest enough to keep the greedy
/// phase's per-combination enumeration cheap).
pub const DEFAULT_CTR_N_PRIMES: usize = 30;
/// Default presieve window size the CRT optimizer targets.
pub const DEFAULT_CTR_SIZE: usize = 1_000_000;
/// Lower end of the greedy budget range the evolutionary refiner draws
/// each seed individual's `max_gready` from, when `--ctr-strength` sets
/// only the upper end.
pub const DEFAULT_CTR_STRENGTH_FLOOR: u64 = 100;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: ModeConfig,
    pub threads: u32,
    pub shift: u16,
    pub ctr_file: Option<PathBuf>,
    pub ctr_strength: u64,
    pub ctr_n_primes: usize,
    pub ctr_size: usize,
}

/// Raw, unvalidated flag values as parsed from the CLI. Building an
/// [`EngineConfig`] from this performs every cross-flag validation the
/// error taxonomy calls for.
#[derive(Debug, Clone, Default)]
pub struct RawFlags {
    pub sieve_size: Option<usize>,
    pub sieve_primes: Option<usize>,
    pub threads: Option<u32>,
    pub shift: Option<u16>,
    pub fermat_threads: Option<u32>,
    pub cset: Option<PathBuf>,
    pub ctr_file: Option<PathBuf>,
    pub ctr_strength: Option<u64>,
    pub ctr_n_primes: Option<usize>,
    pub ctr_size: Option<usize>,
    pub use_gpu: bool,
    pub gpu_dev: usize,
    pub platform: Option<Platform>,
    pub work_items: usize,
    pub n_tests: usize,
    pub queue_size: usize,
}

impl RawFlags {
    /// Validate flag combinations and fill in mode-appropriate defaults.
    /// Rejects `--use-gpu` combined with `--cset` as an unsupported mode
    /// combination.
    pub fn resolve(self) -> Result<EngineConfig> {
        if self.use_gpu && self.cset.is_some() {
            return Err(EngineError::Config(
                "--use-gpu and --cset cannot be combined".into(),
            ));
        }

        let threads = self.threads.unwrap_or(DEFAULT_THREADS);
        if threads == 0 {
            return Err(EngineError::Config("--threads must be >= 1".into()));
        }

        let mode = if self.use_gpu {
            ModeConfig::Gpu {
                sieve_size: self.sieve_size.unwrap_or(DEFAULT_SIEVE_SIZE_GPU),
                sieve_primes: self.sieve_primes.unwrap_or(DEFAULT_SIEVE_PRIMES_GPU),
                gpu_dev: self.gpu_dev,
                platform: self.platform.ok_or_else(|| {
                    EngineError::Config("--platform is required with --use-gpu".into())
                })?,
                work_items: self.work_items,
                n_tests: self.n_tests,
                queue_size: self.queue_size,
            }
        } else if let Some(cset_path) = self.cset {
            ModeConfig::Chinese {
                cset_path,
                fermat_threads: self.fermat_threads.unwrap_or(DEFAULT_FERMAT_THREADS),
            }
        } else {
            ModeConfig::Classical {
                sieve_size: self.sieve_size.unwrap_or(DEFAULT_SIEVE_SIZE_CLASSICAL),
                sieve_primes: self.sieve_primes.unwrap_or(DEFAULT_SIEVE_PRIMES_CPU),
            }
        };

        // Chinese mode's correct shift depends on the loaded CRT Set's bit
        // width, not a hardcoded constant; the caller validates that via
        // `validate_shift_for_cset` once the set is actually loaded.
        let shift = match (&mode, self.shift) {
            (_, Some(s)) => s,
            (ModeConfig::Gpu { .. }, None) => DEFAULT_SHIFT_GPU,
            (ModeConfig::Classical { .. }, None) => DEFAULT_SHIFT_CPU,
            (ModeConfig::Chinese { .. }, None) => DEFAULT_SHIFT_CPU,
        };

        Ok(EngineConfig {
            mode,
            threads,
            shift,
            ctr_file: self.ctr_file,
            ctr_strength: self.ctr_strength.unwrap_or(0),
            ctr_n_primes: self.ctr_n_primes.unwrap_or(DEFAULT_CTR_N_PRIMES),
            ctr_size: self.ctr_size.unwrap_or(DEFAULT_CTR_SIZE),
        })
    }
}

/// Validates `shift > primorial_bits` once a CRT Set is actually loaded:
/// `shift == bit_size` must fail; `shift == bit_size + 1` must succeed.
pub fn validate_shift_for_cset(shift: u16, primorial_bits: u32) -> Result<()> {
    if (shift as u32) <= primorial_bits {
        return Err(EngineError::Invariant(format!(
            "shift too low, expected at least {}",
            primorial_bits + 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_and_cset_together_is_rejected() {
        let flags = RawFlags {
            use_gpu: true,
            cset: Some(PathBuf::from("x.cset")),
            platform: Some(Platform::Amd),
            ..Default::default()
        };
        assert!(matches!(flags.resolve(), Err(EngineError::Config(_))));
    }

    #[test]
    fn classical_defaults_are_spec_values() {
        let cfg = RawFlags::default().resolve().unwrap();
        match cfg.mode {
            ModeConfig::Classical {
                sieve_size,
                sieve_primes,
            } => {
                assert_eq!(sieve_size, DEFAULT_SIEVE_SIZE_CLASSICAL);
                assert_eq!(sieve_primes, DEFAULT_SIEVE_PRIMES_CPU);
            }
            _ => panic!("expected Classical mode by default"),
        }
        assert_eq!(cfg.shift, DEFAULT_SHIFT_CPU);
    }

    #[test]
    fn zero_threads_is_rejected() {
        let flags = RawFlags {
            threads: Some(0),
            ..Default::default()
        };
        assert!(matches!(flags.resolve(), Err(EngineError::Config(_))));
    }

    #[test]
    fn shift_equal_to_bit_size_is_invariant_violation() {
        assert!(validate_shift_for_cset(64, 64).is_err());
    }

    #[test]
    fn shift_one_above_bit_size_succeeds() {
        assert!(validate_shift_for_cset(65, 64).is_ok());
    }

    #[test]
    fn gpu_mode_without_platform_is_rejected() {
        let flags = RawFlags {
            use_gpu: true,
            ..Default::default()
        };
        assert!(matches!(flags.resolve(), Err(EngineError::Config(_))));
    }
}
