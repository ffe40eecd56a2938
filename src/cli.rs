//! CLI surface: the core-relevant flags only. JSON-RPC/Stratum
//! transport flags belong to the external work-source collaborator and are
//! not modeled here.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{Platform as ConfigPlatform, RawFlags};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliPlatform {
    Amd,
    Nvidia,
}

impl From<CliPlatform> for ConfigPlatform {
    fn from(p: CliPlatform) -> Self {
        match p {
            CliPlatform::Amd => ConfigPlatform::Amd,
            CliPlatform::Nvidia => ConfigPlatform::Nvidia,
        }
    }
}

/// Prime-gap proof-of-work miner.
#[derive(Debug, Parser)]
#[command(name = "gapminer", version, about)]
pub struct Cli {
    /// Sieve window size in bits. Defaults: 33554432 Classical, 12000000 GPU,
    /// implied by the loaded CRT Set in Chinese mode.
    #[arg(long, env = "GAPMINER_SIEVE_SIZE")]
    pub sieve_size: Option<usize>,

    /// Size of the small-prime table used for sieving. Defaults: 900000 CPU,
    /// 3000000 GPU.
    #[arg(long, env = "GAPMINER_SIEVE_PRIMES")]
    pub sieve_primes: Option<usize>,

    /// Worker thread count.
    #[arg(long, default_value_t = 1, env = "GAPMINER_THREADS")]
    pub threads: u32,

    /// Header shift (bits reserved for the mined-in adder).
    #[arg(long, env = "GAPMINER_SHIFT")]
    pub shift: Option<u16>,

    /// Chinese-mode Fermat-drain thread count.
    #[arg(long, env = "GAPMINER_FERMAT_THREADS")]
    pub fermat_threads: Option<u32>,

    /// Enable Chinese mode by loading a CRT Set from this path.
    #[arg(long)]
    pub cset: Option<PathBuf>,

    /// CRT optimizer output path.
    #[arg(long)]
    pub ctr_file: Option<PathBuf>,

    /// CRT optimizer greedy budget (upper end of the per-individual
    /// `max_gready` range the evolutionary refiner draws from).
    #[arg(long)]
    pub ctr_strength: Option<u64>,

    /// Number of smallest primes the CRT optimizer folds into its presieve.
    #[arg(long)]
    pub ctr_n_primes: Option<usize>,

    /// Presieve window size (bits) the CRT optimizer targets.
    #[arg(long)]
    pub ctr_size: Option<usize>,

    /// Enable the GPU (Hybrid) sieve path. Requires the `gpu` feature.
    #[arg(long)]
    pub use_gpu: bool,

    /// OpenCL device index.
    #[arg(long, default_value_t = 0)]
    pub gpu_dev: usize,

    /// OpenCL platform vendor.
    #[arg(long, value_enum)]
    pub platform: Option<CliPlatform>,

    /// GPU work-item arena capacity.
    #[arg(long, default_value_t = 4096)]
    pub work_items: usize,

    /// Fermat tests dispatched per GPU work item per batch.
    #[arg(long, default_value_t = 4)]
    pub n_tests: usize,

    /// GPU batch queue depth.
    #[arg(long, default_value_t = 2)]
    pub queue_size: usize,
}

impl Cli {
    pub fn into_raw_flags(self) -> RawFlags {
        RawFlags {
            sieve_size: self.sieve_size,
            sieve_primes: self.sieve_primes,
            threads: Some(self.threads),
            shift: self.shift,
            fermat_threads: self.fermat_threads,
            cset: self.cset,
            ctr_file: self.ctr_file,
            ctr_strength: self.ctr_strength,
            ctr_n_primes: self.ctr_n_primes,
            ctr_size: self.ctr_size,
            use_gpu: self.use_gpu,
            gpu_dev: self.gpu_dev,
            platform: self.platform.map(Into::into),
            work_items: self.work_items,
            n_tests: self.n_tests,
            queue_size: self.queue_size,
        }
    }
}

/// Parse `argv`-style arguments (used by integration tests so they don't
/// have to shell out) and resolve them into a validated `EngineConfig`.
pub fn parse_and_resolve(args: &[String]) -> Result<crate::config::EngineConfig> {
    let cli = Cli::try_parse_from(args).map_err(|e| EngineError::Config(e.to_string()))?;
    cli.into_raw_flags().resolve()
}
