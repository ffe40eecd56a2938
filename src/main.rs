//! # Main — CLI Entry Point
//!
//! Parses CLI flags into an [`EngineConfig`], wires up an [`Engine`], and
//! routes to the Classical, Chinese, or Hybrid-GPU worker loop. Exit codes:
//! 0 normal shutdown, 1 usage error, 2 runtime fault.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gapminer::cli::Cli;
use gapminer::config::{EngineConfig, ModeConfig};
use gapminer::crt_set::CrtSet;
use gapminer::error::EngineError;
use gapminer::header::BlockHeader;
use gapminer::sieve::generate_primes;
use gapminer::worker::{Engine, WorkerConfig};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run() -> Result<(), EngineError> {
    let cli = Cli::parse();
    let config = cli.into_raw_flags().resolve()?;

    if let Some(ctr_file) = &config.ctr_file {
        return run_ctr_optimizer(&config, ctr_file);
    }

    // A real deployment gets its first header from the work-source
    // collaborator (JSON-RPC/Stratum); here we construct a placeholder so
    // the engine has something to mine on until `get_work()` responds.
    let genesis = BlockHeader {
        hash_prev_block: [0u8; 32],
        hash_merkle_root: [0u8; 32],
        version: 1,
        time: 0,
        difficulty: gapminer::header::encode_fp48(10, 0.0),
        nonce: 0,
        shift: config.shift,
        adder: Vec::new(),
    };

    let engine = Arc::new(Engine::new(genesis, config.threads, 64));

    match &config.mode {
        ModeConfig::Classical {
            sieve_size,
            sieve_primes,
        } => run_classical_pool(&engine, &config, *sieve_size, *sieve_primes),
        ModeConfig::Chinese {
            cset_path,
            fermat_threads,
        } => run_chinese_pool(&engine, &config, cset_path, *fermat_threads)?,
        ModeConfig::Gpu {
            sieve_size,
            sieve_primes,
            gpu_dev,
            platform,
            ..
        } => run_gpu_pool(&engine, &config, *sieve_size, *sieve_primes, *gpu_dev, *platform)?,
    }

    Ok(())
}

#[cfg(feature = "gpu")]
fn run_gpu_pool(
    engine: &Arc<Engine>,
    config: &EngineConfig,
    sieve_size: usize,
    sieve_primes: usize,
    gpu_dev: usize,
    platform: gapminer::config::Platform,
) -> Result<(), EngineError> {
    let platform_name = match platform {
        gapminer::config::Platform::Amd => "amd",
        gapminer::config::Platform::Nvidia => "nvidia",
    };
    let gpu = Arc::new(gapminer::fermat_gpu::GpuHandle::init(platform_name, gpu_dev)?);
    let primes = generate_primes(sieve_primes);

    let mut handles = Vec::new();
    {
        let engine = Arc::clone(engine);
        let header_template = engine.header_slot.snapshot();
        let gpu = Arc::clone(&gpu);
        handles.push(std::thread::spawn(move || {
            gapminer::worker::run_gpu_drain_worker(&engine, &header_template, &gpu);
        }));
    }
    for id in 0..config.threads {
        let engine = Arc::clone(engine);
        let worker_config = WorkerConfig {
            id,
            n_workers: config.threads,
            mode_classical_primes: primes.clone(),
            segment_size: sieve_size,
            n_segments_per_round: 1,
        };
        handles.push(std::thread::spawn(move || {
            gapminer::worker::run_gpu_sieve_worker(&engine, &worker_config);
        }));
    }
    for h in handles {
        let _ = h.join();
    }
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn run_gpu_pool(
    _engine: &Arc<Engine>,
    _config: &EngineConfig,
    _sieve_size: usize,
    _sieve_primes: usize,
    _gpu_dev: usize,
    _platform: gapminer::config::Platform,
) -> Result<(), EngineError> {
    Err(EngineError::GpuInit(
        "GPU (Hybrid) path requires building with --features gpu".into(),
    ))
}

/// `--ctr-file`: runs the offline greedy + evolutionary CRT optimizer and
/// writes the resulting `CrtSet` to disk instead of mining.
fn run_ctr_optimizer(config: &EngineConfig, ctr_file: &std::path::Path) -> Result<(), EngineError> {
    let strength_ceiling = config.ctr_strength.max(
        gapminer::config::DEFAULT_CTR_STRENGTH_FLOOR + 1,
    );
    let range = (gapminer::config::DEFAULT_CTR_STRENGTH_FLOOR, strength_ceiling);

    tracing::info!(
        n_primes = config.ctr_n_primes,
        size = config.ctr_size,
        ctr_strength_range = ?range,
        "running CRT optimizer"
    );

    let cset = gapminer::crt_optimizer::optimize(config.ctr_n_primes, config.ctr_size, range)
        .map_err(|e| EngineError::FileFormat(e.to_string()))?;
    cset.save(ctr_file)
        .map_err(|e| EngineError::FileFormat(e.to_string()))?;

    tracing::info!(
        n_candidates = cset.n_candidates,
        size = cset.size,
        path = %ctr_file.display(),
        "CRT Set written"
    );
    Ok(())
}

fn run_classical_pool(engine: &Arc<Engine>, config: &EngineConfig, sieve_size: usize, sieve_primes: usize) {
    let primes = generate_primes(sieve_primes);
    let handles: Vec<_> = (0..config.threads)
        .map(|id| {
            let engine = Arc::clone(engine);
            let worker_config = WorkerConfig {
                id,
                n_workers: config.threads,
                mode_classical_primes: primes.clone(),
                segment_size: sieve_size,
                n_segments_per_round: 1,
            };
            std::thread::spawn(move || {
                gapminer::worker::run_classical_worker(&engine, &worker_config);
            })
        })
        .collect();
    for h in handles {
        let _ = h.join();
    }
}

fn run_chinese_pool(
    engine: &Arc<Engine>,
    config: &EngineConfig,
    cset_path: &std::path::Path,
    fermat_threads: u32,
) -> Result<(), EngineError> {
    let cset = CrtSet::load(cset_path).map_err(|e| EngineError::FileFormat(e.to_string()))?;
    gapminer::config::validate_shift_for_cset(config.shift, cset.primorial.significant_bits())?;
    let cset = Arc::new(cset);

    let mut handles = Vec::new();
    for _ in 0..fermat_threads {
        let engine = Arc::clone(engine);
        let header_template = engine.header_slot.snapshot();
        let counters = Arc::clone(&engine.counters[0]);
        handles.push(std::thread::spawn(move || {
            gapminer::worker::run_fermat_drain_worker(&engine, &header_template, &counters);
        }));
    }

    let extra_primes = generate_primes(cset.n_primes + 10_000)
        .split_off(cset.n_primes);

    for id in fermat_threads..config.threads {
        let engine = Arc::clone(engine);
        let cset = Arc::clone(&cset);
        let extra_primes = extra_primes.clone();
        handles.push(std::thread::spawn(move || {
            let header = engine.header_slot.snapshot();
            let anchor = header.anchor_hash();
            let start = {
                let anchor_int =
                    rug::Integer::from_digits(&anchor, rug::integer::Order::Msf) << header.shift;
                gapminer::sieve_driver::snap_to_crt_grid(&anchor_int, &cset)
            };
            let stop = engine.header_slot.stop_signal();
            gapminer::sieve_driver::run_chinese(
                &cset,
                &extra_primes,
                &start,
                1_000_000,
                id,
                gapminer::header::decode_fp48(header.difficulty),
                &stop,
                &engine.queue,
            );
        }));
    }

    for h in handles {
        let _ = h.join();
    }
    Ok(())
}
