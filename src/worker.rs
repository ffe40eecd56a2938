//! Worker orchestration: a fixed thread pool of sievers (and, in Chinese
//! mode, Fermat-drain threads), header updates, and per-worker rate
//! metering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rug::Integer;

use crate::fermat::{self, FermatOutcome};
use crate::gap_candidate::GapQueue;
use crate::header::BlockHeader;
use crate::pow::Pow;
use crate::share::ShareProcessor;
use crate::sieve::{generate_primes, RateCounters};
use crate::sieve_driver::{self, StopSignal};

/// How often the orchestrator forces a header refresh even without a new
/// block notification.
pub const FORCED_REFRESH: Duration = Duration::from_secs(180);

/// Lower this worker thread's OS scheduling priority so mining never starves
/// interactive work on the host. Unix-only; the Windows equivalent
/// (`SCHED_IDLE`-like `THREAD_PRIORITY_IDLE`) is a platform gate left for a
/// `cfg(windows)` branch rather than modeled here.
#[cfg(unix)]
pub fn lower_thread_priority() {
    unsafe {
        libc::setpriority(libc::PRIO_PROCESS, 0, 19);
    }
}

#[cfg(not(unix))]
pub fn lower_thread_priority() {}

/// Shared, mutex-guarded current header plus the epoch's previous-block
/// hash every sieve loop polls via `should_stop`.
pub struct HeaderSlot {
    header: Mutex<BlockHeader>,
    stop: Arc<StopSignal>,
}

impl HeaderSlot {
    pub fn new(header: BlockHeader) -> Self {
        HeaderSlot {
            header: Mutex::new(header),
            stop: Arc::new(StopSignal::new()),
        }
    }

    pub fn snapshot(&self) -> BlockHeader {
        self.header.lock().unwrap().clone()
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    /// Replace the header and request every worker's current sieve to stop
    /// at its next window boundary.
    pub fn replace(&self, new_header: BlockHeader) {
        self.stop.request_stop();
        *self.header.lock().unwrap() = new_header;
    }

    pub fn reset_for_new_epoch(&self) {
        self.stop.reset();
    }
}

/// One worker's configuration, fixed for the process lifetime.
pub struct WorkerConfig {
    pub id: u32,
    pub n_workers: u32,
    pub mode_classical_primes: Vec<u64>,
    pub segment_size: usize,
    pub n_segments_per_round: usize,
}

/// Everything a running engine owns: the candidate heap, the share
/// processor, and per-worker rate counters, wired together at `main` rather
/// than reached via singletons.
pub struct Engine {
    pub header_slot: Arc<HeaderSlot>,
    pub queue: Arc<GapQueue>,
    pub share_processor: Arc<ShareProcessor>,
    pub counters: Vec<Arc<RateCounters>>,
    pub running: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(initial_header: BlockHeader, n_workers: u32, share_queue_capacity: usize) -> Self {
        let hash = initial_header.anchor_hash();
        Engine {
            header_slot: Arc::new(HeaderSlot::new(initial_header)),
            queue: Arc::new(GapQueue::new()),
            share_processor: Arc::new(ShareProcessor::new(share_queue_capacity, hash)),
            counters: (0..n_workers).map(|_| Arc::new(RateCounters::default())).collect(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Push a newly observed block header: bump the epoch stop signal,
    /// drain the Chinese-mode heap, and swap in the new header.
    pub fn update_header(&self, new_header: BlockHeader) {
        let new_hash = new_header.anchor_hash();
        self.header_slot.replace(new_header);
        self.queue.reset();
        self.share_processor.update_header(new_hash);
        self.header_slot.reset_for_new_epoch();
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.header_slot.stop_signal().request_stop();
    }
}

/// Advance `header.nonce` by `step` until `anchor_hash()` falls in
/// `[2^255, 2^256)`.
pub fn find_valid_hash(header: &mut BlockHeader, step: u32) -> [u8; 32] {
    loop {
        let hash = header.anchor_hash();
        if hash[0] & 0x80 != 0 {
            return hash;
        }
        header.nonce = header.nonce.wrapping_add(step);
    }
}

/// One sieving worker's main loop body for Classical mode: build a valid
/// PoW anchor, run one round of the segmented sieve, then advance the
/// nonce for the next round. Runs until `engine.running` is cleared.
pub fn run_classical_worker(engine: &Engine, config: &WorkerConfig) {
    let mut nonce = config.id;
    while engine.running.load(Ordering::SeqCst) {
        let mut header = engine.header_slot.snapshot();
        header.nonce = nonce;
        let hash = find_valid_hash(&mut header, config.n_workers);
        let anchor = Integer::from_digits(&hash, rug::integer::Order::Msf);
        let shifted = Integer::from(&anchor << header.shift);

        let stop = engine.header_slot.stop_signal();
        sieve_driver::run_classical(
            &config.mode_classical_primes,
            &shifted,
            config.segment_size,
            config.n_segments_per_round,
            header.nonce,
            crate::header::decode_fp48(header.difficulty),
            &stop,
            &engine.queue,
        );

        drain_and_test(engine, &header, &shifted);
        nonce = nonce.wrapping_add(config.n_workers);
    }
}

/// Hybrid-GPU mode's sieve producer: identical window production to
/// Classical, but survivors are left on the shared heap for a
/// [`run_gpu_drain_worker`] to batch-test instead of being drained inline.
pub fn run_gpu_sieve_worker(engine: &Engine, config: &WorkerConfig) {
    let mut nonce = config.id;
    while engine.running.load(Ordering::SeqCst) {
        let mut header = engine.header_slot.snapshot();
        header.nonce = nonce;
        let hash = find_valid_hash(&mut header, config.n_workers);
        let anchor = Integer::from_digits(&hash, rug::integer::Order::Msf);
        let shifted = Integer::from(&anchor << header.shift);

        let stop = engine.header_slot.stop_signal();
        sieve_driver::run_classical(
            &config.mode_classical_primes,
            &shifted,
            config.segment_size,
            config.n_segments_per_round,
            header.nonce,
            crate::header::decode_fp48(header.difficulty),
            &stop,
            &engine.queue,
        );

        nonce = nonce.wrapping_add(config.n_workers);
    }
}

/// Hybrid-GPU mode's drain worker: pops candidates from the shared heap and
/// tests them via [`crate::fermat_gpu::test_candidate_gpu`] instead of the
/// CPU Fermat path.
#[cfg(feature = "gpu")]
pub fn run_gpu_drain_worker(
    engine: &Engine,
    header_template: &BlockHeader,
    gpu: &crate::fermat_gpu::GpuHandle,
) {
    while engine.running.load(Ordering::SeqCst) {
        match engine.queue.pop_wait(Duration::from_millis(50)) {
            Some(candidate) => match crate::fermat_gpu::test_candidate_gpu(&candidate, gpu) {
                Ok(FermatOutcome::Found { p, q }) => {
                    submit_if_meets_target(engine, header_template, &p, &q, candidate.target);
                }
                Ok(FermatOutcome::Inconclusive) => {}
                Err(e) => {
                    tracing::error!(error = %e, "GPU dispatch failed");
                }
            },
            None => continue, // Transient: heap empty, producers still filling it.
        }
    }
}

/// A Fermat-drain worker (Chinese mode's `fermat_threads`): pops candidates
/// from the shared heap and tests them, submitting any that close a gap
/// meeting the target merit.
pub fn run_fermat_drain_worker(engine: &Engine, header_template: &BlockHeader, counters: &RateCounters) {
    while engine.running.load(Ordering::SeqCst) {
        match engine.queue.pop_wait(Duration::from_millis(50)) {
            Some(candidate) => {
                if let FermatOutcome::Found { p, q } = fermat::test_candidate(&candidate, counters) {
                    submit_if_meets_target(engine, header_template, &p, &q, candidate.target);
                }
            }
            None => continue, // Transient: heap empty, producers still filling it.
        }
    }
}

fn drain_and_test(engine: &Engine, header: &BlockHeader, shifted_hash: &Integer) {
    while let Some(candidate) = engine.queue.try_pop() {
        let counters = &engine.counters[0];
        if let FermatOutcome::Found { p, q } = fermat::test_candidate(&candidate, counters) {
            submit_if_meets_target(engine, header, &p, &q, candidate.target);
        }
        let _ = shifted_hash;
    }
}

fn submit_if_meets_target(
    engine: &Engine,
    header_template: &BlockHeader,
    p: &Integer,
    q: &Integer,
    target: f64,
) {
    let gap = Integer::from(q - p);
    let actual_merit = crate::pow::merit(&gap, p);
    if actual_merit < target {
        return;
    }
    let hash = header_template.anchor_hash();
    let shifted = Integer::from_digits(&hash, rug::integer::Order::Msf) << header_template.shift;
    let adder = fermat::recover_adder(p, &Integer::from(shifted));
    let pow = Pow {
        hash,
        shift: header_template.shift,
        adder,
        difficulty: header_template.difficulty,
        nonce: header_template.nonce,
    };
    if let Some(c) = engine.counters.first() {
        c.add_share();
    }
    engine.share_processor.process(&pow, header_template);
}
