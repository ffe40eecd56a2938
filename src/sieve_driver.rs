//! Segmented sieve driver: the two ways a worker turns a header's anchor
//! hash into a stream of [`GapCandidate`]s.
//!
//! **Classical** sieves fresh every window, odd-only addressing. **Chinese**
//! seeds each window from a [`CrtSet`]'s presieved bitmap (dense addressing)
//! and only sieves the primes above the set's `n_primes` on top.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rug::Integer;

use crate::crt_set::CrtSet;
use crate::gap_candidate::GapQueue;
use crate::sieve::BitSieve;

/// Shared stop signal: the epoch hash a sieve loop was started with, and a
/// flag the orchestrator flips when a new block invalidates that epoch.
#[derive(Default)]
pub struct StopSignal {
    stopped: AtomicBool,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }
}

/// Per-prime crossing-off cursor, reused segment to segment so the driver
/// never redoes a division per step, then the primes above
/// `cset.n_primes` are sieved on top before survivors are collected.
pub fn run_chinese(
    cset: &Arc<CrtSet>,
    extra_primes: &[u64],
    start: &Integer,
    n_windows: usize,
    nonce: u32,
    target: f64,
    stop: &StopSignal,
    queue: &GapQueue,
) {
    let size = cset.size;
    let mut window_start = start.clone();

    // Dense addressing: bit i <-> window_start + i. Track each extra prime's
    // next composite bit, refreshed incrementally by primorial mod p.
    let mut cursors: Vec<PrimeCursorDense> = extra_primes
        .iter()
        .map(|&p| {
            let start_mod_p = window_start.mod_u(p as u32) as u64;
            let next = (p - start_mod_p) % p;
            PrimeCursorDense {
                prime: p,
                next,
                step_mod_p: cset.primorial.mod_u(p as u32) as u64,
            }
        })
        .collect();

    for _ in 0..n_windows {
        if stop.should_stop() {
            return;
        }
        let mut bitmap = BitSieve::new_all_clear(size);
        bitmap.copy_from(&cset.bitmap);

        for cursor in cursors.iter_mut() {
            let p = cursor.prime as usize;
            let mut bit = cursor.next as usize;
            while bit < size {
                bitmap.set_composite(bit);
                bit += p;
            }
            cursor.next = (cursor.next + cursor.prime - (size as u64 % cursor.prime)) % cursor.prime;
        }

        let survivors: Vec<u32> = bitmap.iter_survivors().collect();
        queue.push(nonce, target, window_start.clone(), survivors);

        window_start += &cset.primorial;
        for cursor in cursors.iter_mut() {
            cursor.next = (cursor.next + cursor.prime - cursor.step_mod_p) % cursor.prime;
        }
    }
}

struct PrimeCursorDense {
    prime: u64,
    next: u64,
    step_mod_p: u64,
}

/// Per-prime crossing-off cursor for odd-only addressing: bit `i` represents
/// `window_start + 2*i`. Reused segment to segment so the driver never
/// redoes a division per step.
struct PrimeCursor {
    prime: u64,
    next: u64,
}

/// Seed one [`PrimeCursor`] per odd prime in `primes` (skipping 2, since no
/// odd-addressed bit is ever divisible by 2) for the segment starting at
/// `start`.
fn seed_classical_cursors(primes: &[u64], start: &Integer) -> Vec<PrimeCursor> {
    primes
        .iter()
        .filter(|&&p| p != 2)
        .map(|&p| {
            let start_mod_p = start.mod_u(p as u32) as u64;
            let inv2 = (p + 1) / 2; // 2's modular inverse mod an odd prime
            let next = (((p - start_mod_p) % p) as u128 * inv2 as u128 % p as u128) as u64;
            PrimeCursor { prime: p, next }
        })
        .collect()
}

/// Cross off every cursor's next composite bit within `[0, segment_size)`,
/// then advance each cursor past the segment.
fn sieve_classical_segment(bitmap: &mut BitSieve, cursors: &mut [PrimeCursor], segment_size: usize) {
    for cursor in cursors.iter_mut() {
        let p = cursor.prime as usize;
        let mut bit = cursor.next as usize;
        while bit < segment_size {
            bitmap.set_composite(bit);
            bit += p;
        }
        cursor.next = (cursor.next + cursor.prime - (segment_size as u64 % cursor.prime)) % cursor.prime;
    }
}

/// Classical sieve driver: a fresh odd-only bitmap per segment, no presieve.
/// Survivors are pushed as actual integer offsets from `window_start` (the
/// sieve's bit index doubled), matching the units the Chinese driver's dense
/// addressing already produces, so a single Fermat consumer can treat
/// `GapCandidate::survivors` uniformly regardless of which driver built it.
pub fn run_classical(
    primes: &[u64],
    start: &Integer,
    segment_size: usize,
    n_segments: usize,
    nonce: u32,
    target: f64,
    stop: &StopSignal,
    queue: &GapQueue,
) {
    let mut window_start = start.clone();
    let mut cursors = seed_classical_cursors(primes, &window_start);

    for _ in 0..n_segments {
        if stop.should_stop() {
            return;
        }
        let mut bitmap = BitSieve::new_all_clear(segment_size);
        sieve_classical_segment(&mut bitmap, &mut cursors, segment_size);

        let survivors: Vec<u32> = bitmap.iter_survivors().map(|b| b * 2).collect();
        queue.push(nonce, target, window_start.clone(), survivors);

        window_start += 2u64 * segment_size as u64;
    }
}

/// Round `anchor` up to the nearest integer on `cset`'s presieved residue
/// grid (`≡ cset.offset (mod cset.primorial)`).
pub fn snap_to_crt_grid(anchor: &Integer, cset: &CrtSet) -> Integer {
    let primorial = &cset.primorial;
    let anchor_mod = Integer::from(anchor % primorial);
    let mut delta = Integer::from(&cset.offset - &anchor_mod);
    delta %= primorial;
    if delta < 0 {
        delta += primorial;
    }
    Integer::from(anchor + delta)
}
