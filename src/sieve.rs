//! Prime table and packed bit-sieve primitives.
//!
//! This is the foundation every other stage builds on: a table of the first
//! *N* primes (built once, read-only afterward) and a packed bit array with
//! O(1) composite-marking and hardware-popcount range counts.
//!
//! ## Addressing schemes
//!
//! A `BitSieve` is just a flat array of bits; it does not know what integer
//! each bit represents. Two addressing schemes are used by callers, and each
//! subsystem commits to exactly one:
//!
//! - **odd-only**: bit *i* represents `start + 2*i + 1`. Used by the
//!   Classical sieve driver, since it has no presieve to account for the
//!   factor of two.
//! - **dense**: bit *i* represents `start + i`. Used by the Chinese sieve
//!   driver, because the CRT presieve bitmap it starts from already encodes
//!   divisibility by 2 directly in its bit positions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default size of the small-prime table for CPU sieving (see CLI `--sieve-primes`).
pub const DEFAULT_SIEVE_PRIMES_CPU: usize = 900_000;
/// Default size of the small-prime table for GPU sieving.
pub const DEFAULT_SIEVE_PRIMES_GPU: usize = 3_000_000;

const RESIDUES: [u64; 8] = [1, 7, 11, 13, 17, 19, 23, 29];

/// Sieve the first `limit` primes (2 included), via a wheel-30 segmented sieve.
///
/// Sieves 30-residue classes in byte segments rather than marking every odd
/// number, which keeps memory proportional to the candidate range instead of
/// `limit`'s magnitude.
pub fn generate_primes(limit: usize) -> Vec<u64> {
    if limit == 0 {
        return Vec::new();
    }
    let mut primes = Vec::with_capacity(limit);
    primes.push(2u64);
    if limit == 1 {
        return primes;
    }
    primes.push(3u64);
    if primes.len() >= limit {
        primes.truncate(limit);
        return primes;
    }
    primes.push(5u64);
    if primes.len() >= limit {
        primes.truncate(limit);
        return primes;
    }

    // Upper bound on the numeric range needed to find `limit` primes.
    // limit*ln(limit) + limit*ln(ln(limit)) is a standard over-estimate for n>=6.
    let bound = if limit < 6 {
        30u64
    } else {
        let l = limit as f64;
        ((l * (l.ln() + l.ln().ln())) as u64) + 30
    };

    let is_composite = sieve_wheel30(bound);
    'outer: for (seg, byte) in is_composite.iter().enumerate() {
        for (bit, &r) in RESIDUES.iter().enumerate() {
            if byte & (1 << bit) != 0 {
                continue;
            }
            let candidate = 30 * seg as u64 + r;
            if candidate < 2 || candidate > bound {
                continue;
            }
            primes.push(candidate);
            if primes.len() >= limit {
                break 'outer;
            }
        }
    }
    primes.truncate(limit);
    primes
}

/// Wheel-30 composite sieve up to `bound`, one byte per 30-integer segment,
/// one bit per residue class in `RESIDUES`.
fn sieve_wheel30(bound: u64) -> Vec<u8> {
    let n_segments = (bound / 30 + 1) as usize;
    let mut sieve = vec![0u8; n_segments];

    let sqrt_bound = (bound as f64).sqrt() as u64 + 1;
    for seg in 0..n_segments {
        for (bit, &r) in RESIDUES.iter().enumerate() {
            if sieve[seg] & (1 << bit) != 0 {
                continue;
            }
            let p = 30 * seg as u64 + r;
            if p < 7 || p > sqrt_bound {
                continue;
            }
            mark_multiples(&mut sieve, p, bound);
        }
    }
    sieve
}

fn mark_multiples(sieve: &mut [u8], p: u64, bound: u64) {
    let mut m = p * p;
    while m <= bound {
        let seg = (m / 30) as usize;
        let r = m % 30;
        if let Some(bit) = RESIDUES.iter().position(|&x| x == r) {
            sieve[seg] |= 1 << bit;
        }
        m += p;
    }
}

/// Computes `base^exp mod modulus` using u128 intermediates to avoid overflow
/// on 64-bit operands.
pub fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let mut result: u128 = 1;
    let m = modulus as u128;
    base %= modulus;
    let mut b = base as u128;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        exp >>= 1;
    }
    result as u64
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// A packed bit array used as the sieve's working buffer.
///
/// Bit meaning is owned by the caller (see module docs): clear = "still a
/// prime candidate", set = "known composite". Word size is the platform
/// native `u64`.
pub struct BitSieve {
    words: Vec<u64>,
    len: usize,
}

impl BitSieve {
    /// All bits clear (everything starts as a prime candidate).
    pub fn new_all_clear(len: usize) -> Self {
        let n_words = len.div_ceil(64);
        BitSieve {
            words: vec![0u64; n_words],
            len,
        }
    }

    /// All bits set (everything starts marked composite).
    pub fn new_all_set(len: usize) -> Self {
        let n_words = len.div_ceil(64);
        let mut words = vec![u64::MAX; n_words];
        if let Some(last) = words.last_mut() {
            let rem = len % 64;
            if rem != 0 {
                *last = (1u64 << rem) - 1;
            }
        }
        BitSieve { words, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn set_composite(&mut self, bit: usize) {
        debug_assert!(bit < self.len);
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    /// True if `bit` has not been marked composite.
    #[inline]
    pub fn is_prime(&self, bit: usize) -> bool {
        debug_assert!(bit < self.len);
        self.words[bit / 64] & (1u64 << (bit % 64)) == 0
    }

    /// Zero the whole buffer back to "all prime".
    pub fn clear(&mut self) {
        for w in &mut self.words {
            *w = 0;
        }
    }

    /// OR another sieve's composite bits into this one. Used to merge a
    /// presieved layer on top of this buffer, or to fold committed
    /// CRT-optimizer layers together.
    pub fn or_in(&mut self, other: &BitSieve) {
        debug_assert_eq!(self.words.len(), other.words.len());
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    /// Copy `other`'s bits into `self` verbatim (used to seed a Chinese-mode
    /// sieve buffer from the CRT Set's presieved bitmap).
    pub fn copy_from(&mut self, other: &BitSieve) {
        debug_assert_eq!(self.words.len(), other.words.len());
        self.words.copy_from_slice(&other.words);
    }

    /// Number of still-prime bits, via hardware popcount per word.
    pub fn popcount_range(&self) -> usize {
        let total_set: u32 = self.words.iter().map(|w| w.count_ones()).sum();
        self.len - total_set as usize
    }

    /// Iterate bit indices still marked prime, in ascending order.
    pub fn iter_survivors(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(move |(wi, &w)| {
            let inverted = !w;
            SurvivorIter {
                word: inverted,
                base: (wi * 64) as u32,
            }
            .take_while(move |&i| (i as usize) < self.len)
        })
    }
}

struct SurvivorIter {
    word: u64,
    base: u32,
}

impl Iterator for SurvivorIter {
    type Item = u32;
    fn next(&mut self) -> Option<u32> {
        if self.word == 0 {
            return None;
        }
        let bit = self.word.trailing_zeros();
        self.word &= self.word - 1; // clear lowest set bit
        Some(self.base + bit)
    }
}

/// Atomic counters shared between a worker and the rate-metering reporter.
#[derive(Default)]
pub struct RateCounters {
    pub candidates_sieved: AtomicU64,
    pub fermat_tests: AtomicU64,
    pub shares_found: AtomicU64,
}

impl RateCounters {
    pub fn add_sieved(&self, n: u64) {
        self.candidates_sieved.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_fermat_tests(&self, n: u64) {
        self.fermat_tests.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_share(&self) {
        self.shares_found.fetch_add(1, Ordering::Relaxed);
    }
}
