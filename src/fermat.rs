//! CPU Fermat tester: walks a `GapCandidate`'s survivors in order, looking
//! for the pseudoprime that delimits the gap starting at `gap_start`.

use rug::Integer;

use crate::gap_candidate::GapCandidate;
use crate::pow::is_fermat_probable_prime;
use crate::sieve::RateCounters;

/// Width of the downward window `previous_fermat_prime` sieves per step
/// before recursing into a lower range.
const PREVIOUS_PRIME_WINDOW_BITS: u64 = 1 << 14;

/// Outcome of testing one Gap Candidate.
pub enum FermatOutcome {
    /// A gap of merit ≥ target was found; `end_offset` is the bit offset of
    /// the pseudoprime that closes it, `gap_start` is `P` (the leading
    /// endpoint — the previous prime below `candidate.gap_start + first_survivor`
    /// when the candidate itself isn't prime, or `candidate.gap_start` directly
    /// when it is).
    Found { p: Integer, q: Integer },
    /// No second prime was found among the survivors; the gap is at least
    /// `candidate`'s window size but undetermined — move to the next window.
    Inconclusive,
}

/// Test one Gap Candidate's survivors, returning as soon as a closing
/// pseudoprime is found: once the leading P is located, the very next
/// pseudoprime delimits the gap.
pub fn test_candidate(candidate: &GapCandidate, counters: &RateCounters) -> FermatOutcome {
    let mut found_p: Option<Integer> = None;

    for &bit in &candidate.survivors {
        let n = Integer::from(&candidate.gap_start + bit);
        counters.add_fermat_tests(1);
        if is_fermat_probable_prime(&n) {
            match found_p {
                None => found_p = Some(n),
                Some(p) => return FermatOutcome::Found { p, q: n },
            }
        }
    }

    let _ = found_p; // a lone leading prime without a closing one is still inconclusive
    FermatOutcome::Inconclusive
}

/// Recover `adder = P - (hash << shift)` once a PoW's leading prime `p` is
/// known, given the anchor hash already shifted into place.
pub fn recover_adder(p: &Integer, shifted_hash: &Integer) -> Integer {
    Integer::from(p - shifted_hash)
}

/// `mpz_previous_prime`-equivalent: sieve a window of
/// `PREVIOUS_PRIME_WINDOW_BITS` below `n` (odd candidates only) and
/// Fermat-test downward until a prime is found, recursing into a lower
/// window if none turns up.
pub fn previous_fermat_prime(n: &Integer) -> Integer {
    let mut window_end = Integer::from(n - 1u32);
    loop {
        let window_start_floor = Integer::from(&window_end - PREVIOUS_PRIME_WINDOW_BITS);
        let mut candidate = window_end.clone();
        if candidate.is_even() {
            candidate -= 1;
        }
        while candidate > window_start_floor {
            if is_fermat_probable_prime(&candidate) {
                return candidate;
            }
            candidate -= 2;
        }
        if window_start_floor <= 2 {
            return Integer::from(2u32);
        }
        window_end = window_start_floor;
    }
}
