//! Proof-of-work value and its verifier.
//!
//! `P = (hash << shift) + adder` is the candidate gap-start prime; a PoW is
//! valid when P is prime, the hash falls in the required width window, and
//! the gap up to the next prime meets the difficulty-encoded target merit.

use rug::integer::IsPrime;
use rug::Integer;

use crate::header::decode_fp48;

/// A completed (or candidate) proof of work.
#[derive(Debug, Clone)]
pub struct Pow {
    pub hash: [u8; 32],
    pub shift: u16,
    pub adder: Integer,
    pub difficulty: u64,
    pub nonce: u32,
}

impl Pow {
    /// `P = (hash << shift) + adder`.
    pub fn candidate(&self) -> Integer {
        let hash_int = Integer::from_digits(&self.hash, rug::integer::Order::Msf);
        (hash_int << self.shift) + &self.adder
    }
}

/// `merit(P, D) = D / ln(P)`.
pub fn merit(gap: &Integer, p: &Integer) -> f64 {
    gap.to_f64() / ln_integer(p)
}

/// Solve for the integer gap `L` such that `L / ln(P) = difficulty`
/// (difficulty already decoded from FP48 into a float).
pub fn gap_from_difficulty(p: &Integer, difficulty_float: f64) -> Integer {
    let target = (difficulty_float * ln_integer(p)).ceil();
    Integer::from(target as i128)
}

fn ln_integer(n: &Integer) -> f64 {
    // ln(n) = ln(mantissa) + exponent*ln(2) via n's binary float approximation,
    // avoiding precision loss from a direct `to_f64` on very large integers.
    let bits = n.significant_bits();
    if bits <= 1024 {
        return n.to_f64().ln();
    }
    let shift = bits - 53;
    let hi = (n.clone() >> shift).to_f64();
    hi.ln() + (shift as f64) * std::f64::consts::LN_2
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PowVerifyError {
    #[error("candidate P is not positive")]
    NonPositive,
    #[error("hash outside required [2^255, 2^256) window")]
    HashOutOfRange,
    #[error("Fermat base-2 test failed: P is composite")]
    NotFermatPrime,
    #[error("gap merit below target: actual {actual:.6} < target {target:.6}")]
    MeritTooLow { actual: f64, target: f64 },
}

/// Verify a `Pow`: candidate positivity, hash width, a base-2 Fermat
/// witness, and the gap-to-next-prime meeting the difficulty-derived merit
/// target.
pub fn valid(pow: &Pow) -> Result<f64, PowVerifyError> {
    let hash_int = Integer::from_digits(&pow.hash, rug::integer::Order::Msf);
    let lower = Integer::from(1u32) << 255u32;
    let upper = Integer::from(1u32) << 256u32;
    if hash_int < lower || hash_int >= upper {
        return Err(PowVerifyError::HashOutOfRange);
    }

    let p = pow.candidate();
    if p <= 0 {
        return Err(PowVerifyError::NonPositive);
    }

    if !is_fermat_probable_prime(&p) {
        return Err(PowVerifyError::NotFermatPrime);
    }

    let q = next_fermat_prime(&p);
    let gap = Integer::from(&q - &p);
    let actual_merit = merit(&gap, &p);
    let target_merit = decode_fp48(pow.difficulty);

    if actual_merit + 1e-9 < target_merit {
        return Err(PowVerifyError::MeritTooLow {
            actual: actual_merit,
            target: target_merit,
        });
    }
    Ok(actual_merit)
}

/// `2^(n-1) mod n == 1`, the base-2 Fermat witness used throughout the
/// engine in place of a full strong-prime proof. Every accepted share still
/// gets a strong-test recheck before submission.
pub fn is_fermat_probable_prime(n: &Integer) -> bool {
    if *n < 2 {
        return false;
    }
    if *n == 2 {
        return true;
    }
    let exp = Integer::from(n - 1u32);
    let base = Integer::from(2u32);
    base.pow_mod(&exp, n).map(|r| r == 1).unwrap_or(false)
}

/// Strong (Baillie-PSW-class, via GMP's `mpz_probab_prime_p`) primality test,
/// used to re-check accepted PoW endpoints before submission.
pub fn is_strong_prime(n: &Integer) -> bool {
    !matches!(n.is_probably_prime(25), IsPrime::No)
}

/// Next Fermat-witnessed prime strictly greater than `n` (GMP `mpz_nextprime`
/// equivalent via `rug`).
pub fn next_fermat_prime(n: &Integer) -> Integer {
    n.clone().next_prime()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fermat_prime_detects_mersenne() {
        // 2^61 - 1 is a well-known Mersenne prime, useful as a fast fixture.
        let p = (Integer::from(1u32) << 61u32) - 1u32;
        assert!(is_fermat_probable_prime(&p));
        assert!(is_strong_prime(&p));
    }

    #[test]
    fn fermat_prime_rejects_composite() {
        let n = Integer::from(341u32); // smallest base-2 Fermat pseudoprime's cousin: 341 is one
        // 341 = 11*31 IS a Fermat pseudoprime base 2, so use a plain composite instead.
        let composite = Integer::from(100u32);
        assert!(!is_fermat_probable_prime(&composite));
        let _ = n;
    }

    #[test]
    fn pow_candidate_reconstructs_p() {
        let hash = {
            let mut h = [0u8; 32];
            h[0] = 0x80; // top bit set -> hash in [2^255, 2^256)
            h
        };
        let pow = Pow {
            hash,
            shift: 4,
            adder: Integer::from(5u32),
            difficulty: 0,
            nonce: 0,
        };
        let expected = (Integer::from_digits(&hash, rug::integer::Order::Msf) << 4u32) + 5u32;
        assert_eq!(pow.candidate(), expected);
    }

    #[test]
    fn valid_rejects_hash_below_window() {
        let pow = Pow {
            hash: [0u8; 32],
            shift: 1,
            adder: Integer::from(1u32),
            difficulty: 0,
            nonce: 0,
        };
        assert_eq!(valid(&pow), Err(PowVerifyError::HashOutOfRange));
    }

    #[test]
    fn merit_matches_definition() {
        let p = Integer::from(1_000_003u32);
        let gap = Integer::from(10u32);
        let m = merit(&gap, &p);
        assert!((m - 10.0 / (1_000_003f64).ln()).abs() < 1e-9);
    }

    #[test]
    fn gap_from_difficulty_round_trips_merit() {
        let p = Integer::from(1_000_003u32);
        let target = 7.5;
        let gap = gap_from_difficulty(&p, target);
        let recomputed = merit(&gap, &p);
        assert!(recomputed >= target - 1e-6);
    }
}
