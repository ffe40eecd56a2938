//! Property-based tests for gapminer's mathematical primitives.
//!
//! These tests use the `proptest` framework to verify mathematical invariants
//! hold across thousands of randomly generated inputs. Unlike example-based
//! tests that check specific known values, property tests express universal
//! truths that must hold for all valid inputs, making them excellent at
//! finding edge cases.
//!
//! # Prerequisites
//!
//! - No database or network access required.
//! - These tests are purely computational and always run.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test property_tests
//!
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! # Testing strategy
//!
//! Properties are organized by module:
//! - **sieve**: modular exponentiation, GCD, prime table generation
//! - **header**: FP48 difficulty codec round-trip
//! - **pow**: merit monotonicity in the gap size
//! - **crt_set**: CRT residue combination satisfies every input congruence

use proptest::prelude::*;
use rug::Integer;

proptest! {
    /// **Mathematical property**: `pow_mod(b, e, m) == b^e mod m`.
    ///
    /// Compares the u64 binary-exponentiation implementation against GMP's
    /// `pow_mod` on `rug::Integer` to rule out overflow or off-by-one errors.
    #[test]
    fn prop_pow_mod_matches_big_int(
        base in 1u64..1000,
        exp in 0u64..100,
        modulus in 2u64..10000,
    ) {
        let result = gapminer::sieve::pow_mod(base, exp, modulus);
        let expected = {
            let b = Integer::from(base);
            let m = Integer::from(modulus);
            let e = Integer::from(exp);
            b.pow_mod(&e, &m).unwrap().to_u64().unwrap()
        };
        prop_assert_eq!(result, expected,
            "pow_mod({}, {}, {}) = {} but expected {}", base, exp, modulus, result, expected);
    }

    /// **Mathematical properties**: `gcd` is symmetric and divides both inputs.
    #[test]
    fn prop_gcd_symmetric_and_divides(
        a in 1u64..10000,
        b in 1u64..10000,
    ) {
        let g = gapminer::sieve::gcd(a, b);
        let g2 = gapminer::sieve::gcd(b, a);
        prop_assert_eq!(g, g2, "gcd({},{}) != gcd({},{})", a, b, b, a);
        prop_assert_eq!(a % g, 0, "gcd({},{})={} does not divide {}", a, b, g, a);
        prop_assert_eq!(b % g, 0, "gcd({},{})={} does not divide {}", a, b, g, b);
    }

    /// **Mathematical property**: every value `generate_primes` returns is
    /// actually prime, cross-checked against GMP's Miller-Rabin.
    #[test]
    fn prop_generate_primes_all_prime(
        limit in 10usize..2000,
    ) {
        let primes = gapminer::sieve::generate_primes(limit);
        for &p in &primes {
            let n = Integer::from(p);
            prop_assert!(
                n.is_probably_prime(25) != rug::integer::IsPrime::No,
                "{} returned by generate_primes({}) is not prime", p, limit
            );
        }
    }

    /// **Mathematical property**: `generate_primes` is strictly increasing
    /// and starts at 2.
    #[test]
    fn prop_generate_primes_strictly_increasing(
        limit in 1usize..2000,
    ) {
        let primes = gapminer::sieve::generate_primes(limit);
        prop_assert_eq!(primes[0], 2);
        for w in primes.windows(2) {
            prop_assert!(w[0] < w[1], "primes not strictly increasing: {} >= {}", w[0], w[1]);
        }
    }

    /// **Mathematical property**: `decode_fp48(encode_fp48(int, frac))` round
    /// trips to within the format's 2^-48 resolution.
    #[test]
    fn prop_fp48_roundtrip(
        int_part in 1u16..65535,
        frac_steps in 0u64..(1u64 << 48),
    ) {
        let frac = frac_steps as f64 / (1u64 << 48) as f64;
        let encoded = gapminer::header::encode_fp48(int_part, frac);
        let decoded = gapminer::header::decode_fp48(encoded);
        let expected = int_part as f64 + frac;
        prop_assert!(
            (decoded - expected).abs() < 1e-9,
            "fp48 round trip drifted: {} vs {}", decoded, expected
        );
    }

    /// **Mathematical property**: merit grows monotonically with the gap size
    /// for a fixed anchor prime (merit = gap / ln(p)).
    #[test]
    fn prop_merit_monotone_in_gap(
        p_seed in 1_000_000u64..10_000_000,
        gap_a in 2u64..500,
        gap_b in 500u64..1000,
    ) {
        let p = Integer::from(p_seed | 1);
        let merit_a = gapminer::pow::merit(&Integer::from(gap_a), &p);
        let merit_b = gapminer::pow::merit(&Integer::from(gap_b), &p);
        prop_assert!(merit_a < merit_b,
            "merit({}, p) = {} should be less than merit({}, p) = {}", gap_a, merit_a, gap_b, merit_b);
    }

    /// **Mathematical property**: the offset produced by combining per-prime
    /// residues via CRT satisfies `offset + r === 0 (mod p)` for every input
    /// prime/residue pair — i.e. `offset` is a valid presieve crossing point
    /// for each residue class.
    #[test]
    fn prop_crt_combination_satisfies_residues(
        r1 in 0u64..3,
        r2 in 0u64..5,
        r3 in 0u64..7,
    ) {
        use gapminer::crt_optimizer::residues_to_offset;
        let primes = vec![3u64, 5, 7];
        let residues = vec![r1, r2, r3];
        let offset = residues_to_offset(&primes, &residues);
        prop_assert!(offset >= 0 && offset < Integer::from(3u64 * 5 * 7));
        for (&p, &r) in primes.iter().zip(residues.iter()) {
            let check = Integer::from(&offset + r) % p;
            prop_assert_eq!(check, Integer::from(0u32),
                "offset {} + residue {} not divisible by {}", offset, r, p);
        }
    }
}
