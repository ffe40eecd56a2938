use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gapminer::fermat;
use gapminer::gap_candidate::GapCandidate;
use gapminer::pow::is_fermat_probable_prime;
use gapminer::sieve::RateCounters;
use rug::Integer;

fn bench_fermat_witness_large(c: &mut Criterion) {
    let mersenne = (Integer::from(1u32) << 521u32) - 1u32; // known Mersenne prime
    c.bench_function("is_fermat_probable_prime(2^521-1)", |b| {
        b.iter(|| is_fermat_probable_prime(black_box(&mersenne)));
    });
}

fn bench_test_candidate_dense_window(c: &mut Criterion) {
    let survivors: Vec<u32> = (0..64).map(|i| i * 2 + 1).collect();
    let candidate = GapCandidate {
        nonce: 0,
        target: 10.0,
        gap_start: Integer::from(10_000_019u64),
        survivors,
        seq: 0,
    };
    let counters = RateCounters::default();
    c.bench_function("fermat::test_candidate(64 survivors)", |b| {
        b.iter(|| fermat::test_candidate(black_box(&candidate), &counters));
    });
}

criterion_group!(
    benches,
    bench_fermat_witness_large,
    bench_test_candidate_dense_window,
);
criterion_main!(benches);
