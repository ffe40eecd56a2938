use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gapminer::sieve;

fn bench_generate_primes_1m(c: &mut Criterion) {
    c.bench_function("generate_primes(1_000_000)", |b| {
        b.iter(|| sieve::generate_primes(black_box(1_000_000)));
    });
}

fn bench_pow_mod_large(c: &mut Criterion) {
    c.bench_function("pow_mod(large base, large exp)", |b| {
        b.iter(|| {
            sieve::pow_mod(
                black_box(123_456_789),
                black_box(987_654_321),
                black_box(1_000_000_007),
            )
        });
    });
}

fn bench_bitsieve_10m(c: &mut Criterion) {
    c.bench_function("bitsieve_popcount(10_000_000)", |b| {
        b.iter(|| {
            let mut s = sieve::BitSieve::new_all_clear(black_box(10_000_000));
            for i in (0..10_000_000).step_by(7) {
                s.set_composite(i);
            }
            black_box(s.popcount_range())
        });
    });
}

criterion_group!(
    benches,
    bench_generate_primes_1m,
    bench_pow_mod_large,
    bench_bitsieve_10m,
);
criterion_main!(benches);
