use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gapminer::crt_set::build_presieve;
use gapminer::sieve::generate_primes;
use rug::Integer;

fn bench_build_presieve_100_primes(c: &mut Criterion) {
    let primes = generate_primes(100);
    c.bench_function("build_presieve(100 primes, 1M bits)", |b| {
        b.iter(|| build_presieve(black_box(&primes), 1_000_000, &Integer::from(0u32)));
    });
}

criterion_group!(benches, bench_build_presieve_100_primes);
criterion_main!(benches);
