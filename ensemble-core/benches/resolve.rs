use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ensemble_core::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn bench_resolve(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let cfg = GeneratorConfig::periodic("1-16", "1-8", 110.0)
        .with_behaviors(SequenceBehavior::Shuffle, SequenceBehavior::Ascending);
    let mut g = Generator::new(cfg, &mut rng);

    c.bench_function("periodic_advance", |b| b.iter(|| black_box(g.advance(&mut rng))));
    c.bench_function("periodic_peek", |b| b.iter(|| black_box(g.peek())));
    c.bench_function("notation_parse", |b| b.iter(|| black_box(parse_or_default(black_box("1-12,16,20-24")))));
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
