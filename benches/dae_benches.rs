use RustedDAE::Examples::dae_examples::dae_examples;
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_circle(c: &mut Criterion) {
    c.bench_function("circle, analytic Jacobian", |b| b.iter(|| dae_examples(0)));
}

fn bench_heat_plate(c: &mut Criterion) {
    c.bench_function("heat plate 16x16, FD Jacobian", |b| b.iter(|| dae_examples(2)));
}

criterion_group!(benches, bench_circle, bench_heat_plate);
criterion_main!(benches);
