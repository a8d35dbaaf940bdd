//! Benchmarks for the per-buffer transforms

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use ft_dsp::ops;

fn bench_transforms(c: &mut Criterion) {
    let mut buf: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.001).sin()).collect();
    let src: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.002).cos()).collect();

    c.bench_function("apply_gain 4096", |b| {
        b.iter(|| ops::apply_gain(black_box(&mut buf), black_box(0.7071)))
    });

    c.bench_function("mix_into 4096", |b| {
        b.iter(|| ops::mix_into(black_box(&mut buf), black_box(&src), black_box(0.5)))
    });

    c.bench_function("apply_fade 4096", |b| {
        b.iter(|| ops::apply_fade(black_box(&mut buf), black_box(0.0), black_box(1.0)))
    });

    c.bench_function("rms 4096", |b| b.iter(|| ops::rms(black_box(&buf))));

    c.bench_function("peak 4096", |b| b.iter(|| ops::peak(black_box(&buf))));

    c.bench_function("soft_clip 4096", |b| {
        b.iter(|| ops::soft_clip(black_box(&mut buf), black_box(0.9)))
    });
}

criterion_group!(benches, bench_transforms);
criterion_main!(benches);
