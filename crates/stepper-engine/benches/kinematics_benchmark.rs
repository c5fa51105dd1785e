//! Benchmarks for the step-time kinematics functions: these run once per
//! emitted pulse, so they are the latency-sensitive hot path of the
//! scheduler loop.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stepper_engine::kinematics::{braking_distance_steps, md_segment_step, speed_down_step, speed_up_step};

fn bench_speed_up(c: &mut Criterion) {
    let omega_target = 7.853_981_634;
    c.bench_function("speed_up_step", |b| {
        b.iter(|| speed_up_step(black_box(10), black_box(400), black_box(20.0), omega_target, black_box(4.0)))
    });
}

fn bench_speed_down(c: &mut Criterion) {
    c.bench_function("speed_down_step", |b| {
        b.iter(|| speed_down_step(black_box(100), black_box(400), black_box(40.0)))
    });
}

fn bench_braking_distance(c: &mut Criterion) {
    c.bench_function("braking_distance_steps", |b| {
        b.iter(|| braking_distance_steps(black_box(2000), black_box(400), black_box(40.0)))
    });
}

fn bench_md_segment_step(c: &mut Criterion) {
    c.bench_function("md_segment_step", |b| {
        b.iter(|| md_segment_step(black_box(4.0), black_box(10.0), black_box(8.0), black_box(400)))
    });
}

criterion_group!(
    benches,
    bench_speed_up,
    bench_speed_down,
    bench_braking_distance,
    bench_md_segment_step
);
criterion_main!(benches);
