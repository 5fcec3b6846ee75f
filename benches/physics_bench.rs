//! Benchmarks for Ballance-Physics
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ballance_physics::prelude::*;

fn floor() -> BodyDesc {
    let quad = Polyhedron::new(
        vec![
            DVec3::new(-50.0, 0.0, -50.0),
            DVec3::new(50.0, 0.0, -50.0),
            DVec3::new(50.0, 0.0, 50.0),
            DVec3::new(-50.0, 0.0, 50.0),
        ],
        vec![0, 2, 1, 0, 3, 2],
    );
    BodyDesc::concave("floor", vec![quad]).with_mass(0.0)
}

fn cube(half: f64) -> PointBuffer {
    PointBuffer::new(
        (0..8)
            .map(|i| {
                DVec3::new(
                    if i & 1 == 0 { -half } else { half },
                    if i & 2 == 0 { -half } else { half },
                    if i & 4 == 0 { -half } else { half },
                )
            })
            .collect(),
    )
}

// ============================================================================
// Step benchmarks
// ============================================================================

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");

    group.bench_function("single_ball_66_steps", |b| {
        b.iter(|| {
            let mut env = Environment::new(EnvironmentConfig::default()).unwrap();
            env.physicalize(&floor()).unwrap();
            let ball = env
                .physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(0.0, 5.0, 0.0)))
                .unwrap();
            let h = env.config().step_size();
            for _ in 0..66 {
                env.simulate_dtime(black_box(h));
            }
            env.pose(ball).unwrap()
        });
    });

    group.bench_function("crate_stack_10_66_steps", |b| {
        b.iter(|| {
            let mut env = Environment::new(EnvironmentConfig::default()).unwrap();
            env.physicalize(&floor()).unwrap();
            for i in 0..10 {
                env.physicalize(
                    &BodyDesc::convex("crate", vec![cube(0.5)])
                        .with_position(DVec3::new(0.0, 0.5 + f64::from(i) * 1.01, 0.0)),
                )
                .unwrap();
            }
            let h = env.config().step_size();
            for _ in 0..66 {
                env.simulate_dtime(black_box(h));
            }
            env.stats().contact_points
        });
    });

    group.bench_function("ball_grid_100_33_steps", |b| {
        b.iter(|| {
            let mut env = Environment::new(EnvironmentConfig::default()).unwrap();
            env.physicalize(&floor()).unwrap();
            for i in 0..100 {
                let (x, z) = (f64::from(i % 10) * 1.5, f64::from(i / 10) * 1.5);
                env.physicalize(&BodyDesc::ball("ball", 0.5).with_position(DVec3::new(x, 1.0, z)))
                    .unwrap();
            }
            let h = env.config().step_size();
            for _ in 0..33 {
                env.simulate_dtime(black_box(h));
            }
            env.stats().broadphase_pairs
        });
    });

    group.finish();
}

// ============================================================================
// Query benchmarks
// ============================================================================

fn bench_raycast(c: &mut Criterion) {
    let mut env = Environment::new(EnvironmentConfig::default()).unwrap();
    for i in 0..200 {
        let (x, z) = (f64::from(i % 20) * 2.0, f64::from(i / 20) * 2.0);
        env.physicalize(
            &BodyDesc::ball("pillar", 0.5)
                .with_mass(0.0)
                .with_position(DVec3::new(x, 0.0, z)),
        )
        .unwrap();
    }

    c.bench_function("raycast_all_200_bodies", |b| {
        b.iter(|| {
            env.raycast(
                black_box(DVec3::new(-5.0, 0.0, 0.0)),
                DVec3::X,
                100.0,
                0,
            )
        });
    });

    c.bench_function("raycast_one_200_bodies", |b| {
        b.iter(|| env.raycast_one(black_box(DVec3::new(-5.0, 0.0, 4.0)), DVec3::X, 100.0, 0));
    });
}

// ============================================================================
// Shape construction
// ============================================================================

fn bench_hull(c: &mut Criterion) {
    let points: Vec<DVec3> = (0..256)
        .map(|i| {
            let t = f64::from(i) * 0.618_033_988_75;
            let y = 1.0 - 2.0 * (f64::from(i) + 0.5) / 256.0;
            let r = (1.0 - y * y).sqrt();
            DVec3::new(r * (t * std::f64::consts::TAU).cos(), y, r * (t * std::f64::consts::TAU).sin())
        })
        .collect();

    c.bench_function("convex_hull_256_points", |b| {
        b.iter(|| Shape::from_geometry(&[PointBuffer::new(black_box(points.clone()))], &[], false).unwrap());
    });
}

criterion_group!(benches, bench_step, bench_raycast, bench_hull);
criterion_main!(benches);
