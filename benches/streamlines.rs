//! Criterion benchmarks for the generation hot paths.
//!
//! Benchmarks:
//!   - minor streamline tracing over the recommended field
//!   - road graph construction from traced streamlines
//!   - a full synchronous city on a small domain
//!
//! Run with: cargo bench --bench streamlines

use bevy::math::DVec2;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use citygen::procgen::roads::RoadGraph;
use citygen::procgen::streamline::{StreamlineGenerator, StreamlineParams};
use citygen::procgen::tensor::{NoiseParams, TensorField};
use citygen::world::viewport::{Domain, Viewport};
use citygen::{CityConfig, CityGenerator};

fn domain() -> Domain {
    Domain::new(DVec2::ZERO, DVec2::new(400.0, 400.0))
}

fn field() -> TensorField {
    let mut field = TensorField::new(NoiseParams::default(), 7);
    let mut rng = StdRng::seed_from_u64(7);
    // Recommended fields always have positive sizes on a non-empty domain
    let _ = field.set_recommended(&domain(), &mut rng);
    field
}

fn traced_minor(field: &TensorField) -> Option<StreamlineGenerator> {
    let mut generator = StreamlineGenerator::new(StreamlineParams::minor(), domain(), 1).ok()?;
    generator.create_all_streamlines(field);
    Some(generator)
}

// ---------------------------------------------------------------------------
// Benchmark: streamline tracing
// ---------------------------------------------------------------------------

fn bench_tracing(c: &mut Criterion) {
    let mut group = c.benchmark_group("streamlines");
    group.sample_size(10);
    let field = field();

    group.bench_function("minor_400x400", |b| {
        b.iter(|| black_box(traced_minor(black_box(&field))));
    });

    if let Some(generator) = traced_minor(&field) {
        let lines = generator.all_streamlines_simple.clone();
        group.bench_function("road_graph", |b| {
            b.iter(|| black_box(RoadGraph::from_streamlines(black_box(&lines), true)));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: whole pipeline
// ---------------------------------------------------------------------------

fn bench_city(c: &mut Criterion) {
    let mut group = c.benchmark_group("city");
    group.sample_size(10);

    let config = CityConfig {
        viewport: Viewport {
            screen_dimensions: DVec2::new(400.0, 400.0),
            ..Default::default()
        },
        ..Default::default()
    };

    group.bench_function("generate_everything_400x400", |b| {
        b.iter(|| {
            let mut city = CityGenerator::new(config.clone()).ok();
            if let Some(city) = city.as_mut() {
                let _ = city.generate_everything();
            }
            black_box(city.map(|c| c.lots().len()))
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Register groups
// ---------------------------------------------------------------------------

criterion_group!(benches, bench_tracing, bench_city);
criterion_main!(benches);
