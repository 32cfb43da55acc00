use std::hint::black_box;
use std::io::Cursor;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use drainflow::drain::{Drain, DrainConfig};
use drainflow::model::TemplateModel;
use drainflow::parallel::{PipelineConfig, PipelineProcessor};
use drainflow::store::NullStore;
use drainflow::DrainFactory;

fn sample_lines(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match i % 4 {
            0 => format!("user {} logged in from 10.0.{}.{}", i % 50, i % 7, i % 200),
            1 => format!("request /api/v1/items/{} took {} ms", i, i % 300),
            2 => format!("cache miss for key session:{}", i),
            _ => format!("worker {} finished job {} with status ok", i % 8, i),
        })
        .collect()
}

fn bench_drain_ingest_cold(c: &mut Criterion) {
    let lines = sample_lines(1_000);
    c.bench_function("drain_ingest_cold_1k", |b| {
        b.iter_batched(
            || Drain::new(DrainConfig::default()),
            |mut drain| {
                for line in &lines {
                    black_box(drain.ingest(black_box(line)));
                }
                drain
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_drain_ingest_seeded(c: &mut Criterion) {
    let lines = sample_lines(1_000);

    let mut warm = Drain::new(DrainConfig::default());
    for line in &lines {
        warm.ingest(line);
    }
    let mut model = TemplateModel::new();
    model.merge(warm.delta());

    c.bench_function("drain_ingest_seeded_1k", |b| {
        b.iter_batched(
            || Drain::from_model(DrainConfig::default(), &model),
            |mut drain| {
                for line in &lines {
                    black_box(drain.ingest(black_box(line)));
                }
                drain
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_pipeline_end_to_end(c: &mut Criterion) {
    let input: String = sample_lines(10_000)
        .into_iter()
        .map(|line| line + "\n")
        .collect();
    let settings = PipelineConfig {
        num_processors: 4,
        ..PipelineConfig::default()
    };

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.bench_function("text_10k_lines_4_workers", |b| {
        b.iter(|| {
            let outcome = PipelineProcessor::new(settings.clone(), DrainFactory::default(), NullStore)
                .run(Cursor::new(input.clone()), std::io::sink(), None)
                .unwrap();
            black_box(outcome.stats.records_written)
        });
    });
    group.finish();
}

criterion_group!(
    drain_benches,
    bench_drain_ingest_cold,
    bench_drain_ingest_seeded,
    bench_pipeline_end_to_end
);
criterion_main!(drain_benches);
