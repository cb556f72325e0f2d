use chrono::{Days, NaiveDate};
use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

use race_form::config::EngineConfig;
use race_form::engine;
use race_form::normalize::{ColumnRoles, normalize, parse_race_date};
use race_form::timeline::TimelineIndex;
use race_form::RawTable;

fn synthetic_table(rows: usize, entities: usize) -> RawTable {
    let mut rng = StdRng::seed_from_u64(42);
    let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
    let headers = ["date", "trainer", "course", "position", "horse"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let data = (0..rows)
        .map(|_| {
            let date = start + Days::new(rng.gen_range(0..3650));
            vec![
                date.format("%d/%m/%Y").to_string(),
                format!("trainer-{}", rng.gen_range(0..entities)),
                format!("course-{}", rng.gen_range(0..60)),
                rng.gen_range(1..=12).to_string(),
                format!("horse-{}", rng.gen_range(0..5000)),
            ]
        })
        .collect();
    RawTable::new(headers, data)
}

fn bench_date_parsing(c: &mut Criterion) {
    let samples = [
        "01/02/2024",
        "12/25/2024",
        "2024-02-01T14:30:00",
        "3rd September 2023",
        "not a date",
    ];
    c.bench_function("parse_race_date", |b| {
        b.iter(|| {
            for raw in samples {
                black_box(parse_race_date(black_box(raw)));
            }
        })
    });
}

fn bench_timeline_index(c: &mut Criterion) {
    let table = synthetic_table(50_000, 800);
    let config = EngineConfig::default();
    let roles = ColumnRoles::resolve(&table, &config.columns, true).unwrap();
    let dataset = normalize(&table, &roles);
    c.bench_function("timeline_index_50k", |b| {
        b.iter(|| black_box(TimelineIndex::build(black_box(&dataset.records))))
    });
}

fn bench_engine_run(c: &mut Criterion) {
    let table = synthetic_table(50_000, 800);
    let mut group = c.benchmark_group("engine_run_50k");
    group.sample_size(10);
    for threads in [1, 4] {
        let mut config = EngineConfig::new("trainer", &[30, 90, 365], true);
        config.threads = Some(threads);
        group.bench_function(format!("{threads}_threads"), |b| {
            b.iter(|| black_box(engine::run(black_box(&table), &config).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_date_parsing,
    bench_timeline_index,
    bench_engine_run
);
criterion_main!(benches);
