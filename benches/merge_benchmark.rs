use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;
use uuid::Uuid;
use wearables_sync::models::{AggregateStats, HealthCategory, HealthRecord, NewHealthRecord};
use wearables_sync::services::pipeline::{reconcile, MergePolicy};

/// One workout per hour, starting at `offset_secs` past the hour.
fn workouts(count: i64, offset_secs: i64, id_prefix: Option<&str>) -> Vec<NewHealthRecord> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let start = base + Duration::hours(i) + Duration::seconds(offset_secs);
            NewHealthRecord {
                provider_id: id_prefix.map(|p| format!("{}-{}", p, i)),
                category: HealthCategory::Workout,
                record_type: Some("running".to_string()),
                source_name: "whoop".to_string(),
                device_id: None,
                start_datetime: start,
                end_datetime: start + Duration::minutes(40),
                duration_seconds: 2400.0,
                heart_rate: AggregateStats::default(),
                steps: AggregateStats::default(),
            }
        })
        .collect()
}

fn benchmark_reconcile(c: &mut Criterion) {
    let user_id = Uuid::new_v4();
    let policy = MergePolicy::default();
    let stored: Vec<HealthRecord> = workouts(500, 0, Some("w"))
        .into_iter()
        .map(|r| HealthRecord::from_new(user_id, r))
        .collect();

    let mut group = c.benchmark_group("reconcile");

    // Re-sync of the same window: every candidate matches by provider id
    group.bench_function("resync_500_by_id", |b| {
        b.iter_batched(
            || (stored.clone(), workouts(500, 0, Some("w"))),
            |(stored, candidates)| reconcile(user_id, stored, black_box(candidates), policy),
            BatchSize::SmallInput,
        )
    });

    // Export without ids, shifted inside the tolerance: matched by overlap
    group.bench_function("import_500_by_overlap", |b| {
        b.iter_batched(
            || (stored.clone(), workouts(500, 30, None)),
            |(stored, candidates)| reconcile(user_id, stored, black_box(candidates), policy),
            BatchSize::SmallInput,
        )
    });

    // Nothing stored: all inserts
    group.bench_function("first_sync_500", |b| {
        b.iter_batched(
            || workouts(500, 0, Some("w")),
            |candidates| reconcile(user_id, Vec::new(), black_box(candidates), policy),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, benchmark_reconcile);
criterion_main!(benches);
