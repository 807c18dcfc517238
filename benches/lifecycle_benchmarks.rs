use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::collections::HashMap;
use std::sync::Arc;

use ism_core::config::{DynamicSettings, IsmSettings};
use ism_core::models::{
    find_matching_policy, IndexMetadata, IsmTemplate, ManagedIndexConfig, Policy,
};
use ism_core::orchestration::{JobExecutionContext, ManagedIndexCoordinator, ManagedIndexRunner};
use ism_core::state_machine::select_step_index;
use ism_core::storage::{InMemoryConfigIndex, SimulatedCluster};
use ism_core::StepStatus;

fn logs_policy() -> Policy {
    serde_json::from_value(serde_json::json!({
        "id": "logs",
        "default_state": "hot",
        "last_updated_time": "2024-01-01T00:00:00Z",
        "states": [
            {
                "name": "hot",
                "actions": [{ "index": 0, "type": "read_only" }],
                "transitions": [{ "state_name": "warm", "conditions": { "min_doc_count": 100 } }]
            },
            { "name": "warm", "actions": [], "transitions": [] }
        ],
        "ism_template": [{
            "index_patterns": ["logs-*"],
            "priority": 1,
            "last_updated_time": "2024-01-01T00:00:00Z"
        }]
    }))
    .expect("benchmark policy should deserialize")
}

fn benchmark_template_matching(c: &mut Criterion) {
    let updated = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let templates: HashMap<String, Vec<IsmTemplate>> = (0..100)
        .map(|i| {
            (
                format!("policy-{i}"),
                vec![IsmTemplate {
                    index_patterns: vec![format!("app-{i}-*"), format!("*-{i}")],
                    priority: i % 5,
                    last_updated_time: updated,
                }],
            )
        })
        .collect();
    let index = IndexMetadata::new(
        "app-42-2024.06.01",
        "uuid",
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    );

    c.bench_function("template_matching_100_policies", |b| {
        b.iter(|| find_matching_policy(black_box(&templates), black_box(&index)))
    });
}

fn benchmark_step_selection(c: &mut Criterion) {
    let steps = ["attempt_set_read_only", "attempt_call_force_merge", "wait_for_force_merge"];
    c.bench_function("step_selection", |b| {
        b.iter(|| {
            select_step_index(
                black_box(&steps),
                black_box(Some(("attempt_call_force_merge", StepStatus::Completed))),
            )
        })
    });
}

fn benchmark_initialization_tick(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let settings = Arc::new(DynamicSettings::new(IsmSettings::default()));

    c.bench_function("runner_initialization_tick", |b| {
        b.iter_batched(
            || {
                let store = Arc::new(InMemoryConfigIndex::new());
                store.insert_policy(logs_policy());
                store.insert_managed_index_config(ManagedIndexConfig::new(
                    "logs-1",
                    "u1",
                    "logs",
                    5,
                    Utc::now(),
                ));
                let cluster = Arc::new(SimulatedCluster::new());
                cluster.add_index(IndexMetadata::new("logs-1", "u1", Utc::now()));
                ManagedIndexRunner::new(store, cluster.clone(), cluster, settings.clone())
            },
            |runner| runtime.block_on(runner.run(&JobExecutionContext::new("u1", Utc::now()))),
            BatchSize::SmallInput,
        )
    });
}

fn benchmark_full_sweep(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let settings = Arc::new(DynamicSettings::new(IsmSettings::default()));
    let created = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    c.bench_function("full_sweep_1000_indices", |b| {
        b.iter_batched(
            || {
                let store = Arc::new(InMemoryConfigIndex::new());
                store.insert_policy(logs_policy());
                let cluster = Arc::new(SimulatedCluster::new());
                cluster.set_leader(true);
                for i in 0..1000 {
                    cluster.add_index(IndexMetadata::new(format!("logs-{i}"), format!("u{i}"), created));
                }
                ManagedIndexCoordinator::new(store, cluster, settings.clone())
            },
            |coordinator| runtime.block_on(coordinator.sweep()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    benchmark_template_matching,
    benchmark_step_selection,
    benchmark_initialization_tick,
    benchmark_full_sweep
);
criterion_main!(benches);
