#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use proptest::strategy::Just;
use std::collections::HashMap;

use ism_core::models::{IndexMetadata, IsmTemplate};
use ism_core::StepStatus;

pub fn step_status_strategy() -> impl Strategy<Value = StepStatus> {
    prop_oneof![
        Just(StepStatus::Starting),
        Just(StepStatus::ConditionNotMet),
        Just(StepStatus::Failed),
        Just(StepStatus::Completed),
    ]
}

/// Distinct step names of one action, in order
pub fn step_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z_]{3,16}", 1..6).prop_map(|names| names.into_iter().collect())
}

/// Step names plus a recorded step that may or may not belong to the action
pub fn recorded_step_strategy() -> impl Strategy<Value = (Vec<String>, Option<(String, StepStatus)>)> {
    step_names_strategy().prop_flat_map(|names| {
        let known = prop::sample::select(names.clone());
        let name = prop_oneof![known, "[a-z_]{3,16}"];
        let recorded = prop::option::of((name, step_status_strategy()));
        (Just(names), recorded)
    })
}

pub fn index_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "logs-[a-z0-9]{1,8}",
        "logs-2024-[0-9]{2}",
        "metrics-[a-z]{1,6}",
        "\\.[a-z]{3,8}",
        "[a-z]{3,10}",
    ]
}

pub fn index_pattern_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("*".to_string()),
        Just("logs-*".to_string()),
        Just("logs-2024-*".to_string()),
        Just("metrics-*".to_string()),
        Just("*-2024-*".to_string()),
        index_name_strategy(),
    ]
}

fn template_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn ism_template_strategy() -> impl Strategy<Value = IsmTemplate> {
    (
        prop::collection::vec(index_pattern_strategy(), 1..4),
        0i32..4,
        0i64..400,
    )
        .prop_map(|(index_patterns, priority, days)| IsmTemplate {
            index_patterns,
            priority,
            last_updated_time: template_epoch() + Duration::days(days),
        })
}

/// Templates keyed by policy id, as returned by the config index search
pub fn template_map_strategy() -> impl Strategy<Value = HashMap<String, Vec<IsmTemplate>>> {
    prop::collection::hash_map(
        "policy-[a-z]{1,4}",
        prop::collection::vec(ism_template_strategy(), 1..3),
        0..6,
    )
}

pub fn index_strategy() -> impl Strategy<Value = IndexMetadata> {
    (index_name_strategy(), "[a-f0-9]{8}", 0i64..500).prop_map(|(name, uuid, days)| {
        IndexMetadata::new(name, uuid, template_epoch() + Duration::days(days))
    })
}

/// A cluster of distinct index names paired with which of them already have jobs
/// and which carry leftover metadata
pub fn cluster_layout_strategy() -> impl Strategy<Value = Vec<(String, bool, bool)>> {
    prop::collection::btree_set("logs-[a-z]{1,6}|other-[a-z]{1,6}", 0..12).prop_flat_map(|names| {
        let count = names.len();
        (
            Just(names),
            prop::collection::vec(any::<bool>(), count),
            prop::collection::vec(any::<bool>(), count),
        )
            .prop_map(|(names, managed, stale)| {
                names
                    .into_iter()
                    .zip(managed)
                    .zip(stale)
                    .map(|((name, managed), stale)| (name, managed, stale))
                    .collect()
            })
    })
}
