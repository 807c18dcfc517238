//! Test environment and data builders shared by the integration tests.
//!
//! Everything runs against the in-memory config index and the simulated cluster, so
//! a test drives ticks by hand and inspects the documents in between.

#![allow(dead_code)] // Not every test binary uses every helper

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use ism_core::config::{DynamicSettings, IsmSettings};
use ism_core::models::{
    DocVersion, IndexMetadata, ManagedIndexConfig, ManagedIndexMetaData, Policy, Versioned,
};
use ism_core::orchestration::{
    IsmAdmin, JobExecutionContext, ManagedIndexCoordinator, ManagedIndexRunner, RunOutcome,
};
use ism_core::storage::{ConfigIndexClient, InMemoryConfigIndex, SimulatedCluster};

/// Creation date of every index built by [`TestEnv::add_index`]; later than the
/// fixtures' template timestamps so templates may claim them
pub fn index_creation_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// Settings for integration tests: fast coordinator retries, everything allowed
pub fn test_settings() -> IsmSettings {
    IsmSettings {
        coordinator_backoff_millis: 1,
        ..IsmSettings::default()
    }
}

/// Loads `tests/fixtures/policies/<name>.json`
pub fn load_policy(name: &str) -> Result<Policy> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/policies")
        .join(format!("{name}.json"));
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read policy fixture {}", path.display()))?;
    let policy: Policy = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse policy fixture {name}"))?;
    policy
        .validate()
        .with_context(|| format!("Policy fixture {name} is invalid"))?;
    Ok(policy)
}

/// One engine wired to one in-memory config index and one simulated cluster
pub struct TestEnv {
    pub store: Arc<InMemoryConfigIndex>,
    pub cluster: Arc<SimulatedCluster>,
    pub settings: Arc<DynamicSettings>,
    pub runner: ManagedIndexRunner,
    pub admin: IsmAdmin,
    pub coordinator: ManagedIndexCoordinator,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: IsmSettings) -> Self {
        let store = Arc::new(InMemoryConfigIndex::new());
        let cluster = Arc::new(SimulatedCluster::new());
        cluster.set_leader(true);
        let settings = Arc::new(DynamicSettings::new(settings));

        let runner = ManagedIndexRunner::new(
            store.clone(),
            cluster.clone(),
            cluster.clone(),
            settings.clone(),
        );
        let admin = IsmAdmin::new(store.clone(), cluster.clone(), settings.clone());
        let coordinator =
            ManagedIndexCoordinator::new(store.clone(), cluster.clone(), settings.clone());

        Self {
            store,
            cluster,
            settings,
            runner,
            admin,
            coordinator,
        }
    }

    /// A runner reading and writing through `config_index` instead of the store
    pub fn runner_with(&self, config_index: Arc<dyn ConfigIndexClient>) -> ManagedIndexRunner {
        ManagedIndexRunner::new(
            config_index,
            self.cluster.clone(),
            self.cluster.clone(),
            self.settings.clone(),
        )
    }

    pub fn install_policy(&self, fixture: &str) -> Policy {
        let policy = load_policy(fixture).expect("policy fixture should load");
        self.store.insert_policy(policy.clone());
        policy
    }

    pub fn add_index(&self, name: &str, uuid: &str) -> IndexMetadata {
        let index = IndexMetadata::new(name, uuid, index_creation_date());
        self.cluster.add_index(index.clone());
        index
    }

    /// Creates the job document for an existing index, as the coordinator would
    pub fn manage(&self, name: &str, uuid: &str, policy_id: &str) -> DocVersion {
        self.store.insert_managed_index_config(ManagedIndexConfig::new(
            name,
            uuid,
            policy_id,
            self.settings.snapshot().job_interval_minutes,
            Utc::now(),
        ))
    }

    pub async fn tick(&self, uuid: &str) -> RunOutcome {
        self.tick_with(&self.runner, uuid).await
    }

    pub async fn tick_with(&self, runner: &ManagedIndexRunner, uuid: &str) -> RunOutcome {
        runner
            .run(&JobExecutionContext::new(uuid, Utc::now()))
            .await
    }

    pub fn job(&self, uuid: &str) -> Versioned<ManagedIndexConfig> {
        self.store
            .managed_index_config(uuid)
            .unwrap_or_else(|| panic!("job {uuid} should exist"))
    }

    pub fn metadata(&self, uuid: &str) -> ManagedIndexMetaData {
        self.store
            .metadata(uuid)
            .unwrap_or_else(|| panic!("metadata of {uuid} should exist"))
            .value
    }

    pub fn current_state(&self, uuid: &str) -> Option<String> {
        self.metadata(uuid)
            .state_meta_data
            .map(|state| state.name)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for policies that do not warrant a fixture file
pub struct PolicyBuilder {
    id: String,
    default_state: Option<String>,
    states: Vec<Value>,
    templates: Vec<Value>,
}

impl PolicyBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            default_state: None,
            states: Vec::new(),
            templates: Vec::new(),
        }
    }

    /// Adds a state; the first state added is the default unless overridden
    pub fn state(mut self, name: &str, actions: Vec<Value>, transitions: Vec<Value>) -> Self {
        let actions: Vec<Value> = actions
            .into_iter()
            .enumerate()
            .map(|(position, mut action)| {
                action["index"] = json!(position);
                action
            })
            .collect();
        self.states.push(json!({
            "name": name,
            "actions": actions,
            "transitions": transitions,
        }));
        self.default_state.get_or_insert_with(|| name.to_string());
        self
    }

    pub fn default_state(mut self, name: &str) -> Self {
        self.default_state = Some(name.to_string());
        self
    }

    pub fn template(mut self, patterns: &[&str], priority: i32) -> Self {
        self.templates.push(json!({
            "index_patterns": patterns,
            "priority": priority,
            "last_updated_time": "2024-01-01T00:00:00Z",
        }));
        self
    }

    pub fn build(self) -> Policy {
        serde_json::from_value(json!({
            "id": self.id,
            "default_state": self.default_state.unwrap_or_default(),
            "states": self.states,
            "ism_template": self.templates,
            "last_updated_time": "2024-01-01T00:00:00Z",
        }))
        .expect("built policy should deserialize")
    }
}

pub fn action(kind: &str) -> Value {
    json!({ "type": kind })
}

pub fn transition(target: &str) -> Value {
    json!({ "state_name": target })
}

pub fn transition_when(target: &str, conditions: Value) -> Value {
    json!({ "state_name": target, "conditions": conditions })
}
