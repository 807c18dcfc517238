//! # Managed Index Coordinator
//!
//! Keeps the set of job documents in line with the indices that exist in the cluster.
//! Only the elected leader does any work.
//!
//! ## Key Components
//!
//! - [`ManagedIndexCoordinator`] - reacts to cluster changes, leadership and settings
//! - [`sweep`] - pure diffing between index inventory and job documents
//! - [`bulk`] - bulk writes with retry of throttled items
//! - [`scheduler`] - the cancellable background tasks
//!
//! ## Sweeps
//!
//! An incremental sweep runs for every cluster change event that touched metadata:
//! jobs of deleted indices are removed and created indices are matched against the
//! ISM templates. A full sweep runs on a fixed delay as anti-entropy and repairs
//! whatever the incremental sweeps missed. Both are diff based and may interleave;
//! job creation is create-only so a duplicate request is harmless.
//!
//! While the node leads and management is enabled, a second background task
//! re-enables paused jobs whose metadata is neither completed nor failed. Losing
//! leadership, disabling management or stopping cancels both tasks.

pub mod bulk;
pub mod scheduler;
pub mod sweep;


use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{DynamicSettings, IsmSettings, SettingsListener};
use crate::constants::{REENABLE_SWEEP_PERIOD, SWEEP_BUFFER};
use crate::error::{IsmError, Result, StorageResult};
use crate::logging::{log_coordinator_operation, log_error};
use crate::models::{ClusterChangedEvent, IndexMetadata, IsmTemplate};
use crate::orchestration::backoff::ConstantBackoff;
use crate::storage::{ClusterService, ConfigIndexClient, DocWriteRequest};

use self::bulk::BulkOutcome;
use self::scheduler::ScheduledTask;

/// Point-in-time view of the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub coordinator_id: Uuid,
    pub running: bool,
    pub is_leader: bool,
    pub sweep_scheduled: bool,
    pub reenable_scheduled: bool,
    pub last_full_sweep: Option<Instant>,
}

/// Creates and removes job documents as indices come and go
#[derive(Debug, Clone)]
pub struct ManagedIndexCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    id: Uuid,
    self_ref: Weak<CoordinatorInner>,
    config_index: Arc<dyn ConfigIndexClient>,
    cluster: Arc<dyn ClusterService>,
    settings: Arc<DynamicSettings>,
    running: AtomicBool,
    is_leader: AtomicBool,
    last_full_sweep: Mutex<Option<Instant>>,
    sweep_task: Mutex<Option<ScheduledTask>>,
    reenable_task: Mutex<Option<ScheduledTask>>,
}

impl std::fmt::Debug for CoordinatorInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorInner")
            .field("id", &self.id)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("is_leader", &self.is_leader.load(Ordering::SeqCst))
            .field("last_full_sweep", &*self.last_full_sweep.lock())
            .finish()
    }
}

impl ManagedIndexCoordinator {
    /// Creates a stopped coordinator and subscribes it to settings changes
    pub fn new(
        config_index: Arc<dyn ConfigIndexClient>,
        cluster: Arc<dyn ClusterService>,
        settings: Arc<DynamicSettings>,
    ) -> Self {
        let inner = Arc::new_cyclic(|self_ref| CoordinatorInner {
            id: Uuid::new_v4(),
            self_ref: self_ref.clone(),
            config_index,
            cluster,
            settings: settings.clone(),
            running: AtomicBool::new(false),
            is_leader: AtomicBool::new(false),
            last_full_sweep: Mutex::new(None),
            sweep_task: Mutex::new(None),
            reenable_task: Mutex::new(None),
        });

        let listener: Weak<dyn SettingsListener> = Arc::downgrade(&inner) as Weak<dyn SettingsListener>;
        settings.subscribe(listener);

        info!(coordinator_id = %inner.id, "🏗️ COORDINATOR: Created ManagedIndexCoordinator");
        Self { inner }
    }

    /// Starts reacting to cluster events; schedules the background tasks if this node leads
    #[instrument(skip(self), fields(coordinator_id = %self.inner.id))]
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(IsmError::InvalidState(
                "Coordinator is already running".to_string(),
            ));
        }

        info!("🚀 COORDINATOR: Starting ManagedIndexCoordinator");
        let leader = self.inner.cluster.is_local_node_leader();
        self.inner.is_leader.store(leader, Ordering::SeqCst);
        if leader {
            self.inner.init_background_tasks();
        }
        Ok(())
    }

    #[instrument(skip(self), fields(coordinator_id = %self.inner.id))]
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            info!("COORDINATOR: Already stopped");
            return;
        }
        self.inner.cancel_background_tasks();
        info!("🛑 COORDINATOR: ManagedIndexCoordinator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_leader(&self) -> bool {
        self.inner.is_leader()
    }

    pub fn is_sweep_scheduled(&self) -> bool {
        is_scheduled(&self.inner.sweep_task)
    }

    pub fn is_reenable_scheduled(&self) -> bool {
        is_scheduled(&self.inner.reenable_task)
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            coordinator_id: self.inner.id,
            running: self.is_running(),
            is_leader: self.is_leader(),
            sweep_scheduled: self.is_sweep_scheduled(),
            reenable_scheduled: self.is_reenable_scheduled(),
            last_full_sweep: *self.inner.last_full_sweep.lock(),
        }
    }

    /// Tracks leadership, then spawns an incremental sweep for the event when it is
    /// relevant. The returned handle may be awaited or dropped.
    pub fn cluster_changed(&self, event: &ClusterChangedEvent) -> Option<JoinHandle<()>> {
        if !self.is_running() {
            debug!("COORDINATOR: Ignoring cluster change while stopped");
            return None;
        }

        let was_leader = self
            .inner
            .is_leader
            .swap(event.local_node_leader, Ordering::SeqCst);
        if event.local_node_leader && !was_leader {
            info!("👑 COORDINATOR: Local node elected leader");
            self.inner.init_background_tasks();
        } else if !event.local_node_leader && was_leader {
            info!("COORDINATOR: Local node is no longer leader");
            self.inner.cancel_background_tasks();
        }

        let enabled = self.inner.settings.snapshot().enabled;
        if !enabled || event.is_new_cluster || !event.local_node_leader || !event.metadata_changed {
            return None;
        }

        let inner = self.inner.clone();
        let event = event.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = inner.sweep_cluster_changed_event(&event).await {
                log_error("coordinator", "incremental_sweep", &e.to_string(), None);
            }
        }))
    }

    /// Reconciles the jobs affected by a single cluster change event
    pub async fn sweep_cluster_changed_event(&self, event: &ClusterChangedEvent) -> Result<()> {
        self.inner.sweep_cluster_changed_event(event).await
    }

    /// Full reconciliation of every index against every job document
    pub async fn sweep(&self) -> Result<()> {
        self.inner.sweep().await
    }

    /// Re-enables disabled jobs whose metadata is neither completed nor failed.
    /// Returns the number of jobs sent for re-enabling.
    pub async fn reenable_jobs(&self) -> Result<usize> {
        self.inner.reenable_jobs().await
    }

    pub async fn get_ism_templates(&self) -> HashMap<String, Vec<IsmTemplate>> {
        self.inner.get_ism_templates().await
    }

    pub async fn update_managed_indices(
        &self,
        requests: Vec<DocWriteRequest>,
        has_create: bool,
    ) -> StorageResult<BulkOutcome> {
        self.inner.update_managed_indices(requests, has_create).await
    }
}

impl CoordinatorInner {
    fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Replaces any scheduled full sweep with one on the current period
    fn init_background_sweep(&self) {
        let settings = self.settings.snapshot();
        if !settings.enabled || !self.is_leader() {
            return;
        }

        let period = settings.sweep_period();
        let weak = self.self_ref.clone();
        let task = ScheduledTask::spawn("full_sweep", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.background_sweep_tick().await;
                }
            }
        });

        replace_task(&self.sweep_task, task);
        info!(
            sweep_period_millis = period.as_millis() as u64,
            "🔄 COORDINATOR: Scheduled background sweep"
        );
    }

    fn init_reenable_sweep(&self) {
        if !self.settings.snapshot().enabled || !self.is_leader() {
            return;
        }

        let weak = self.self_ref.clone();
        let task = ScheduledTask::spawn("reenable_sweep", REENABLE_SWEEP_PERIOD, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.background_reenable_tick().await;
                }
            }
        });
        replace_task(&self.reenable_task, task);
        debug!("COORDINATOR: Scheduled background job re-enable sweep");
    }

    fn init_background_tasks(&self) {
        self.init_background_sweep();
        self.init_reenable_sweep();
    }

    fn cancel_background_tasks(&self) {
        if let Some(task) = self.sweep_task.lock().take() {
            task.cancel();
        }
        if let Some(task) = self.reenable_task.lock().take() {
            task.cancel();
        }
        info!("COORDINATOR: Cancelled background sweeps");
    }

    /// Scheduled ticks may wake slightly early; at most one full sweep runs per period
    fn is_full_sweep_due(&self, settings: &IsmSettings) -> bool {
        match *self.last_full_sweep.lock() {
            None => true,
            Some(last) => settings.sweep_period().saturating_sub(last.elapsed()) < SWEEP_BUFFER,
        }
    }

    async fn background_sweep_tick(&self) {
        let settings = self.settings.snapshot();
        if !self.is_full_sweep_due(&settings) {
            debug!("COORDINATOR: Skipping background sweep, last sweep is recent");
            return;
        }
        debug!("COORDINATOR: Performing background sweep of managed indices");
        if let Err(e) = self.sweep().await {
            log_error("coordinator", "full_sweep", &e.to_string(), None);
        }
    }

    async fn background_reenable_tick(&self) {
        if !self.settings.snapshot().enabled || !self.is_leader() {
            return;
        }
        if let Err(e) = self.reenable_jobs().await {
            log_error("coordinator", "reenable_jobs", &e.to_string(), Some("background"));
        }
    }

    async fn get_ism_templates(&self) -> HashMap<String, Vec<IsmTemplate>> {
        match self.config_index.search_ism_templates().await {
            Ok(templates) => templates,
            Err(e) => {
                warn!(error = %e, "⚠️ COORDINATOR: Failed to load ISM templates");
                HashMap::new()
            }
        }
    }

    async fn update_managed_indices(
        &self,
        requests: Vec<DocWriteRequest>,
        has_create: bool,
    ) -> StorageResult<BulkOutcome> {
        let settings = self.settings.snapshot();
        let backoff = ConstantBackoff::new(
            settings.coordinator_backoff_delay(),
            settings.coordinator_backoff_count,
        );
        bulk::update_managed_indices(self.config_index.as_ref(), requests, has_create, backoff).await
    }

    #[instrument(skip(self, event), fields(created = event.indices_created.len(), deleted = event.indices_deleted.len()))]
    async fn sweep_cluster_changed_event(&self, event: &ClusterChangedEvent) -> Result<()> {
        let started = Instant::now();
        let settings = self.settings.snapshot();

        let deleted_uuids: Vec<String> = event
            .indices_deleted
            .iter()
            .map(|index| index.uuid.clone())
            .collect();
        let mut removed: Vec<String> = if deleted_uuids.is_empty() {
            Vec::new()
        } else {
            match self
                .config_index
                .multi_get_managed_index_configs(&deleted_uuids)
                .await
            {
                Ok(found) => found.into_keys().collect(),
                Err(e) if e.is_index_not_found() => Vec::new(),
                Err(e) => return Err(e.into()),
            }
        };
        removed.sort();

        let created: Vec<IndexMetadata> = event
            .indices_created
            .iter()
            .filter_map(|name| self.cluster.index_metadata(name))
            .collect();
        let creates = if created.is_empty() {
            Vec::new()
        } else {
            let templates = self.get_ism_templates().await;
            sweep::create_requests(&created, &templates, settings.job_interval_minutes, Utc::now())
        };

        let has_create = !creates.is_empty();
        let mut requests = creates;
        requests.extend(sweep::delete_job_requests(&removed));
        let request_count = requests.len();

        let outcome = self.update_managed_indices(requests, has_create).await?;
        self.clear_metadata(&removed).await?;

        log_coordinator_operation(
            "incremental_sweep",
            if outcome.abandoned { "abandoned" } else { "completed" },
            request_count,
            Some(started.elapsed().as_millis() as u64),
            None,
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sweep(&self) -> Result<()> {
        let started = Instant::now();
        let settings = self.settings.snapshot();

        let managed = match self.config_index.search_managed_index_configs().await {
            Ok(configs) => configs,
            Err(e) if e.is_index_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let indices = self.cluster.indices();

        let managed_uuids: HashSet<String> = managed
            .iter()
            .map(|config| config.value.index_uuid.clone())
            .collect();
        let live_uuids: HashSet<String> = indices.iter().map(|index| index.uuid.clone()).collect();

        let unmanaged = sweep::unmanaged_indices(&indices, &managed_uuids);
        let templates = if unmanaged.is_empty() {
            HashMap::new()
        } else {
            self.get_ism_templates().await
        };
        let creates = sweep::create_requests(
            unmanaged.iter().copied(),
            &templates,
            settings.job_interval_minutes,
            Utc::now(),
        );
        let removed = sweep::removed_job_uuids(&managed_uuids, &live_uuids);

        // Metadata of an index that just received a job belongs to its first run
        let stale: Vec<String> = {
            let created_uuids: HashSet<&str> = creates.iter().map(|r| r.index_uuid()).collect();
            unmanaged
                .iter()
                .filter(|index| !created_uuids.contains(index.uuid.as_str()))
                .map(|index| index.uuid.clone())
                .chain(removed.iter().cloned())
                .collect()
        };

        let has_create = !creates.is_empty();
        let mut requests = creates;
        requests.extend(sweep::delete_job_requests(&removed));
        let request_count = requests.len();

        self.update_managed_indices(requests, has_create).await?;
        self.clear_metadata(&stale).await?;

        *self.last_full_sweep.lock() = Some(Instant::now());
        log_coordinator_operation(
            "full_sweep",
            "completed",
            request_count,
            Some(started.elapsed().as_millis() as u64),
            Some(&format!("indices={} jobs={}", indices.len(), managed.len())),
        );
        Ok(())
    }

    /// Deletes the metadata documents that exist among `uuids`
    async fn clear_metadata(&self, uuids: &[String]) -> Result<()> {
        if uuids.is_empty() {
            return Ok(());
        }
        let existing = match self.config_index.multi_get_metadata(uuids).await {
            Ok(existing) => existing,
            Err(e) if e.is_index_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let requests = sweep::delete_metadata_requests(existing.keys());
        self.update_managed_indices(requests, false).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reenable_jobs(&self) -> Result<usize> {
        let configs = match self.config_index.search_managed_index_configs().await {
            Ok(configs) => configs,
            Err(e) if e.is_index_not_found() => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let disabled: Vec<String> = configs
            .into_iter()
            .filter(|config| !config.value.enabled)
            .map(|config| config.value.index_uuid)
            .collect();
        if disabled.is_empty() {
            return Ok(0);
        }

        let metadata = self.config_index.multi_get_metadata(&disabled).await?;
        let mut resumable: Vec<String> = metadata
            .into_iter()
            .filter(|(_, metadata)| metadata.value.is_resumable())
            .map(|(uuid, _)| uuid)
            .collect();
        resumable.sort();

        let requests: Vec<DocWriteRequest> = resumable
            .iter()
            .map(|uuid| DocWriteRequest::SetJobEnabled {
                index_uuid: uuid.clone(),
                enabled: true,
            })
            .collect();
        self.update_managed_indices(requests, false).await?;

        info!(count = resumable.len(), "✅ COORDINATOR: Re-enabled managed index jobs");
        Ok(resumable.len())
    }

    fn on_enabled(&self) {
        self.init_background_tasks();
        let Some(inner) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = inner.sweep().await {
                log_error("coordinator", "full_sweep", &e.to_string(), Some("on enable"));
            }
            if let Err(e) = inner.reenable_jobs().await {
                log_error("coordinator", "reenable_jobs", &e.to_string(), None);
            }
        });
    }
}

fn is_scheduled(slot: &Mutex<Option<ScheduledTask>>) -> bool {
    slot.lock().as_ref().is_some_and(|task| !task.is_cancelled())
}

fn replace_task(slot: &Mutex<Option<ScheduledTask>>, task: ScheduledTask) {
    let previous = slot.lock().replace(task);
    if let Some(previous) = previous {
        previous.cancel();
    }
}

impl SettingsListener for CoordinatorInner {
    fn on_settings_changed(&self, previous: &IsmSettings, current: &IsmSettings) {
        if !self.running.load(Ordering::SeqCst) || !self.is_leader() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("⚠️ COORDINATOR: Settings changed outside a runtime, background work not rescheduled");
            return;
        }

        match (previous.enabled, current.enabled) {
            (true, false) => {
                info!("⏸️ COORDINATOR: Lifecycle management disabled");
                self.cancel_background_tasks();
            }
            (false, true) => {
                info!("▶️ COORDINATOR: Lifecycle management enabled");
                self.on_enabled();
            }
            (true, true) if previous.sweep_period_millis != current.sweep_period_millis => {
                self.init_background_sweep();
            }
            _ => {}
        }
    }
}
