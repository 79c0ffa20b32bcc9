//! # Schema Change Monitor
//!
//! Compares the live database structure with the current snapshot. A refresh
//! builds the next snapshot and its index, deprecates examples that read
//! removed objects, persists the snapshot, and only then makes the new
//! snapshot and index visible. A failure before that last step leaves the
//! current snapshot and index untouched. Rename candidates are reported and
//! never applied.

use crate::{
    errors::SqlRagError,
    providers::db::{Database, StateStore},
    schema::{
        drift::{diff_schemas, DriftReport},
        index::SchemaIndex,
        SchemaMetadata, SchemaSnapshot, SnapshotStore,
    },
    stores::ExampleStore,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Result of one refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub report: DriftReport,
    pub version: u64,
    pub deprecated_examples: Vec<String>,
}

#[derive(Debug)]
pub struct SchemaMonitor {
    database: Box<dyn Database>,
    snapshots: Arc<SnapshotStore>,
    index: Arc<SchemaIndex>,
    examples: Arc<ExampleStore>,
    state: Option<Arc<StateStore>>,
    retained: usize,
    /// Serializes refreshes and rollbacks.
    refresh_lock: Mutex<()>,
}

/// Stops the periodic check when dropped.
#[derive(Debug)]
pub struct MonitorHandle(JoinHandle<()>);

impl MonitorHandle {
    pub fn abort(&self) {
        self.0.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl SchemaMonitor {
    pub fn new(
        database: Box<dyn Database>,
        snapshots: Arc<SnapshotStore>,
        index: Arc<SchemaIndex>,
        examples: Arc<ExampleStore>,
        retained: usize,
    ) -> Self {
        Self {
            database,
            snapshots,
            index,
            examples,
            state: None,
            retained,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_persistence(mut self, state: Arc<StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    fn baseline(&self) -> (Option<u64>, SchemaMetadata) {
        match self.snapshots.current() {
            Some(snapshot) => (Some(snapshot.version), snapshot.metadata()),
            None => (None, SchemaMetadata::default()),
        }
    }

    /// Diffs the live schema against the current snapshot. With no snapshot
    /// yet, every live table is reported as added.
    pub async fn check_for_drift(&self) -> Result<DriftReport, SqlRagError> {
        let live = self.database.fetch_schema_metadata().await?;
        let (version, baseline) = self.baseline();
        let mut report = diff_schemas(&baseline, &live);
        report.baseline_version = version;
        Ok(report)
    }

    /// Captures the live schema as a new snapshot and makes it current.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SqlRagError> {
        let _guard = self.refresh_lock.lock().await;

        let live = self.database.fetch_schema_metadata().await?;
        let (baseline_version, baseline) = self.baseline();
        let mut report = diff_schemas(&baseline, &live);
        report.baseline_version = baseline_version;

        let snapshot = self.snapshots.prepare(live);
        let generation = self.index.build(snapshot.clone()).await?;

        // Deprecations hold against the live schema whether or not the rest
        // of the refresh succeeds.
        let deprecated_examples = self
            .examples
            .deprecate_referencing(&report.removed, &report.removed_column_pairs())
            .await?;
        if let Some(state) = &self.state {
            state.save_snapshot(&snapshot, self.retained).await?;
        }

        self.snapshots.commit(snapshot.clone());
        self.index.install(generation);

        if report.has_drift() && baseline_version.is_some() {
            warn!(
                from_version = ?baseline_version,
                to_version = snapshot.version,
                added = report.added.len(),
                removed = report.removed.len(),
                renamed_candidates = ?report.renamed_candidates,
                added_columns = report.added_columns.len(),
                removed_columns = report.removed_columns.len(),
                type_changes = report.type_changes.len(),
                deprecated_examples = deprecated_examples.len(),
                "Schema drift detected; index rebuilt."
            );
        } else {
            info!(version = snapshot.version, "Schema snapshot refreshed.");
        }

        Ok(RefreshOutcome {
            report,
            version: snapshot.version,
            deprecated_examples,
        })
    }

    /// Makes a retained snapshot current again and reindexes it.
    pub async fn rollback_to(&self, version: u64) -> Result<Arc<SchemaSnapshot>, SqlRagError> {
        let _guard = self.refresh_lock.lock().await;
        let previous = self.snapshots.current().map(|s| s.version);
        let target = self
            .snapshots
            .get(version)
            .ok_or(SqlRagError::SnapshotNotFound(version))?;
        let generation = self.index.build(target).await?;
        if let Some(state) = &self.state {
            state.set_current_snapshot(version).await?;
        }
        let snapshot = self.snapshots.rollback_to(version)?;
        self.index.install(generation);
        warn!(version, from_version = ?previous, "Schema snapshot rolled back.");
        Ok(snapshot)
    }

    /// Indexes the restored current snapshot, or captures the first one.
    pub async fn bootstrap(&self) -> Result<u64, SqlRagError> {
        match self.snapshots.current() {
            Some(snapshot) => {
                let version = snapshot.version;
                self.index.index(snapshot).await?;
                Ok(version)
            }
            None => Ok(self.refresh().await?.version),
        }
    }

    /// Checks for drift every `interval` and refreshes when any is found.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> MonitorHandle {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; start-up already indexed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.check_for_drift().await {
                    Ok(report) if report.has_drift() => {
                        if let Err(e) = self.refresh().await {
                            error!("Scheduled schema refresh failed: {e}");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!("Scheduled drift check failed: {e}"),
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "Schema monitor started.");
        MonitorHandle(handle)
    }
}
