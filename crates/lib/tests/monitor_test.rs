mod common;

use crate::common::{embedder, setup_tracing};
use async_trait::async_trait;
use sqlrag::providers::ai::{Embedder, HashingEmbedder};
use sqlrag::monitor::SchemaMonitor;
use sqlrag::providers::db::StateStore;
use sqlrag::schema::index::SchemaIndex;
use sqlrag::schema::SnapshotStore;
use sqlrag::stores::ExampleStore;
use sqlrag::types::ValidationConfig;
use sqlrag::validation::Validator;
use sqlrag::SqlRagError;
use sqlrag_test_utils::TestSetup;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    setup: TestSetup,
    snapshots: Arc<SnapshotStore>,
    index: Arc<SchemaIndex>,
    examples: Arc<ExampleStore>,
    monitor: Arc<SchemaMonitor>,
}

async fn harness() -> Harness {
    let setup = TestSetup::new().await.unwrap();
    let snapshots = Arc::new(SnapshotStore::new(5));
    let index = Arc::new(SchemaIndex::new(embedder()));
    let examples = Arc::new(ExampleStore::new(embedder()));
    let monitor = Arc::new(SchemaMonitor::new(
        Box::new(setup.db.clone()),
        snapshots.clone(),
        index.clone(),
        examples.clone(),
        5,
    ));
    Harness {
        setup,
        snapshots,
        index,
        examples,
        monitor,
    }
}

#[tokio::test]
async fn bootstrap_captures_first_snapshot() {
    setup_tracing();
    let h = harness().await;
    assert!(h.monitor.check_for_drift().await.unwrap().has_drift());

    let version = h.monitor.bootstrap().await.unwrap();
    assert_eq!(version, 1);
    assert_eq!(h.index.snapshot().unwrap().version, 1);
    assert!(!h.monitor.check_for_drift().await.unwrap().has_drift());
}

#[tokio::test]
async fn detects_added_and_removed_tables() {
    setup_tracing();
    let h = harness().await;
    h.monitor.bootstrap().await.unwrap();

    h.setup
        .execute("CREATE TABLE wards (ward_id INTEGER PRIMARY KEY, label TEXT)")
        .await
        .unwrap();
    h.setup.execute("DROP TABLE patients").await.unwrap();

    let report = h.monitor.check_for_drift().await.unwrap();
    assert_eq!(report.baseline_version, Some(1));
    assert_eq!(report.added, vec!["wards"]);
    assert_eq!(report.removed, vec!["patients"]);
    assert!(report.renamed_candidates.is_empty());
}

#[tokio::test]
async fn rename_is_only_a_candidate() {
    setup_tracing();
    let h = harness().await;
    h.monitor.bootstrap().await.unwrap();

    h.setup
        .execute(
            "CREATE TABLE care_units (unit_id INTEGER PRIMARY KEY, name TEXT NOT NULL, unit_type TEXT NOT NULL); DROP TABLE units",
        )
        .await
        .unwrap();

    let outcome = h.monitor.refresh().await.unwrap();
    assert_eq!(outcome.version, 2);
    let candidate = &outcome.report.renamed_candidates[0];
    assert_eq!((candidate.from.as_str(), candidate.to.as_str()), ("units", "care_units"));
    assert!(outcome.report.removed.contains(&"units".to_string()));
    assert!(outcome.report.added.contains(&"care_units".to_string()));

    let current = h.snapshots.current().unwrap();
    assert!(current.table("units").is_none());
    assert!(current.table("care_units").is_some());
}

#[tokio::test]
async fn refresh_reindexes_and_deprecates_examples() {
    setup_tracing();
    let h = harness().await;
    h.monitor.bootstrap().await.unwrap();
    let validator = Validator::new(ValidationConfig::default());
    let snapshot = h.snapshots.current().unwrap();
    let stale = h
        .examples
        .add("patient names", "SELECT name FROM patients", &validator, &snapshot)
        .await
        .unwrap();
    let fresh = h
        .examples
        .add("unit names", "SELECT name FROM units", &validator, &snapshot)
        .await
        .unwrap();

    h.setup.execute("DROP TABLE patients").await.unwrap();
    let outcome = h.monitor.refresh().await.unwrap();

    assert_eq!(outcome.deprecated_examples, vec![stale.id.clone()]);
    assert!(h.examples.get(&stale.id).unwrap().deprecated);
    assert!(!h.examples.get(&fresh.id).unwrap().deprecated);

    let retrieval = h.index.retrieve("patients", 10).await.unwrap();
    assert_eq!(retrieval.snapshot.version, 2);
    assert!(retrieval.chunks.iter().all(|c| c.chunk.source != "patients"));
}

#[tokio::test]
async fn rollback_restores_previous_snapshot() {
    setup_tracing();
    let h = harness().await;
    h.monitor.bootstrap().await.unwrap();
    h.setup.execute("DROP TABLE patients").await.unwrap();
    h.monitor.refresh().await.unwrap();

    let restored = h.monitor.rollback_to(1).await.unwrap();
    assert_eq!(restored.version, 1);
    assert_eq!(h.snapshots.current().unwrap().version, 1);
    assert_eq!(h.index.snapshot().unwrap().version, 1);
    assert_eq!(h.snapshots.versions().len(), 2);

    let err = h.monitor.rollback_to(42).await.unwrap_err();
    assert!(matches!(err, SqlRagError::SnapshotNotFound(42)));
    assert_eq!(h.snapshots.current().unwrap().version, 1);
}

#[tokio::test]
async fn refresh_persists_snapshots() {
    setup_tracing();
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(
        StateStore::new(dir.path().join("state.db").to_str().unwrap())
            .await
            .unwrap(),
    );
    let setup = TestSetup::new().await.unwrap();
    let monitor = SchemaMonitor::new(
        Box::new(setup.db.clone()),
        Arc::new(SnapshotStore::new(5)),
        Arc::new(SchemaIndex::new(embedder())),
        Arc::new(ExampleStore::new(embedder())),
        5,
    )
    .with_persistence(state.clone());

    monitor.bootstrap().await.unwrap();
    setup.execute("DROP TABLE units").await.unwrap();
    monitor.refresh().await.unwrap();
    monitor.rollback_to(1).await.unwrap();

    let (snapshots, current) = state.load_snapshots().await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(current, Some(1));
}

#[tokio::test]
async fn scheduled_check_refreshes_on_drift() {
    setup_tracing();
    let h = harness().await;
    h.monitor.bootstrap().await.unwrap();
    let handle = h.monitor.clone().spawn(Duration::from_millis(20));

    h.setup
        .execute("CREATE TABLE wards (ward_id INTEGER PRIMARY KEY, label TEXT)")
        .await
        .unwrap();

    let mut refreshed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if h.snapshots.current().map(|s| s.version) == Some(2) {
            refreshed = true;
            break;
        }
    }
    assert!(refreshed, "monitor did not pick up the new table");
    assert!(!handle.is_finished());
}

/// Hashes like the default embedder until told to fail.
#[derive(Clone, Debug)]
struct SwitchableEmbedder {
    inner: HashingEmbedder,
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl Embedder for SwitchableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SqlRagError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SqlRagError::Embedding("embedding service down".to_string()));
        }
        self.inner.embed(text).await
    }
}

#[tokio::test]
async fn failed_refresh_keeps_current_snapshot_and_index() {
    setup_tracing();
    let setup = TestSetup::new().await.unwrap();
    let failing = Arc::new(AtomicBool::new(false));
    let snapshots = Arc::new(SnapshotStore::new(5));
    let index = Arc::new(SchemaIndex::new(Box::new(SwitchableEmbedder {
        inner: HashingEmbedder::new(256),
        failing: failing.clone(),
    })));
    let monitor = SchemaMonitor::new(
        Box::new(setup.db.clone()),
        snapshots.clone(),
        index.clone(),
        Arc::new(ExampleStore::new(embedder())),
        5,
    );
    monitor.bootstrap().await.unwrap();

    setup
        .execute("CREATE TABLE wards (ward_id INTEGER PRIMARY KEY, label TEXT)")
        .await
        .unwrap();
    failing.store(true, Ordering::SeqCst);
    let err = monitor.refresh().await.unwrap_err();
    assert!(matches!(err, SqlRagError::Embedding(_)));

    assert_eq!(snapshots.current().unwrap().version, 1);
    assert_eq!(snapshots.versions().len(), 1);
    assert_eq!(index.snapshot().unwrap().version, 1);
    let report = monitor.check_for_drift().await.unwrap();
    assert_eq!(report.baseline_version, Some(1));
    assert_eq!(report.added, vec!["wards"]);

    failing.store(false, Ordering::SeqCst);
    let outcome = monitor.refresh().await.unwrap();
    assert_eq!(outcome.version, 2);
    assert_eq!(index.snapshot().unwrap().version, 2);
}
