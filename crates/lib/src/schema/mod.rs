//! # Schema Snapshots
//!
//! A `SchemaSnapshot` is one immutable capture of the target database's structure.
//! Snapshots are never edited: a refresh publishes a new version and the previous
//! ones stay retained for rollback and for re-validating historical queries.

pub mod drift;
pub mod index;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::errors::SqlRagError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub sample_values: Vec<String>,
    /// Distinct values divided by sampled rows, when it could be measured.
    #[serde(default)]
    pub distinct_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A foreign-key-like link between two columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// Raw structure as reported by the live database, before it is versioned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub tables: Vec<TableSchema>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub version: u64,
    pub tables: Vec<TableSchema>,
    pub relationships: Vec<Relationship>,
    pub captured_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(version: u64, metadata: SchemaMetadata) -> Self {
        Self {
            version,
            tables: metadata.tables,
            relationships: metadata.relationships,
            captured_at: Utc::now(),
        }
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .map(|t| t.column(column).is_some())
            .unwrap_or(false)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Relationships that touch the given table on either side.
    pub fn relationships_of<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = &'a Relationship> {
        self.relationships.iter().filter(move |r| {
            r.from_table.eq_ignore_ascii_case(table) || r.to_table.eq_ignore_ascii_case(table)
        })
    }

    pub fn metadata(&self) -> SchemaMetadata {
        SchemaMetadata {
            tables: self.tables.clone(),
            relationships: self.relationships.clone(),
        }
    }
}

/// Summary row for listing retained versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub version: u64,
    pub captured_at: DateTime<Utc>,
    pub table_count: usize,
    pub current: bool,
}

#[derive(Debug, Default)]
struct SnapshotHistory {
    /// Ascending by version.
    snapshots: Vec<Arc<SchemaSnapshot>>,
    current: Option<u64>,
}

/// The current snapshot plus a bounded number of previous ones.
///
/// Readers load the whole history with one atomic pointer read. Writers are
/// serialized and swap in a fully built history, so a reader never sees a
/// half-applied publish.
#[derive(Debug)]
pub struct SnapshotStore {
    history: ArcSwap<SnapshotHistory>,
    writer: Mutex<()>,
    retained: usize,
}

impl SnapshotStore {
    pub fn new(retained: usize) -> Self {
        Self {
            history: ArcSwap::from_pointee(SnapshotHistory::default()),
            writer: Mutex::new(()),
            retained: retained.max(1),
        }
    }

    pub fn current(&self) -> Option<Arc<SchemaSnapshot>> {
        let history = self.history.load();
        let version = history.current?;
        history
            .snapshots
            .iter()
            .find(|s| s.version == version)
            .cloned()
    }

    pub fn get(&self, version: u64) -> Option<Arc<SchemaSnapshot>> {
        self.history
            .load()
            .snapshots
            .iter()
            .find(|s| s.version == version)
            .cloned()
    }

    pub fn versions(&self) -> Vec<SnapshotInfo> {
        let history = self.history.load();
        history
            .snapshots
            .iter()
            .map(|s| SnapshotInfo {
                version: s.version,
                captured_at: s.captured_at,
                table_count: s.tables.len(),
                current: history.current == Some(s.version),
            })
            .collect()
    }

    /// Builds the next version from `metadata` without recording it.
    ///
    /// Callers serialize `prepare` and `commit`; the monitor does so with its
    /// refresh lock.
    pub fn prepare(&self, metadata: SchemaMetadata) -> Arc<SchemaSnapshot> {
        let next_version = self
            .history
            .load()
            .snapshots
            .last()
            .map(|s| s.version + 1)
            .unwrap_or(1);
        Arc::new(SchemaSnapshot::new(next_version, metadata))
    }

    /// Records a prepared snapshot and makes it current, pruning the oldest
    /// retained versions.
    pub fn commit(&self, snapshot: Arc<SchemaSnapshot>) {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let old = self.history.load_full();
        let version = snapshot.version;

        let mut snapshots: Vec<Arc<SchemaSnapshot>> = old
            .snapshots
            .iter()
            .filter(|s| s.version != version)
            .cloned()
            .collect();
        snapshots.push(snapshot.clone());
        snapshots.sort_by_key(|s| s.version);
        Self::prune(&mut snapshots, Some(version), self.retained);
        self.history.store(Arc::new(SnapshotHistory {
            snapshots,
            current: Some(version),
        }));

        info!(
            version,
            tables = snapshot.tables.len(),
            "Published schema snapshot."
        );
    }

    /// Restores persisted snapshots at start-up.
    ///
    /// `current` wins when it is among them; otherwise the highest version becomes current.
    pub fn restore(&self, mut snapshots: Vec<SchemaSnapshot>, current: Option<u64>) {
        snapshots.sort_by_key(|s| s.version);
        let mut snapshots: Vec<Arc<SchemaSnapshot>> =
            snapshots.into_iter().map(Arc::new).collect();
        let current = current
            .filter(|v| snapshots.iter().any(|s| s.version == *v))
            .or_else(|| snapshots.last().map(|s| s.version));
        Self::prune(&mut snapshots, current, self.retained);
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.history.store(Arc::new(SnapshotHistory { snapshots, current }));
    }

    /// Makes a retained older version current again. History is kept intact.
    pub fn rollback_to(&self, version: u64) -> Result<Arc<SchemaSnapshot>, SqlRagError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let old = self.history.load_full();
        let target = old
            .snapshots
            .iter()
            .find(|s| s.version == version)
            .cloned()
            .ok_or(SqlRagError::SnapshotNotFound(version))?;
        self.history.store(Arc::new(SnapshotHistory {
            snapshots: old.snapshots.clone(),
            current: Some(version),
        }));
        info!(version, "Rolled back to schema snapshot.");
        Ok(target)
    }

    fn prune(snapshots: &mut Vec<Arc<SchemaSnapshot>>, current: Option<u64>, retained: usize) {
        while snapshots.len() > retained {
            match snapshots.iter().position(|s| Some(s.version) != current) {
                Some(idx) => {
                    snapshots.remove(idx);
                }
                None => break,
            }
        }
    }
}
