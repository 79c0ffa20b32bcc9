//! # State Store
//!
//! Persists schema snapshots, example queries and business rules so a restart
//! resumes from the same snapshot history and stores.

use super::sql;
use crate::{
    errors::SqlRagError,
    schema::SchemaSnapshot,
    stores::{BusinessRule, ExampleQuery},
};
use chrono::{DateTime, Utc};
use std::fmt::{self, Debug};
use tracing::{debug, info};
use turso::{Connection, Row, Value as TursoValue};

#[derive(Clone)]
pub struct StateStore {
    pub db: turso::Database,
}

impl Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

fn op_err(e: impl ToString) -> SqlRagError {
    SqlRagError::StorageOperationFailed(e.to_string())
}

fn text(row: &Row, idx: usize) -> Result<String, SqlRagError> {
    match row.get_value(idx).map_err(op_err)? {
        TursoValue::Text(s) => Ok(s),
        other => Err(op_err(format!("expected text in column {idx}, got {other:?}"))),
    }
}

fn optional_text(row: &Row, idx: usize) -> Result<Option<String>, SqlRagError> {
    match row.get_value(idx).map_err(op_err)? {
        TursoValue::Text(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn integer(row: &Row, idx: usize) -> Result<i64, SqlRagError> {
    match row.get_value(idx).map_err(op_err)? {
        TursoValue::Integer(i) => Ok(i),
        other => Err(op_err(format!("expected integer in column {idx}, got {other:?}"))),
    }
}

fn timestamp(value: &str) -> Result<DateTime<Utc>, SqlRagError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(op_err)
}

impl StateStore {
    pub async fn new(db_path: &str) -> Result<Self, SqlRagError> {
        let db = turso::Builder::new_local(db_path)
            .build()
            .await
            .map_err(|e| SqlRagError::StorageConnection(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SqlRagError::StorageConnection(e.to_string()))?;
        // Use `query` for PRAGMA statements that return a value.
        conn.query("PRAGMA journal_mode=WAL;", ())
            .await
            .map_err(|e| SqlRagError::StorageConnection(e.to_string()))?;

        let store = Self { db };
        store.initialize_schema().await?;
        info!(path = %db_path, "Opened state database.");
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, SqlRagError> {
        self.db
            .connect()
            .map_err(|e| SqlRagError::StorageConnection(e.to_string()))
    }

    /// Creates the state tables if they are missing. Idempotent.
    pub async fn initialize_schema(&self) -> Result<(), SqlRagError> {
        let conn = self.connect()?;
        for statement in sql::ALL_TABLE_CREATION_SQL {
            conn.execute(statement, ()).await.map_err(op_err)?;
        }
        Ok(())
    }

    /// Stores `snapshot`, marks it current and keeps only the newest `retained`
    /// versions (the current one is always kept). All in one transaction.
    pub async fn save_snapshot(
        &self,
        snapshot: &SchemaSnapshot,
        retained: usize,
    ) -> Result<(), SqlRagError> {
        let payload = serde_json::to_string(snapshot)?;
        let conn = self.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await.map_err(op_err)?;

        let result = async {
            conn.execute(
                sql::UPSERT_SNAPSHOT,
                turso::params![
                    snapshot.version as i64,
                    payload,
                    snapshot.captured_at.to_rfc3339()
                ],
            )
            .await
            .map_err(op_err)?;
            Self::mark_current(&conn, snapshot.version).await?;
            Self::prune(&conn, snapshot.version, retained).await
        }
        .await;

        match result {
            Ok(pruned) => {
                conn.execute("COMMIT", ()).await.map_err(op_err)?;
                debug!(version = snapshot.version, pruned, "Persisted schema snapshot.");
                Ok(())
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.map_err(op_err)?;
                Err(e)
            }
        }
    }

    /// Records which retained version is current after a rollback.
    pub async fn set_current_snapshot(&self, version: u64) -> Result<(), SqlRagError> {
        let conn = self.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await.map_err(op_err)?;
        match Self::mark_current(&conn, version).await {
            Ok(()) => {
                conn.execute("COMMIT", ()).await.map_err(op_err)?;
                Ok(())
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.map_err(op_err)?;
                Err(e)
            }
        }
    }

    async fn mark_current(conn: &Connection, version: u64) -> Result<(), SqlRagError> {
        conn.execute(sql::CLEAR_CURRENT_SNAPSHOT, ())
            .await
            .map_err(op_err)?;
        conn.execute(sql::MARK_CURRENT_SNAPSHOT, turso::params![version as i64])
            .await
            .map_err(op_err)?;
        Ok(())
    }

    async fn prune(conn: &Connection, current: u64, retained: usize) -> Result<usize, SqlRagError> {
        let mut versions = Vec::new();
        let mut rows = conn
            .query(sql::SELECT_SNAPSHOT_VERSIONS, ())
            .await
            .map_err(op_err)?;
        while let Some(row) = rows.next().await.map_err(op_err)? {
            versions.push(integer(&row, 0)? as u64);
        }

        let keep = retained.max(1);
        let stale: Vec<u64> = versions
            .into_iter()
            .filter(|v| *v != current)
            .skip(keep.saturating_sub(1))
            .collect();
        for version in &stale {
            conn.execute(sql::DELETE_SNAPSHOT, turso::params![*version as i64])
                .await
                .map_err(op_err)?;
        }
        Ok(stale.len())
    }

    /// All retained snapshots in ascending version order, and the current version.
    pub async fn load_snapshots(&self) -> Result<(Vec<SchemaSnapshot>, Option<u64>), SqlRagError> {
        let conn = self.connect()?;
        let mut rows = conn.query(sql::SELECT_SNAPSHOTS, ()).await.map_err(op_err)?;
        let mut snapshots = Vec::new();
        let mut current = None;
        while let Some(row) = rows.next().await.map_err(op_err)? {
            let snapshot: SchemaSnapshot = serde_json::from_str(&text(&row, 0)?)?;
            if integer(&row, 1)? == 1 {
                current = Some(snapshot.version);
            }
            snapshots.push(snapshot);
        }
        Ok((snapshots, current))
    }

    pub async fn save_example(&self, example: &ExampleQuery) -> Result<(), SqlRagError> {
        let conn = self.connect()?;
        conn.execute(
            sql::INSERT_EXAMPLE,
            turso::params![
                example.id.clone(),
                example.question.clone(),
                example.sql.clone(),
                serde_json::to_string(&example.tables)?,
                serde_json::to_string(&example.columns)?,
                example.snapshot_version as i64,
                example.deprecated as i64,
                example.created_at.to_rfc3339()
            ],
        )
        .await
        .map_err(op_err)?;
        Ok(())
    }

    pub async fn mark_examples_deprecated(&self, ids: &[String]) -> Result<(), SqlRagError> {
        let conn = self.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await.map_err(op_err)?;
        for id in ids {
            if let Err(e) = conn
                .execute(sql::DEPRECATE_EXAMPLE, turso::params![id.clone()])
                .await
            {
                conn.execute("ROLLBACK", ()).await.map_err(op_err)?;
                return Err(op_err(e));
            }
        }
        conn.execute("COMMIT", ()).await.map_err(op_err)?;
        Ok(())
    }

    pub async fn load_examples(&self) -> Result<Vec<ExampleQuery>, SqlRagError> {
        let conn = self.connect()?;
        let mut rows = conn.query(sql::SELECT_EXAMPLES, ()).await.map_err(op_err)?;
        let mut examples = Vec::new();
        while let Some(row) = rows.next().await.map_err(op_err)? {
            examples.push(ExampleQuery {
                id: text(&row, 0)?,
                question: text(&row, 1)?,
                sql: text(&row, 2)?,
                tables: serde_json::from_str(&text(&row, 3)?)?,
                columns: serde_json::from_str(&text(&row, 4)?)?,
                snapshot_version: integer(&row, 5)? as u64,
                deprecated: integer(&row, 6)? != 0,
                created_at: timestamp(&text(&row, 7)?)?,
            });
        }
        Ok(examples)
    }

    pub async fn save_rule(&self, rule: &BusinessRule) -> Result<(), SqlRagError> {
        let conn = self.connect()?;
        let fragment = rule
            .sql_fragment
            .clone()
            .map(TursoValue::Text)
            .unwrap_or(TursoValue::Null);
        let clarification = rule
            .clarification
            .clone()
            .map(TursoValue::Text)
            .unwrap_or(TursoValue::Null);
        conn.execute(
            sql::INSERT_RULE,
            vec![
                TursoValue::Text(rule.id.clone()),
                TursoValue::Text(rule.term.clone()),
                TursoValue::Text(serde_json::to_string(&rule.aliases)?),
                fragment,
                clarification,
                TursoValue::Text(rule.created_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(op_err)?;
        Ok(())
    }

    pub async fn load_rules(&self) -> Result<Vec<BusinessRule>, SqlRagError> {
        let conn = self.connect()?;
        let mut rows = conn.query(sql::SELECT_RULES, ()).await.map_err(op_err)?;
        let mut rules = Vec::new();
        while let Some(row) = rows.next().await.map_err(op_err)? {
            rules.push(BusinessRule {
                id: text(&row, 0)?,
                term: text(&row, 1)?,
                aliases: serde_json::from_str(&text(&row, 2)?)?,
                sql_fragment: optional_text(&row, 3)?,
                clarification: optional_text(&row, 4)?,
                created_at: timestamp(&text(&row, 5)?)?,
            });
        }
        Ok(rules)
    }
}
