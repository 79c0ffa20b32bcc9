use crate::{errors::SqlRagError, schema::SchemaMetadata, validation::ValidatedSql};
use async_trait::async_trait;
use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Rows returned by a read-only query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    pub row_count: usize,
    /// More rows existed than the cap allowed.
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// One-line description kept in conversation history.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} row{} ({})",
            self.row_count,
            if self.row_count == 1 { "" } else { "s" },
            self.columns.join(", ")
        );
        if self.truncated {
            summary.push_str(", truncated");
        }
        summary
    }
}

/// The relational database questions are answered against.
///
/// Execution only accepts a [`ValidatedSql`], so unvalidated text can never
/// reach the database through this interface.
#[async_trait]
pub trait Database: Send + Sync + DynClone + Debug {
    /// Returns the name of the backend (e.g. "SQLite").
    fn name(&self) -> &str;

    /// Tables, columns, samples, statistics and foreign keys as they are now.
    async fn fetch_schema_metadata(&self) -> Result<SchemaMetadata, SqlRagError>;

    /// Runs the statement and returns at most `row_cap` rows.
    async fn execute_readonly(
        &self,
        sql: &ValidatedSql,
        row_cap: usize,
    ) -> Result<QueryResult, SqlRagError>;
}

dyn_clone::clone_trait_object!(Database);
