use crate::{
    errors::SqlRagError,
    providers::db::storage::{Database, QueryResult},
    schema::{ColumnSchema, Relationship, SchemaMetadata, TableSchema},
    validation::ValidatedSql,
};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::HashSet,
    fmt::{self, Debug},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use turso::{Connection, Value as TursoValue};

mod sql;
mod state;

pub use state::StateStore;

/// Distinct non-null values shown per column.
const SAMPLE_VALUES: usize = 3;
/// Rows scanned per column to estimate the distinct ratio.
const STATS_SCAN_ROWS: usize = 1000;

/// The queried database, opened through Turso.
///
/// Cloning shares the underlying database, so an in-memory instance can be
/// seeded through one clone and queried through another.
#[derive(Clone)]
pub struct SqliteDatabase {
    pub db: turso::Database,
    query_timeout: Duration,
}

impl SqliteDatabase {
    /// Opens `db_path` (or ":memory:").
    pub async fn new(db_path: &str, query_timeout: Duration) -> Result<Self, SqlRagError> {
        let db = turso::Builder::new_local(db_path)
            .build()
            .await
            .map_err(|e| SqlRagError::StorageConnection(e.to_string()))?;
        info!(path = %db_path, "Opened target database.");
        Ok(Self { db, query_timeout })
    }

    fn connect(&self) -> Result<Connection, SqlRagError> {
        self.db
            .connect()
            .map_err(|e| SqlRagError::StorageConnection(e.to_string()))
    }

    /// Runs a `;`-separated script. Used to seed test and demo databases.
    pub async fn initialize_with_data(&self, init_sql: &str) -> Result<(), SqlRagError> {
        let conn = self.connect()?;
        for statement in init_sql.split(';').filter(|s| !s.trim().is_empty()) {
            conn.execute(statement, ())
                .await
                .map_err(|e| SqlRagError::StorageOperationFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn list_tables(&self, conn: &Connection) -> Result<Vec<String>, SqlRagError> {
        let mut rows = conn
            .query(sql::LIST_TABLES, ())
            .await
            .map_err(|e| SqlRagError::StorageOperationFailed(e.to_string()))?;
        let mut tables = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SqlRagError::StorageOperationFailed(e.to_string()))?
        {
            if let Ok(TursoValue::Text(name)) = row.get_value(0) {
                tables.push(name);
            }
        }
        Ok(tables)
    }

    async fn table_columns(
        &self,
        conn: &Connection,
        table: &str,
    ) -> Result<Vec<ColumnSchema>, SqlRagError> {
        let mut rows = conn
            .query(&sql::table_info(table), ())
            .await
            .map_err(|e| SqlRagError::StorageOperationFailed(e.to_string()))?;

        let mut columns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SqlRagError::StorageOperationFailed(e.to_string()))?
        {
            // PRAGMA table_info columns: cid, name, type, notnull, dflt_value, pk
            let Ok(TursoValue::Text(name)) = row.get_value(1) else {
                continue;
            };
            let data_type = match row.get_value(2) {
                Ok(TursoValue::Text(t)) if !t.is_empty() => t.to_uppercase(),
                _ => "ANY".to_string(),
            };
            let not_null = matches!(row.get_value(3), Ok(TursoValue::Integer(1)));
            let primary_key = matches!(row.get_value(5), Ok(TursoValue::Integer(pk)) if pk > 0);
            columns.push(ColumnSchema {
                name,
                data_type,
                nullable: !not_null && !primary_key,
                primary_key,
                sample_values: Vec::new(),
                distinct_ratio: None,
            });
        }
        Ok(columns)
    }

    /// Foreign keys of one table. Backends without the pragma report none.
    async fn foreign_keys(&self, conn: &Connection, table: &str) -> Vec<Relationship> {
        let mut relationships = Vec::new();
        let mut rows = match conn.query(&sql::foreign_key_list(table), ()).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!(table, error = %e, "Foreign key introspection unavailable");
                return relationships;
            }
        };
        // PRAGMA foreign_key_list columns: id, seq, table, from, to, ...
        while let Ok(Some(row)) = rows.next().await {
            if let (Ok(TursoValue::Text(to_table)), Ok(TursoValue::Text(from_column))) =
                (row.get_value(2), row.get_value(3))
            {
                let to_column = match row.get_value(4) {
                    Ok(TursoValue::Text(c)) => c,
                    _ => "rowid".to_string(),
                };
                relationships.push(Relationship {
                    from_table: table.to_string(),
                    from_column,
                    to_table,
                    to_column,
                });
            }
        }
        relationships
    }

    async fn row_count(&self, conn: &Connection, table: &str) -> Option<u64> {
        let mut rows = conn.query(&sql::count_rows(table), ()).await.ok()?;
        let row = rows.next().await.ok()??;
        match row.get_value(0).ok()? {
            TursoValue::Integer(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    async fn sample_values(&self, conn: &Connection, table: &str, column: &str) -> Vec<String> {
        let mut samples = Vec::new();
        let Ok(mut rows) = conn
            .query(&sql::sample_values(table, column, SAMPLE_VALUES), ())
            .await
        else {
            return samples;
        };
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(value) = row.get_value(0) {
                match value {
                    TursoValue::Null | TursoValue::Blob(_) => {}
                    TursoValue::Integer(i) => samples.push(i.to_string()),
                    TursoValue::Real(f) => samples.push(f.to_string()),
                    TursoValue::Text(s) => samples.push(s),
                }
            }
        }
        samples
    }

    /// Share of distinct values among the first rows of a column.
    async fn distinct_ratio(&self, conn: &Connection, table: &str, column: &str) -> Option<f64> {
        let mut rows = conn
            .query(&sql::column_scan(table, column, STATS_SCAN_ROWS), ())
            .await
            .ok()?;
        let mut seen = HashSet::new();
        let mut total = 0usize;
        while let Ok(Some(row)) = rows.next().await {
            total += 1;
            if let Ok(value) = row.get_value(0) {
                seen.insert(value_key(&value));
            }
        }
        (total > 0).then(|| seen.len() as f64 / total as f64)
    }
}

fn value_key(value: &TursoValue) -> String {
    match value {
        TursoValue::Null => "null".to_string(),
        TursoValue::Integer(i) => format!("i:{i}"),
        TursoValue::Real(f) => format!("r:{f}"),
        TursoValue::Text(s) => format!("t:{s}"),
        TursoValue::Blob(b) => format!("b:{}", b.len()),
    }
}

/// Converts a Turso value to a serde_json::Value.
fn turso_value_to_json(v: TursoValue) -> Value {
    match v {
        TursoValue::Null => Value::Null,
        TursoValue::Integer(i) => Value::Number(i.into()),
        TursoValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        TursoValue::Text(s) => Value::String(s),
        TursoValue::Blob(_) => Value::String("<blob>".to_string()),
    }
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn name(&self) -> &str {
        "SQLite"
    }

    async fn fetch_schema_metadata(&self) -> Result<SchemaMetadata, SqlRagError> {
        let conn = self.connect()?;
        let mut metadata = SchemaMetadata::default();

        for table in self.list_tables(&conn).await? {
            let mut columns = self.table_columns(&conn, &table).await?;
            for column in &mut columns {
                column.sample_values = self.sample_values(&conn, &table, &column.name).await;
                column.distinct_ratio = self.distinct_ratio(&conn, &table, &column.name).await;
            }
            let row_count = self.row_count(&conn, &table).await;
            if row_count.is_none() {
                warn!(table = %table, "Could not count rows; complexity checks will treat the table as small.");
            }
            metadata
                .relationships
                .extend(self.foreign_keys(&conn, &table).await);
            metadata.tables.push(TableSchema {
                name: table,
                columns,
                row_count,
                description: None,
            });
        }

        info!(
            tables = metadata.tables.len(),
            relationships = metadata.relationships.len(),
            "Fetched schema metadata."
        );
        Ok(metadata)
    }

    async fn execute_readonly(
        &self,
        sql: &ValidatedSql,
        row_cap: usize,
    ) -> Result<QueryResult, SqlRagError> {
        debug!(query = %sql.sql(), "--> Executing SQLite query");
        let started = Instant::now();
        let conn = self.connect()?;

        let read = async {
            let mut stmt = conn
                .prepare(sql.sql())
                .await
                .map_err(|e| SqlRagError::Execution(e.to_string()))?;
            let columns: Vec<String> = stmt
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let mut rows = stmt
                .query(())
                .await
                .map_err(|e| SqlRagError::Execution(e.to_string()))?;

            let mut out = Vec::new();
            let mut truncated = false;
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| SqlRagError::Execution(e.to_string()))?
            {
                if out.len() == row_cap {
                    truncated = true;
                    break;
                }
                let mut map = serde_json::Map::new();
                for (i, name) in columns.iter().enumerate() {
                    let value = row
                        .get_value(i)
                        .map_err(|e| SqlRagError::Execution(e.to_string()))?;
                    map.insert(name.clone(), turso_value_to_json(value));
                }
                out.push(map);
            }
            Ok::<_, SqlRagError>((columns, out, truncated))
        };

        let (columns, rows, truncated) = tokio::time::timeout(self.query_timeout, read)
            .await
            .map_err(|_| {
                SqlRagError::Execution(format!(
                    "query exceeded the {}s timeout",
                    self.query_timeout.as_secs()
                ))
            })??;

        let result = QueryResult {
            row_count: rows.len(),
            columns,
            rows,
            truncated,
            execution_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            rows = result.row_count,
            truncated = result.truncated,
            elapsed_ms = result.execution_time_ms,
            "Query executed."
        );
        Ok(result)
    }
}
