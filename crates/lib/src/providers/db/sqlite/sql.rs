//! # State Database SQL
//!
//! Table definitions and statements for the pipeline's own persisted state.
//! The queried database is never written to; these live in a separate file.

pub const CREATE_SCHEMA_SNAPSHOTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS schema_snapshots (
        version INTEGER PRIMARY KEY,
        payload TEXT NOT NULL,
        captured_at TEXT NOT NULL,
        is_current INTEGER NOT NULL DEFAULT 0
    );";

pub const CREATE_EXAMPLE_QUERIES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS example_queries (
        id TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        sql_text TEXT NOT NULL,
        tables_json TEXT NOT NULL,
        columns_json TEXT NOT NULL,
        snapshot_version INTEGER NOT NULL,
        deprecated INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );";

pub const CREATE_BUSINESS_RULES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS business_rules (
        id TEXT PRIMARY KEY,
        term TEXT NOT NULL,
        aliases_json TEXT NOT NULL,
        sql_fragment TEXT,
        clarification TEXT,
        created_at TEXT NOT NULL
    );";

pub const ALL_TABLE_CREATION_SQL: &[&str] = &[
    CREATE_SCHEMA_SNAPSHOTS_TABLE,
    CREATE_EXAMPLE_QUERIES_TABLE,
    CREATE_BUSINESS_RULES_TABLE,
];

pub const UPSERT_SNAPSHOT: &str = "
    INSERT INTO schema_snapshots (version, payload, captured_at, is_current)
    VALUES (?, ?, ?, 0)
    ON CONFLICT(version) DO UPDATE SET payload = excluded.payload, captured_at = excluded.captured_at;";

pub const CLEAR_CURRENT_SNAPSHOT: &str = "UPDATE schema_snapshots SET is_current = 0;";

pub const MARK_CURRENT_SNAPSHOT: &str = "UPDATE schema_snapshots SET is_current = 1 WHERE version = ?;";

pub const SELECT_SNAPSHOTS: &str =
    "SELECT payload, is_current FROM schema_snapshots ORDER BY version ASC;";

pub const SELECT_SNAPSHOT_VERSIONS: &str =
    "SELECT version, is_current FROM schema_snapshots ORDER BY version DESC;";

pub const DELETE_SNAPSHOT: &str = "DELETE FROM schema_snapshots WHERE version = ?;";

pub const INSERT_EXAMPLE: &str = "
    INSERT INTO example_queries
        (id, question, sql_text, tables_json, columns_json, snapshot_version, deprecated, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET deprecated = excluded.deprecated;";

pub const DEPRECATE_EXAMPLE: &str = "UPDATE example_queries SET deprecated = 1 WHERE id = ?;";

pub const SELECT_EXAMPLES: &str = "
    SELECT id, question, sql_text, tables_json, columns_json, snapshot_version, deprecated, created_at
    FROM example_queries ORDER BY created_at ASC;";

pub const INSERT_RULE: &str = "
    INSERT INTO business_rules (id, term, aliases_json, sql_fragment, clarification, created_at)
    VALUES (?, ?, ?, ?, ?, ?);";

pub const SELECT_RULES: &str = "
    SELECT id, term, aliases_json, sql_fragment, clarification, created_at
    FROM business_rules ORDER BY created_at ASC;";

/// Quotes an identifier for interpolation into introspection queries.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub const LIST_TABLES: &str = "
    SELECT name FROM sqlite_master
    WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
    ORDER BY name;";

pub fn table_info(table: &str) -> String {
    format!("PRAGMA table_info({});", quote_ident(table))
}

pub fn foreign_key_list(table: &str) -> String {
    format!("PRAGMA foreign_key_list({});", quote_ident(table))
}

pub fn count_rows(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {};", quote_ident(table))
}

pub fn sample_values(table: &str, column: &str, limit: usize) -> String {
    let column = quote_ident(column);
    format!(
        "SELECT DISTINCT {column} FROM {} WHERE {column} IS NOT NULL LIMIT {limit};",
        quote_ident(table)
    )
}

pub fn column_scan(table: &str, column: &str, limit: usize) -> String {
    format!(
        "SELECT {} FROM {} LIMIT {limit};",
        quote_ident(column),
        quote_ident(table)
    )
}
