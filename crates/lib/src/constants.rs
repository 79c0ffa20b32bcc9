//! # Shared Constants
//!
//! Defaults shared by the library, the server configuration layer and the CLI.

/// The root directory for all local databases.
pub const DB_DIR: &str = "db";

/// Default path of the database that user questions are answered against.
pub const DEFAULT_TARGET_DB_FILE: &str = "db/target.db";

/// Default path of the database that persists snapshots, examples and rules.
pub const DEFAULT_STATE_DB_FILE: &str = "db/sqlrag_state.db";

/// Sentinel the model answers with when a question cannot be expressed in SQL.
pub const NO_SQL_SENTINEL: &str = "NO_SQL";

/// Confidence reported when the backend gives neither log-probabilities nor a self-rating.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Rough characters-per-token ratio used for budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_ROW_CAP: u64 = 1000;
pub const DEFAULT_MAX_TURNS: usize = 5;
pub const DEFAULT_TOKEN_BUDGET: usize = 2000;
pub const DEFAULT_RETAINED_SNAPSHOTS: usize = 10;
