pub mod sqlite;
pub mod storage;

pub use sqlite::{SqliteDatabase, StateStore};
pub use storage::{Database, QueryResult};
