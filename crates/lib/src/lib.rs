//! # SQL RAG Pipeline
//!
//! Turns natural-language questions into validated, read-only SQL. Schema,
//! example queries and business rules are retrieved into a bounded context,
//! a language model proposes one statement, and a fixed validation pipeline
//! decides whether it may run. Only statements carrying a passing verdict
//! ever reach the database.

pub mod constants;
pub mod context;
pub mod conversation;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod monitor;
pub mod prompts;
pub mod providers;
pub mod schema;
pub mod stores;
pub mod types;
pub mod validation;

pub use context::{Context, ContextAssembler, RejectionFeedback};
pub use conversation::{
    resolve_reference, Conversation, ConversationManager, ConversationTurn, ResolvedQuestion,
};
pub use errors::{ErrorKind, SqlRagError};
pub use executor::{
    AskResponse, AskStatus, Rejection, SqlRagExecutor, SqlRagExecutorBuilder, StepTiming,
};
pub use generator::{Candidate, ConfidenceSource, SqlGenerator};
pub use monitor::{MonitorHandle, RefreshOutcome, SchemaMonitor};
pub use schema::{
    drift::{diff_schemas, DriftReport},
    index::SchemaIndex,
    SchemaMetadata, SchemaSnapshot, SnapshotStore,
};
pub use stores::{BusinessRule, BusinessRuleStore, ExampleQuery, ExampleStore, NewBusinessRule};
pub use types::PipelineConfig;
pub use validation::{ValidatedSql, ValidationVerdict, Validator, Violation, ViolationKind};
