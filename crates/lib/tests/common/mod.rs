#![allow(dead_code)]
//! # Common Test Utilities
//!
//! Shared helpers for the library's integration tests. Fixtures that other
//! crates also need live in `sqlrag-test-utils`.

use dotenvy::dotenv;
use sqlrag::providers::ai::HashingEmbedder;
use sqlrag::schema::SchemaSnapshot;
use sqlrag::types::ValidationConfig;
use sqlrag::validation::{ValidationVerdict, Validator};
use sqlrag_test_utils::hospital_snapshot;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the tracing subscriber and loads .env for tests.
pub fn setup_tracing() {
    INIT.call_once(|| {
        dotenv().ok();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn embedder() -> Box<HashingEmbedder> {
    Box::new(HashingEmbedder::new(256))
}

/// Validates `sql` against the hospital snapshot with default limits.
pub fn validate(sql: &str) -> ValidationVerdict {
    validate_with(sql, &hospital_snapshot(), ValidationConfig::default(), None)
}

pub fn validate_with(
    sql: &str,
    snapshot: &SchemaSnapshot,
    config: ValidationConfig,
    question: Option<&str>,
) -> ValidationVerdict {
    Validator::new(config).validate(sql, snapshot, question)
}
