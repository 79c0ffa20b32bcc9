mod common;

use crate::common::{embedder, setup_tracing};
use sqlrag::context::{Context, ContextAssembler, RejectionFeedback};
use sqlrag::generator::{ConfidenceSource, SqlGenerator};
use sqlrag::schema::index::SchemaIndex;
use sqlrag::stores::{BusinessRuleStore, ExampleStore};
use sqlrag::types::{GenerationConfig, LlmConfig, RagConfig};
use sqlrag::SqlRagError;
use sqlrag_test_utils::{hospital_snapshot, MockAiProvider};
use std::sync::Arc;
use std::time::Duration;

fn generator(provider: MockAiProvider) -> SqlGenerator {
    let llm = LlmConfig {
        timeout_secs: 2,
        ..LlmConfig::default()
    };
    SqlGenerator::new(Box::new(provider), &llm, &GenerationConfig::default()).unwrap()
}

async fn context(question: &str) -> Context {
    let index = Arc::new(SchemaIndex::new(embedder()));
    index.index(Arc::new(hospital_snapshot())).await.unwrap();
    ContextAssembler::new(
        index,
        Arc::new(ExampleStore::new(embedder())),
        Arc::new(BusinessRuleStore::new(embedder())),
        RagConfig::default(),
    )
    .assemble(question, &[], 10_000)
    .await
    .unwrap()
}

#[test]
fn extracts_from_sql_fence() {
    let generator = generator(MockAiProvider::new());
    let text = "Here you go:\n```sql\nSELECT name FROM patients;\n```\nCONFIDENCE: 0.9";
    let extracted = generator.extract(text);
    assert_eq!(extracted.sql.as_deref(), Some("SELECT name FROM patients;"));
    assert_eq!(extracted.self_rating, Some(0.9));
}

#[test]
fn extracts_from_plain_fence_and_prefix() {
    let generator = generator(MockAiProvider::new());
    let fenced = generator.extract("```\nSELECT 1\n```");
    assert_eq!(fenced.sql.as_deref(), Some("SELECT 1"));

    let prefixed = generator.extract("SQL: SELECT COUNT(*) FROM units");
    assert_eq!(prefixed.sql.as_deref(), Some("SELECT COUNT(*) FROM units"));
    assert_eq!(prefixed.self_rating, None);
}

#[test]
fn percent_self_rating_is_normalized() {
    let generator = generator(MockAiProvider::new());
    let extracted = generator.extract("SELECT 1\nCONFIDENCE: 80%");
    assert_eq!(extracted.sql.as_deref(), Some("SELECT 1"));
    assert_eq!(extracted.self_rating, Some(0.8));
}

#[test]
fn no_sql_sentinel_means_unanswerable() {
    let generator = generator(MockAiProvider::new());
    assert_eq!(generator.extract("NO_SQL").sql, None);
    assert_eq!(generator.extract("```sql\nNO_SQL\n```").sql, None);
    assert_eq!(generator.extract("   ").sql, None);
}

#[tokio::test]
async fn confidence_prefers_logprobs() {
    setup_tracing();
    let provider = MockAiProvider::new().with_logprob(-0.1);
    provider.push_response("SELECT name FROM patients\nCONFIDENCE: 0.2");
    let candidate = generator(provider)
        .generate(&context("patient names").await, "patient names", None)
        .await
        .unwrap();
    assert_eq!(candidate.confidence_source, ConfidenceSource::LogProbs);
    assert!((candidate.confidence - (-0.1f64).exp()).abs() < 1e-9);
    assert!(!candidate.low_confidence);
    assert_eq!(candidate.model.as_deref(), Some("mock"));
}

#[tokio::test]
async fn confidence_falls_back_to_self_rating_then_default() {
    setup_tracing();
    let provider = MockAiProvider::new();
    provider.push_response("SELECT name FROM patients\nCONFIDENCE: 0.3");
    provider.push_response("SELECT name FROM patients");
    let generator = generator(provider);
    let context = context("patient names").await;

    let rated = generator.generate(&context, "patient names", None).await.unwrap();
    assert_eq!(rated.confidence_source, ConfidenceSource::SelfRated);
    assert_eq!(rated.confidence, 0.3);
    assert!(rated.low_confidence);

    let unrated = generator.generate(&context, "patient names", None).await.unwrap();
    assert_eq!(unrated.confidence_source, ConfidenceSource::Default);
    assert_eq!(unrated.confidence, 0.5);
}

#[tokio::test]
async fn feedback_is_included_in_the_prompt() {
    setup_tracing();
    let provider = MockAiProvider::new();
    provider.push_response("SELECT name FROM patients");
    let generator = generator(provider.clone());
    let feedback = RejectionFeedback {
        sql: "SELECT nme FROM patients".into(),
        reason: "UnknownReference: unknown column 'nme'".into(),
    };

    generator
        .generate(&context("patient names").await, "patient names", Some(&feedback))
        .await
        .unwrap();
    let calls = provider.get_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].user.contains("SELECT nme FROM patients"));
    assert!(calls[0].user.contains("unknown column 'nme'"));
    assert!(calls[0].user.contains("patient names"));
}

#[tokio::test(start_paused = true)]
async fn slow_model_times_out() {
    setup_tracing();
    let provider = MockAiProvider::new().with_delay(Duration::from_secs(10));
    provider.push_response("SELECT 1");
    let err = generator(provider)
        .generate(&context("patient names").await, "patient names", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SqlRagError::GenerationTimeout(d) if d == Duration::from_secs(2)));
}
