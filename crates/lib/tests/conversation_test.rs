mod common;

use crate::common::setup_tracing;
use chrono::Utc;
use sqlrag::conversation::{
    is_follow_up, resolve_reference, Conversation, ConversationManager, ConversationTurn,
};
use sqlrag::SqlRagError;
use std::time::Duration;

fn admissions_turn() -> ConversationTurn {
    ConversationTurn {
        question: "How many patients were admitted yesterday?".into(),
        resolved_question: "How many patients were admitted yesterday?".into(),
        sql: "SELECT COUNT(*) FROM admissions WHERE admit_date = date('now', '-1 day')".into(),
        result_summary: "1 row (COUNT(*))".into(),
        tables: vec!["admissions".into()],
        filter: Some("admit_date = date('now', '-1 day')".into()),
        timestamp: Utc::now(),
    }
}

#[test]
fn follow_up_detection() {
    assert!(is_follow_up("Just medical units"));
    assert!(is_follow_up("what about last week and the surgical units too"));
    assert!(is_follow_up("Can you break those down by diagnosis please"));
    assert!(is_follow_up("top 5 by unit"));
    assert!(is_follow_up("show the patients who were admitted to that unit"));
    assert!(!is_follow_up(
        "How many patients were admitted to the cardiology unit in March?"
    ));
    assert!(!is_follow_up(""));
}

#[test]
fn follow_up_keeps_previous_filter() {
    let last = admissions_turn();
    let resolved = resolve_reference("Just medical units", Some(&last));
    assert!(resolved.expanded);
    assert!(resolved.text.starts_with("Just medical units"));
    assert!(resolved.text.contains("How many patients were admitted yesterday?"));
    assert!(resolved.text.contains("admissions"));
    assert!(resolved.text.contains("admit_date = date('now', '-1 day')"));
}

#[test]
fn first_question_is_never_expanded() {
    let resolved = resolve_reference("Just medical units", None);
    assert!(!resolved.expanded);
    assert_eq!(resolved.text, "Just medical units");
}

#[test]
fn standalone_question_passes_through() {
    let last = admissions_turn();
    let question = "List every patient born before 1980 with their gender";
    let resolved = resolve_reference(question, Some(&last));
    assert!(!resolved.expanded);
    assert_eq!(resolved.text, question);
}

#[test]
fn window_evicts_oldest_turn() {
    let mut conversation = Conversation::new("s1", 2);
    for i in 0..3 {
        let mut turn = admissions_turn();
        turn.question = format!("question {i}");
        conversation.push(turn);
    }
    assert_eq!(conversation.len(), 2);
    let questions: Vec<_> = conversation.turns().map(|t| t.question.clone()).collect();
    assert_eq!(questions, vec!["question 1", "question 2"]);
    assert_eq!(conversation.last().unwrap().question, "question 2");
}

#[tokio::test]
async fn concurrent_question_on_same_session_conflicts() {
    setup_tracing();
    let manager = ConversationManager::new(5, Duration::from_secs(60));
    let guard = manager.acquire("s1").await.unwrap();

    let err = manager.acquire("s1").await.unwrap_err();
    assert!(matches!(err, SqlRagError::ConcurrencyConflict(ref id) if id == "s1"));
    assert!(manager.acquire("s2").await.is_ok());

    drop(guard);
    assert!(manager.acquire("s1").await.is_ok());
}

#[tokio::test]
async fn reset_during_question_discards_its_turn() {
    setup_tracing();
    let manager = ConversationManager::new(5, Duration::from_secs(60));
    {
        let mut guard = manager.acquire("s1").await.unwrap();
        guard.push(admissions_turn());
    }

    let mut guard = manager.acquire("s1").await.unwrap();
    manager.reset("s1").await.unwrap();
    guard.push(admissions_turn());
    drop(guard);

    assert!(manager.history("s1").await.is_empty());

    let mut guard = manager.acquire("s1").await.unwrap();
    guard.push(admissions_turn());
    drop(guard);
    assert_eq!(manager.history("s1").await.len(), 1);
}

#[tokio::test]
async fn reset_during_abandoned_question_still_applies() {
    setup_tracing();
    let manager = ConversationManager::new(5, Duration::from_secs(60));
    {
        let mut guard = manager.acquire("s1").await.unwrap();
        guard.push(admissions_turn());
    }

    let guard = manager.acquire("s1").await.unwrap();
    manager.reset("s1").await.unwrap();
    drop(guard);

    assert!(manager.history("s1").await.is_empty());
}

#[tokio::test]
async fn reset_clears_history_only_for_that_session() {
    setup_tracing();
    let manager = ConversationManager::new(5, Duration::from_secs(60));
    for session in ["a", "b"] {
        let mut guard = manager.acquire(session).await.unwrap();
        guard.push(admissions_turn());
    }

    manager.reset("a").await.unwrap();
    assert!(manager.history("a").await.is_empty());
    assert_eq!(manager.history("b").await.len(), 1);
    assert!(manager.reset("unknown").await.is_ok());
    assert!(manager.history("unknown").await.is_empty());
}

#[tokio::test]
async fn idle_sessions_are_purged() {
    setup_tracing();
    let manager = ConversationManager::new(5, Duration::ZERO);
    drop(manager.acquire("idle").await.unwrap());
    let busy = manager.acquire("busy").await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(manager.purge_expired().await, 1);
    assert_eq!(manager.session_count().await, 1);
    drop(busy);
}
