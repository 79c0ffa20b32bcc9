//! # Conversation State
//!
//! A bounded, per-session window of prior turns used to resolve follow-up
//! questions. Each session is guarded by its own async mutex; a second
//! question for a busy session is refused instead of queued. A reset never
//! waits: on a busy session it is recorded and applied when the question in
//! flight finishes, and that question's turn is discarded.

use crate::errors::SqlRagError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub resolved_question: String,
    pub sql: String,
    pub result_summary: String,
    pub tables: Vec<String>,
    /// Top-level WHERE clause of the executed statement.
    pub filter: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub session_id: String,
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// Reset requests already applied to `turns`.
    #[serde(skip)]
    applied_resets: u64,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>, max_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
            created_at: now,
            last_active: now,
            applied_resets: 0,
        }
    }

    /// Appends a turn, evicting the oldest ones beyond the window.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
        self.last_active = Utc::now();
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    /// Oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.last_active = Utc::now();
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// The question actually sent to retrieval and generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedQuestion {
    pub text: String,
    /// The question was treated as a follow-up and expanded.
    pub expanded: bool,
}

const PRONOUNS: &[&str] = &["it", "they", "them", "those", "that", "these"];
const LEADING_MODIFIERS: &[&str] = &[
    "just",
    "only",
    "and",
    "what about",
    "how about",
    "now",
    "also",
    "instead",
];
const SHORT_QUESTION_WORDS: usize = 4;
/// "by X" style refinements only count as follow-ups in questions this short.
const REFINEMENT_MAX_WORDS: usize = 6;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether `question` leans on the previous turn for its meaning.
pub fn is_follow_up(question: &str) -> bool {
    let words = words(question);
    if words.is_empty() {
        return false;
    }
    if words.len() <= SHORT_QUESTION_WORDS {
        return true;
    }
    let lowered = words.join(" ");
    if LEADING_MODIFIERS
        .iter()
        .any(|m| lowered == *m || lowered.starts_with(&format!("{m} ")))
    {
        return true;
    }
    if words.iter().any(|w| PRONOUNS.contains(&w.as_str())) {
        return true;
    }
    if words.len() <= REFINEMENT_MAX_WORDS {
        let refinement = words.windows(2).any(|pair| match pair[0].as_str() {
            "top" => pair[1].chars().all(|c| c.is_ascii_digit()),
            "by" | "per" => true,
            _ => false,
        });
        if refinement {
            return true;
        }
    }
    false
}

/// Expands a follow-up with the previous question, its tables and its filter.
/// Anything else, or any question without a previous turn, passes through.
pub fn resolve_reference(question: &str, last: Option<&ConversationTurn>) -> ResolvedQuestion {
    let question = question.trim();
    let Some(last) = last else {
        return ResolvedQuestion {
            text: question.to_string(),
            expanded: false,
        };
    };
    if !is_follow_up(question) {
        return ResolvedQuestion {
            text: question.to_string(),
            expanded: false,
        };
    }

    let mut text = format!(
        "{question} (follow-up to the previous question: \"{}\"",
        last.resolved_question
    );
    if !last.tables.is_empty() {
        text.push_str(&format!("; it used tables: {}", last.tables.join(", ")));
    }
    if let Some(filter) = &last.filter {
        text.push_str(&format!("; it filtered on: {filter}"));
    }
    text.push(')');
    debug!(original = %question, resolved = %text, "Expanded follow-up question");
    ResolvedQuestion {
        text,
        expanded: true,
    }
}

#[derive(Debug)]
struct Session {
    conversation: Arc<Mutex<Conversation>>,
    /// Reset requests received so far.
    resets: AtomicU64,
}

impl Session {
    fn new(session_id: &str, max_turns: usize) -> Self {
        Self {
            conversation: Arc::new(Mutex::new(Conversation::new(session_id, max_turns))),
            resets: AtomicU64::new(0),
        }
    }

    /// Clears `conversation` if a reset arrived since the last one was applied.
    fn apply_pending_reset(&self, conversation: &mut Conversation) -> bool {
        let requested = self.resets.load(Ordering::SeqCst);
        if conversation.applied_resets == requested {
            return false;
        }
        conversation.clear();
        conversation.applied_resets = requested;
        true
    }
}

/// Exclusive access to one session for the duration of a question.
///
/// Dropping the guard releases the session and applies any reset that arrived
/// while it was held.
#[derive(Debug)]
pub struct SessionGuard {
    conversation: OwnedMutexGuard<Conversation>,
    session: Arc<Session>,
}

impl SessionGuard {
    /// Appends the finished turn, unless the session was reset meanwhile.
    pub fn push(&mut self, turn: ConversationTurn) {
        if self.session.apply_pending_reset(&mut self.conversation) {
            info!(
                session_id = %self.conversation.session_id,
                "Conversation was reset during the question; turn discarded."
            );
            return;
        }
        self.conversation.push(turn);
    }
}

impl Deref for SessionGuard {
    type Target = Conversation;

    fn deref(&self) -> &Conversation {
        &self.conversation
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.apply_pending_reset(&mut self.conversation);
    }
}

#[derive(Debug)]
pub struct ConversationManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    max_turns: usize,
    idle_timeout: Duration,
}

impl ConversationManager {
    pub fn new(max_turns: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns,
            idle_timeout,
        }
    }

    async fn session(&self, session_id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Session::new(session_id, self.max_turns)))
            .clone()
    }

    /// Locks the session or fails immediately if a question is already in flight.
    ///
    /// Dropping the guard releases the session.
    pub async fn acquire(&self, session_id: &str) -> Result<SessionGuard, SqlRagError> {
        let session = self.session(session_id).await;
        let mut conversation = session
            .conversation
            .clone()
            .try_lock_owned()
            .map_err(|_| SqlRagError::ConcurrencyConflict(session_id.to_string()))?;
        session.apply_pending_reset(&mut conversation);
        conversation.touch();
        Ok(SessionGuard {
            conversation,
            session,
        })
    }

    /// Clears the turn history. On a busy session the clear takes effect as
    /// soon as the question in flight finishes, and its turn is not kept.
    pub async fn reset(&self, session_id: &str) -> Result<(), SqlRagError> {
        let session = {
            let sessions = self.sessions.lock().await;
            match sessions.get(session_id) {
                Some(session) => session.clone(),
                None => return Ok(()),
            }
        };
        session.resets.fetch_add(1, Ordering::SeqCst);
        match session.conversation.try_lock() {
            Ok(mut conversation) => {
                session.apply_pending_reset(&mut conversation);
                info!(session_id = %session_id, "Conversation reset.");
            }
            Err(_) => {
                info!(
                    session_id = %session_id,
                    "Conversation reset deferred until the question in flight finishes."
                );
            }
        }
        Ok(())
    }

    /// Oldest first. Unknown sessions have an empty history.
    pub async fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions.get(session_id).cloned()
        };
        match session {
            Some(session) => session
                .conversation
                .lock()
                .await
                .turns()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drops idle sessions. Sessions with a question in flight are kept.
    pub async fn purge_expired(&self) -> usize {
        let idle = ChronoDuration::from_std(self.idle_timeout)
            .unwrap_or_else(|_| ChronoDuration::weeks(52 * 100));
        let cutoff = Utc::now() - idle;
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.conversation.try_lock() {
            Ok(conversation) => conversation.last_active > cutoff,
            Err(_) => true,
        });
        let purged = before - sessions.len();
        if purged > 0 {
            info!(purged, "Purged idle conversations.");
        }
        purged
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(question: &str) -> ConversationTurn {
        ConversationTurn {
            question: question.to_string(),
            resolved_question: question.to_string(),
            sql: "SELECT 1".to_string(),
            result_summary: "1 row".to_string(),
            tables: vec!["admissions".to_string()],
            filter: Some("unit = 'ICU'".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn window_evicts_oldest_first() {
        let mut conversation = Conversation::new("s", 3);
        for i in 0..4 {
            conversation.push(turn(&format!("q{i}")));
        }
        let kept: Vec<_> = conversation.turns().map(|t| t.question.as_str()).collect();
        assert_eq!(kept, vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn follow_up_detection() {
        assert!(is_follow_up("top 10"));
        assert!(is_follow_up("by unit"));
        assert!(is_follow_up("what about last month for the cardiology unit"));
        assert!(is_follow_up("show me those grouped by admission date please"));
        assert!(is_follow_up("show the patients admitted to that unit last week"));
        assert!(!is_follow_up(
            "How many patients were admitted to the cardiology unit last week?"
        ));
    }

    #[test]
    fn resolves_with_previous_context() {
        let last = turn("How many admissions were there in the ICU last week?");
        let resolved = resolve_reference("by unit", Some(&last));
        assert!(resolved.expanded);
        assert!(resolved.text.starts_with("by unit"));
        assert!(resolved.text.contains("admissions"));
        assert!(resolved.text.contains("unit = 'ICU'"));

        let standalone = resolve_reference("by unit", None);
        assert!(!standalone.expanded);
        assert_eq!(standalone.text, "by unit");
    }
}
