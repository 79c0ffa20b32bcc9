use crate::{
    errors::SqlRagError,
    providers::{
        ai::{cosine_similarity, Embedder},
        db::sqlite::StateStore,
    },
    schema::index::{rank, ChunkKind, IndexedChunk, ScoredChunk},
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Maps a domain term to a canonical SQL fragment or a plain clarification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: String,
    pub term: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub sql_fragment: Option<String>,
    pub clarification: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`BusinessRuleStore::add`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBusinessRule {
    pub term: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub sql_fragment: Option<String>,
    pub clarification: Option<String>,
}

impl BusinessRule {
    /// Text placed in the prompt when the rule matches.
    pub fn render(&self) -> String {
        let mut text = format!("\"{}\"", self.term);
        if !self.aliases.is_empty() {
            let _ = write!(text, " (also: {})", self.aliases.join(", "));
        }
        if let Some(fragment) = &self.sql_fragment {
            let _ = write!(text, " means `{fragment}`");
        }
        if let Some(clarification) = &self.clarification {
            let _ = write!(text, ". {clarification}");
        }
        text
    }

    fn phrases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.term.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug)]
struct RuleEntry {
    rule: BusinessRule,
    matcher: Regex,
    chunk: Arc<IndexedChunk>,
}

#[derive(Debug)]
pub struct BusinessRuleStore {
    embedder: Box<dyn Embedder>,
    entries: ArcSwap<Vec<Arc<RuleEntry>>>,
    persistence: Option<Arc<StateStore>>,
}

/// Case-insensitive whole-word match on the term or any alias.
fn build_matcher(rule: &BusinessRule) -> Result<Regex, SqlRagError> {
    let alternatives = rule
        .phrases()
        .filter(|p| !p.trim().is_empty())
        .map(|p| regex::escape(p.trim()))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))?)
}

impl BusinessRuleStore {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: ArcSwap::from_pointee(Vec::new()),
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, store: Arc<StateStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    async fn entry(&self, rule: BusinessRule) -> Result<Arc<RuleEntry>, SqlRagError> {
        let matcher = build_matcher(&rule)?;
        let content = rule.render();
        let embedding = self.embedder.embed(&content).await?;
        let chunk = Arc::new(IndexedChunk::new(
            format!("rule:{}", rule.id),
            ChunkKind::Rule,
            rule.id.clone(),
            content,
            embedding,
            0,
        ));
        Ok(Arc::new(RuleEntry {
            rule,
            matcher,
            chunk,
        }))
    }

    pub async fn load(&self, rules: Vec<BusinessRule>) -> Result<(), SqlRagError> {
        let mut entries = Vec::with_capacity(rules.len());
        for rule in rules {
            entries.push(self.entry(rule).await?);
        }
        info!(count = entries.len(), "Loaded business rules.");
        self.entries.store(Arc::new(entries));
        Ok(())
    }

    pub async fn add(&self, new_rule: NewBusinessRule) -> Result<BusinessRule, SqlRagError> {
        if new_rule.term.trim().is_empty() {
            return Err(SqlRagError::InvalidConfig(
                "business rule term must not be empty".to_string(),
            ));
        }
        if new_rule.sql_fragment.is_none() && new_rule.clarification.is_none() {
            return Err(SqlRagError::InvalidConfig(format!(
                "business rule '{}' needs a SQL fragment or a clarification",
                new_rule.term
            )));
        }

        let rule = BusinessRule {
            id: Uuid::new_v4().to_string(),
            term: new_rule.term.trim().to_string(),
            aliases: new_rule.aliases,
            sql_fragment: new_rule.sql_fragment,
            clarification: new_rule.clarification,
            created_at: Utc::now(),
        };
        let entry = self.entry(rule.clone()).await?;
        if let Some(store) = &self.persistence {
            store.save_rule(&rule).await?;
        }
        self.entries.rcu(|old| {
            let mut next = old.as_ref().clone();
            next.push(entry.clone());
            next
        });
        info!(id = %rule.id, term = %rule.term, "Added business rule.");
        Ok(rule)
    }

    pub fn list(&self) -> Vec<BusinessRule> {
        self.entries.load().iter().map(|e| e.rule.clone()).collect()
    }

    /// Every rule whose term or alias appears in `question`, best scored first.
    pub fn matching(&self, question: &str, query: &[f32]) -> Vec<ScoredChunk> {
        let entries = self.entries.load();
        let mut matched: Vec<ScoredChunk> = entries
            .iter()
            .filter(|e| e.matcher.is_match(question))
            .map(|e| ScoredChunk {
                score: cosine_similarity(query, &e.chunk.embedding),
                chunk: e.chunk.clone(),
            })
            .collect();
        rank(&mut matched);
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ai::HashingEmbedder;

    fn rule(term: &str, aliases: &[&str]) -> NewBusinessRule {
        NewBusinessRule {
            term: term.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            sql_fragment: Some("status = 'active'".to_string()),
            clarification: None,
        }
    }

    #[tokio::test]
    async fn matches_whole_words_case_insensitively() {
        let store = BusinessRuleStore::new(Box::new(HashingEmbedder::new(64)));
        store.add(rule("active patient", &["current patient"])).await.unwrap();
        let q = [0.0f32; 64];

        assert_eq!(store.matching("How many Active Patient records?", &q).len(), 1);
        assert_eq!(store.matching("list current patients", &q).len(), 0);
        assert_eq!(store.matching("list current patient", &q).len(), 1);
        assert!(store.matching("inactive patient count", &q).is_empty());
    }

    #[tokio::test]
    async fn rejects_rule_without_meaning() {
        let store = BusinessRuleStore::new(Box::new(HashingEmbedder::new(64)));
        let err = store
            .add(NewBusinessRule {
                term: "vip".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SqlRagError::InvalidConfig(_)));
    }
}
