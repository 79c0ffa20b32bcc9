//! # Context Assembly
//!
//! Pulls schema chunks, example queries and matching business rules for a
//! question and trims them to the token budget. Schema relevance dominates:
//! examples and rules are dropped before any schema chunk, and the best
//! schema chunk is never dropped.

use crate::{
    constants::NO_SQL_SENTINEL,
    conversation::ConversationTurn,
    errors::SqlRagError,
    prompts::core::{
        BUSINESS_RULES_SECTION, EXAMPLES_SECTION, HISTORY_SECTION, REJECTION_FEEDBACK_SECTION,
        SQL_CONSTRUCTION_RULES, SQL_SYSTEM_PROMPT, SQL_USER_PROMPT,
    },
    providers::ai::Prompt,
    schema::{
        index::{ChunkKind, ScoredChunk, SchemaIndex},
        SchemaSnapshot,
    },
    stores::{BusinessRuleStore, ExampleStore},
    types::RagConfig,
};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Why the previous candidate was rejected, fed into a regeneration.
#[derive(Debug, Clone)]
pub struct RejectionFeedback {
    pub sql: String,
    pub reason: String,
}

/// Everything the generator sees for one question.
#[derive(Debug, Clone)]
pub struct Context {
    /// The snapshot the schema chunks came from. Validation uses the same one.
    pub snapshot: Arc<SchemaSnapshot>,
    pub schema_chunks: Vec<ScoredChunk>,
    pub example_chunks: Vec<ScoredChunk>,
    pub rule_chunks: Vec<ScoredChunk>,
    pub history: Vec<ConversationTurn>,
    pub token_budget: usize,
    /// Estimated tokens of the retrieved chunks. History is not counted.
    pub token_estimate: usize,
    /// Chunks retrieved but left out to stay within budget.
    pub dropped: usize,
}

impl Context {
    /// Half the schema chunks (at least one) and no examples. Used to retry
    /// after a generation timeout.
    pub fn shortened(&self) -> Context {
        let keep = self.schema_chunks.len().div_ceil(2).max(1);
        let schema_chunks: Vec<ScoredChunk> =
            self.schema_chunks.iter().take(keep).cloned().collect();
        let token_estimate = tokens(&schema_chunks) + tokens(&self.rule_chunks);
        Context {
            snapshot: self.snapshot.clone(),
            dropped: self.dropped
                + (self.schema_chunks.len() - schema_chunks.len())
                + self.example_chunks.len(),
            schema_chunks,
            example_chunks: Vec::new(),
            rule_chunks: self.rule_chunks.clone(),
            history: self.history.clone(),
            token_budget: self.token_budget,
            token_estimate,
        }
    }

    /// Names of the tables whose chunks made it into the context.
    pub fn tables(&self) -> Vec<&str> {
        self.schema_chunks
            .iter()
            .map(|c| c.chunk.source.as_str())
            .collect()
    }

    /// Renders the generation prompt.
    pub fn prompt(&self, question: &str, feedback: Option<&RejectionFeedback>) -> Prompt {
        let system = SQL_SYSTEM_PROMPT
            .replace("{dialect}", "SQLite")
            .replace("{no_sql}", NO_SQL_SENTINEL);

        let schema = self
            .schema_chunks
            .iter()
            .map(|c| c.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let business_rules = if self.rule_chunks.is_empty() {
            String::new()
        } else {
            let items = self
                .rule_chunks
                .iter()
                .map(|c| format!("- {}", c.chunk.content))
                .collect::<Vec<_>>()
                .join("\n");
            BUSINESS_RULES_SECTION.replace("{items}", &items)
        };

        let examples = if self.example_chunks.is_empty() {
            String::new()
        } else {
            let items = self
                .example_chunks
                .iter()
                .map(|c| c.chunk.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            EXAMPLES_SECTION.replace("{items}", &items)
        };

        let history = if self.history.is_empty() {
            String::new()
        } else {
            let mut items = String::new();
            for turn in &self.history {
                let _ = writeln!(
                    items,
                    "Q: {}\nSQL: {}\nResult: {}",
                    turn.question, turn.sql, turn.result_summary
                );
            }
            HISTORY_SECTION.replace("{items}", items.trim_end())
        };

        let feedback = feedback
            .map(|f| {
                REJECTION_FEEDBACK_SECTION
                    .replace("{sql}", &f.sql)
                    .replace("{reason}", &f.reason)
            })
            .unwrap_or_default();

        let user = SQL_USER_PROMPT
            .replace("{rules}", SQL_CONSTRUCTION_RULES)
            .replace("{schema}", &schema)
            .replace("{business_rules}", &business_rules)
            .replace("{examples}", &examples)
            .replace("{history}", &history)
            .replace("{feedback}", &feedback)
            .replace("{question}", question);

        Prompt { system, user }
    }
}

fn tokens(chunks: &[ScoredChunk]) -> usize {
    chunks.iter().map(|c| c.chunk.token_estimate).sum()
}

#[derive(Debug)]
pub struct ContextAssembler {
    index: Arc<SchemaIndex>,
    examples: Arc<ExampleStore>,
    rules: Arc<BusinessRuleStore>,
    config: RagConfig,
}

impl ContextAssembler {
    pub fn new(
        index: Arc<SchemaIndex>,
        examples: Arc<ExampleStore>,
        rules: Arc<BusinessRuleStore>,
        config: RagConfig,
    ) -> Self {
        Self {
            index,
            examples,
            rules,
            config,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Builds the context for `question` within `token_budget` estimated tokens.
    pub async fn assemble(
        &self,
        question: &str,
        history: &[ConversationTurn],
        token_budget: usize,
    ) -> Result<Context, SqlRagError> {
        // Pin one generation for the whole request.
        let generation = self.index.generation().ok_or(SqlRagError::IndexUnavailable)?;
        let query = self.index.embed_query(question).await?;

        let retrieval = SchemaIndex::retrieve_from(&generation, &query, self.config.schema_top_k);
        let mut schema_chunks: Vec<ScoredChunk> = retrieval
            .chunks
            .into_iter()
            .enumerate()
            .filter(|(i, c)| *i == 0 || c.score >= self.config.min_similarity)
            .map(|(_, c)| c)
            .collect();

        if let Some(top) = schema_chunks.first() {
            if top.chunk.token_estimate > token_budget {
                return Err(SqlRagError::ContextTooLarge {
                    chunk_id: top.chunk.id.clone(),
                    tokens: top.chunk.token_estimate,
                    budget: token_budget,
                });
            }
        }

        let mut extras: Vec<ScoredChunk> =
            self.examples.retrieve(&query, self.config.example_top_k);
        extras.extend(self.rules.matching(question, &query));
        extras.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut total = tokens(&schema_chunks) + tokens(&extras);
        let mut dropped = 0;
        while total > token_budget {
            // Lowest-scoring example or rule first, then the weakest schema chunk.
            let removed = match extras.pop() {
                Some(chunk) => chunk,
                None if schema_chunks.len() > 1 => match schema_chunks.pop() {
                    Some(chunk) => chunk,
                    None => break,
                },
                None => break,
            };
            total -= removed.chunk.token_estimate;
            dropped += 1;
        }

        let (example_chunks, rule_chunks): (Vec<_>, Vec<_>) = extras
            .into_iter()
            .partition(|c| c.chunk.kind == ChunkKind::Example);

        debug!(
            version = generation.snapshot.version,
            schema = schema_chunks.len(),
            examples = example_chunks.len(),
            rules = rule_chunks.len(),
            dropped,
            tokens = total,
            budget = token_budget,
            "Assembled context"
        );

        Ok(Context {
            snapshot: generation.snapshot.clone(),
            schema_chunks,
            example_chunks,
            rule_chunks,
            history: history.to_vec(),
            token_budget,
            token_estimate: total,
            dropped,
        })
    }
}
