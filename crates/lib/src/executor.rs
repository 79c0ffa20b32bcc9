//! # The Core Executor
//!
//! `SqlRagExecutor` is the entry point the server and CLI call into. It holds
//! the shared index and stores, the generator, the validator and the
//! conversation manager, and runs one question through the whole pipeline:
//! resolve, assemble, generate, validate, execute, record.

use crate::{
    constants::DEFAULT_RETAINED_SNAPSHOTS,
    context::{ContextAssembler, RejectionFeedback},
    conversation::{resolve_reference, ConversationManager, ConversationTurn},
    errors::SqlRagError,
    generator::{Candidate, ConfidenceSource, SqlGenerator},
    monitor::SchemaMonitor,
    providers::{
        ai::{AiProvider, Embedder},
        db::{Database, QueryResult, StateStore},
    },
    schema::{index::SchemaIndex, SchemaSnapshot, SnapshotStore},
    stores::{BusinessRule, BusinessRuleStore, ExampleQuery, ExampleStore, NewBusinessRule},
    types::PipelineConfig,
    validation::{SqlStatement, ValidationVerdict, Validator, ViolationKind},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AskStatus {
    Answered,
    Rejected,
    Unanswerable,
}

/// Why the final candidate was not executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: ViolationKind,
    pub identifier: Option<String>,
    pub suggestion: Option<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTiming {
    pub step: &'static str,
    pub elapsed_ms: u64,
}

impl StepTiming {
    fn since(step: &'static str, started: Instant) -> Self {
        Self {
            step,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// The answer to one `ask`.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub session_id: String,
    pub status: AskStatus,
    pub question: String,
    pub resolved_question: String,
    /// The executed statement, or the rejected one.
    pub sql: Option<String>,
    pub rows: Option<QueryResult>,
    pub rejection: Option<Rejection>,
    pub confidence: f64,
    pub low_confidence: bool,
    pub confidence_source: ConfidenceSource,
    pub regenerated: bool,
    pub snapshot_version: u64,
    /// Size of the last prompt sent to the model, in characters.
    pub prompt_chars: usize,
    pub steps: Vec<StepTiming>,
    pub verdict: Option<ValidationVerdict>,
}

/// Builds an executor from its collaborators.
#[derive(Default)]
pub struct SqlRagExecutorBuilder {
    database: Option<Box<dyn Database>>,
    ai_provider: Option<Box<dyn AiProvider>>,
    embedder: Option<Box<dyn Embedder>>,
    state: Option<Arc<StateStore>>,
    config: PipelineConfig,
    retained_snapshots: Option<usize>,
}

impl SqlRagExecutorBuilder {
    pub fn database(mut self, database: Box<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn ai_provider(mut self, provider: Box<dyn AiProvider>) -> Self {
        self.ai_provider = Some(provider);
        self
    }

    pub fn embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Persist snapshots, examples and rules in this state database.
    pub fn state_store(mut self, state: Arc<StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retained_snapshots(mut self, retained: usize) -> Self {
        self.retained_snapshots = Some(retained);
        self
    }

    pub fn build(self) -> Result<SqlRagExecutor, SqlRagError> {
        let database = self
            .database
            .ok_or_else(|| SqlRagError::InvalidConfig("a database is required".to_string()))?;
        let ai_provider = self
            .ai_provider
            .ok_or_else(|| SqlRagError::InvalidConfig("an AI provider is required".to_string()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| SqlRagError::InvalidConfig("an embedder is required".to_string()))?;
        let retained = self.retained_snapshots.unwrap_or(DEFAULT_RETAINED_SNAPSHOTS);
        let config = self.config;

        let snapshots = Arc::new(SnapshotStore::new(retained));
        let index = Arc::new(SchemaIndex::new(embedder.clone()));
        let mut examples = ExampleStore::new(embedder.clone());
        let mut rules = BusinessRuleStore::new(embedder);
        if let Some(state) = &self.state {
            examples = examples.with_persistence(state.clone());
            rules = rules.with_persistence(state.clone());
        }
        let examples = Arc::new(examples);
        let rules = Arc::new(rules);

        let mut monitor = SchemaMonitor::new(
            database.clone(),
            snapshots.clone(),
            index.clone(),
            examples.clone(),
            retained,
        );
        if let Some(state) = &self.state {
            monitor = monitor.with_persistence(state.clone());
        }

        Ok(SqlRagExecutor {
            assembler: ContextAssembler::new(
                index.clone(),
                examples.clone(),
                rules.clone(),
                config.rag.clone(),
            ),
            generator: SqlGenerator::new(ai_provider, &config.llm, &config.generation)?,
            validator: Validator::new(config.validation.clone()),
            conversations: Arc::new(ConversationManager::new(
                config.conversation.max_turns,
                Duration::from_secs(config.conversation.idle_timeout_secs),
            )),
            monitor: Arc::new(monitor),
            state: self.state,
            snapshots,
            index,
            examples,
            rules,
            database,
            config,
        })
    }
}

/// Holds every dependency needed to answer questions.
#[derive(Debug)]
pub struct SqlRagExecutor {
    pub snapshots: Arc<SnapshotStore>,
    pub index: Arc<SchemaIndex>,
    pub examples: Arc<ExampleStore>,
    pub rules: Arc<BusinessRuleStore>,
    pub conversations: Arc<ConversationManager>,
    pub monitor: Arc<SchemaMonitor>,
    pub validator: Validator,
    assembler: ContextAssembler,
    generator: SqlGenerator,
    database: Box<dyn Database>,
    state: Option<Arc<StateStore>>,
    config: PipelineConfig,
}

impl SqlRagExecutor {
    pub fn builder() -> SqlRagExecutorBuilder {
        SqlRagExecutorBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reloads persisted snapshots, examples and rules, then indexes the
    /// current snapshot (capturing one first if none was persisted).
    pub async fn initialize(&self) -> Result<u64, SqlRagError> {
        if let Some(state) = &self.state {
            let (snapshots, current) = state.load_snapshots().await?;
            if !snapshots.is_empty() {
                info!(count = snapshots.len(), ?current, "Restoring persisted schema snapshots.");
                self.snapshots.restore(snapshots, current);
            }
            self.examples.load(state.load_examples().await?).await?;
            self.rules.load(state.load_rules().await?).await?;
        }
        let version = self.monitor.bootstrap().await?;
        info!(version, "Pipeline ready.");
        Ok(version)
    }

    /// The snapshot new questions are answered against.
    pub fn current_snapshot(&self) -> Result<Arc<SchemaSnapshot>, SqlRagError> {
        self.index
            .snapshot()
            .or_else(|| self.snapshots.current())
            .ok_or(SqlRagError::IndexUnavailable)
    }

    /// Answers one question for one session.
    ///
    /// Validation rejections come back as `AskStatus::Rejected`. Dropping the
    /// returned future releases the session and leaves its history untouched.
    pub async fn ask(&self, session_id: &str, question: &str) -> Result<AskResponse, SqlRagError> {
        let started = Instant::now();
        let mut steps = Vec::new();

        let mut session = self.conversations.acquire(session_id).await?;

        let t = Instant::now();
        let resolved = resolve_reference(question, session.last());
        let history: Vec<ConversationTurn> = session.turns().cloned().collect();
        steps.push(StepTiming::since("resolve", t));

        let t = Instant::now();
        let context = self
            .assembler
            .assemble(&resolved.text, &history, self.config.rag.token_budget)
            .await?;
        steps.push(StepTiming::since("assemble", t));

        let mut regenerated = false;
        let t = Instant::now();
        let mut candidate = match self.generator.generate(&context, &resolved.text, None).await {
            Err(SqlRagError::GenerationTimeout(deadline)) => {
                warn!(
                    session_id = %session_id,
                    ?deadline,
                    "Generation timed out; retrying with a shortened context."
                );
                regenerated = true;
                self.generator
                    .generate(&context.shortened(), &resolved.text, None)
                    .await?
            }
            other => other?,
        };
        steps.push(StepTiming::since("generate", t));

        let mut response = AskResponse {
            session_id: session_id.to_string(),
            status: AskStatus::Unanswerable,
            question: question.to_string(),
            resolved_question: resolved.text.clone(),
            sql: None,
            rows: None,
            rejection: None,
            confidence: candidate.confidence,
            low_confidence: candidate.low_confidence,
            confidence_source: candidate.confidence_source,
            regenerated,
            snapshot_version: context.snapshot.version,
            prompt_chars: candidate.prompt_chars,
            steps: Vec::new(),
            verdict: None,
        };

        let Some(mut sql) = candidate.sql.clone() else {
            return Ok(self.finish(response, steps, started));
        };

        let t = Instant::now();
        let mut verdict = self.validator.validate(&sql, &context.snapshot, Some(question));
        steps.push(StepTiming::since("validate", t));

        if !verdict.passed() && !regenerated {
            info!(
                session_id = %session_id,
                reason = %verdict.explanation,
                "Regenerating after rejection."
            );
            regenerated = true;
            let feedback = RejectionFeedback {
                sql: sql.clone(),
                reason: verdict.explanation.clone(),
            };
            let t = Instant::now();
            candidate = self
                .generator
                .generate(&context, &resolved.text, Some(&feedback))
                .await?;
            steps.push(StepTiming::since("regenerate", t));
            apply_candidate(&mut response, &candidate, regenerated);

            match candidate.sql.clone() {
                Some(retry_sql) => sql = retry_sql,
                None => return Ok(self.finish(response, steps, started)),
            }
            let t = Instant::now();
            verdict = self.validator.validate(&sql, &context.snapshot, Some(question));
            steps.push(StepTiming::since("revalidate", t));
        }

        let Some(validated) = Validator::validated(&verdict) else {
            response.status = AskStatus::Rejected;
            response.sql = Some(sql);
            response.rejection = verdict.violation().map(|v| Rejection {
                reason: v.rule,
                identifier: v.identifier.clone(),
                suggestion: v.suggestion.clone(),
                explanation: verdict.explanation.clone(),
            });
            response.verdict = Some(verdict);
            return Ok(self.finish(response, steps, started));
        };

        let t = Instant::now();
        let row_cap = usize::try_from(self.config.validation.row_cap).unwrap_or(usize::MAX);
        let result = self.database.execute_readonly(&validated, row_cap).await?;
        steps.push(StepTiming::since("execute", t));

        let facts = SqlStatement::analyze(validated.sql()).facts;
        session.push(ConversationTurn {
            question: question.to_string(),
            resolved_question: resolved.text.clone(),
            sql: validated.sql().to_string(),
            result_summary: result.summary(),
            tables: facts
                .as_ref()
                .map(|f| f.table_names())
                .unwrap_or_default(),
            filter: facts.and_then(|f| f.filter),
            timestamp: chrono::Utc::now(),
        });

        response.status = AskStatus::Answered;
        response.sql = Some(validated.sql().to_string());
        response.rows = Some(result);
        response.verdict = Some(verdict);
        Ok(self.finish(response, steps, started))
    }

    fn finish(
        &self,
        mut response: AskResponse,
        steps: Vec<StepTiming>,
        started: Instant,
    ) -> AskResponse {
        let total_ms = started.elapsed().as_millis() as u64;
        response.steps = steps;
        info!(
            session_id = %response.session_id,
            status = ?response.status,
            regenerated = response.regenerated,
            confidence = response.confidence,
            elapsed_ms = total_ms,
            steps = ?response.steps,
            "Question processed."
        );
        if total_ms > self.config.slo_latency_ms {
            warn!(
                session_id = %response.session_id,
                elapsed_ms = total_ms,
                slo_ms = self.config.slo_latency_ms,
                "Question exceeded the latency target."
            );
        }
        response
    }

    /// Clears a session's history.
    pub async fn reset_conversation(&self, session_id: &str) -> Result<(), SqlRagError> {
        self.conversations.reset(session_id).await
    }

    pub async fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.conversations.history(session_id).await
    }

    /// Runs caller-supplied SQL through the validation pipeline only.
    pub fn validate_only(
        &self,
        sql: &str,
        question: Option<&str>,
    ) -> Result<ValidationVerdict, SqlRagError> {
        let snapshot = self.current_snapshot()?;
        Ok(self.validator.validate(sql, &snapshot, question))
    }

    pub async fn add_example(
        &self,
        question: &str,
        sql: &str,
    ) -> Result<ExampleQuery, SqlRagError> {
        let snapshot = self.current_snapshot()?;
        self.examples
            .add(question, sql, &self.validator, &snapshot)
            .await
    }

    pub async fn add_rule(&self, rule: NewBusinessRule) -> Result<BusinessRule, SqlRagError> {
        self.rules.add(rule).await
    }
}

fn apply_candidate(response: &mut AskResponse, candidate: &Candidate, regenerated: bool) {
    response.confidence = candidate.confidence;
    response.low_confidence = candidate.low_confidence;
    response.confidence_source = candidate.confidence_source;
    response.prompt_chars = candidate.prompt_chars;
    response.regenerated = regenerated;
}
