//! # SQL Generation
//!
//! Turns an assembled context into one candidate statement and a confidence
//! score. The statement is only a candidate: nothing here validates it.

use crate::{
    constants::{NEUTRAL_CONFIDENCE, NO_SQL_SENTINEL},
    context::{Context, RejectionFeedback},
    errors::SqlRagError,
    providers::ai::{AiProvider, Completion, DecodingParams},
    types::{GenerationConfig, LlmConfig},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where a candidate's confidence came from, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    LogProbs,
    SelfRated,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// `None` when the model declared the question unanswerable.
    pub sql: Option<String>,
    pub confidence: f64,
    pub confidence_source: ConfidenceSource,
    /// Advisory only; never blocks validation.
    pub low_confidence: bool,
    pub model: Option<String>,
    pub prompt_chars: usize,
}

/// SQL and self-rating pulled out of raw model text.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub sql: Option<String>,
    pub self_rating: Option<f64>,
}

#[derive(Debug)]
struct Patterns {
    sql_block: Regex,
    any_block: Regex,
    prefix: Regex,
    confidence: Regex,
}

impl Patterns {
    fn new() -> Result<Self, SqlRagError> {
        Ok(Self {
            sql_block: Regex::new(r"(?is)```[ \t]*sql\b[ \t]*\n?(.*?)```")?,
            any_block: Regex::new(r"(?s)```(?:[A-Za-z0-9_-]*[ \t]*\n)?(.*?)```")?,
            prefix: Regex::new(r"(?i)^\s*(?:SQL\s+Query|SQL)\s*:\s*")?,
            confidence: Regex::new(r"(?im)^\s*(?:--\s*)?CONFIDENCE\s*[:=]\s*([0-9]*\.?[0-9]+)\s*(%?)\s*$")?,
        })
    }
}

#[derive(Debug)]
pub struct SqlGenerator {
    provider: Box<dyn AiProvider>,
    params: DecodingParams,
    deadline: Duration,
    confidence_threshold: f64,
    patterns: Patterns,
}

fn is_no_sql(text: &str) -> bool {
    let trimmed = text
        .trim()
        .trim_end_matches(|c: char| c == '.' || c == ';')
        .trim();
    trimmed.eq_ignore_ascii_case(NO_SQL_SENTINEL)
}

impl SqlGenerator {
    pub fn new(
        provider: Box<dyn AiProvider>,
        llm: &LlmConfig,
        generation: &GenerationConfig,
    ) -> Result<Self, SqlRagError> {
        Ok(Self {
            provider,
            params: DecodingParams {
                temperature: llm.temperature,
                top_p: llm.top_p,
                max_tokens: llm.max_tokens,
                seed: llm.seed,
            },
            deadline: llm.timeout(),
            confidence_threshold: generation.confidence_threshold,
            patterns: Patterns::new()?,
        })
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Pulls the statement out of a completion.
    ///
    /// Preference: a ```sql block, then any fenced block, then the whole text
    /// with a `SQL:` prefix removed. A `CONFIDENCE:` line is removed and parsed.
    pub fn extract(&self, text: &str) -> Extracted {
        let self_rating = self
            .patterns
            .confidence
            .captures(text)
            .and_then(|caps| {
                let value: f64 = caps.get(1)?.as_str().parse().ok()?;
                let percent = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
                Some(if percent || value > 1.0 { value / 100.0 } else { value })
            })
            .map(|v| v.clamp(0.0, 1.0));
        let without_rating = self.patterns.confidence.replace_all(text, "");

        if is_no_sql(&without_rating) {
            return Extracted {
                sql: None,
                self_rating,
            };
        }

        let body = self
            .patterns
            .sql_block
            .captures(&without_rating)
            .or_else(|| self.patterns.any_block.captures(&without_rating))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| without_rating.to_string());

        let sql = self.patterns.prefix.replace(body.trim(), "").trim().to_string();
        let sql = if sql.is_empty() || is_no_sql(&sql) {
            None
        } else {
            Some(sql)
        };
        Extracted { sql, self_rating }
    }

    fn score(&self, completion: &Completion, self_rating: Option<f64>) -> (f64, ConfidenceSource) {
        if let Some(mean) = completion.mean_logprob {
            return (mean.exp().clamp(0.0, 1.0), ConfidenceSource::LogProbs);
        }
        if let Some(rating) = self_rating {
            return (rating, ConfidenceSource::SelfRated);
        }
        (NEUTRAL_CONFIDENCE, ConfidenceSource::Default)
    }

    /// Asks the model for one statement. Fails with `GenerationTimeout` if the
    /// backend does not answer within the configured deadline.
    pub async fn generate(
        &self,
        context: &Context,
        question: &str,
        feedback: Option<&RejectionFeedback>,
    ) -> Result<Candidate, SqlRagError> {
        let prompt = context.prompt(question, feedback);
        let prompt_chars = prompt.system.len() + prompt.user.len();
        debug!(prompt_chars, feedback = feedback.is_some(), "Requesting SQL from the model");

        let started = Instant::now();
        let completion = self
            .provider
            .complete(&prompt, &self.params, self.deadline)
            .await?;
        let extracted = self.extract(&completion.text);
        let (confidence, confidence_source) = self.score(&completion, extracted.self_rating);

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            answered = extracted.sql.is_some(),
            confidence,
            ?confidence_source,
            "Generated candidate SQL."
        );

        Ok(Candidate {
            sql: extracted.sql,
            confidence,
            confidence_source,
            low_confidence: confidence < self.confidence_threshold,
            model: completion.model,
            prompt_chars,
        })
    }
}
