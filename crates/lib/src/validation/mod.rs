//! # Validation Pipeline
//!
//! Every candidate statement passes through a fixed, ordered list of checkers
//! before anything may execute it. Checkers are pure predicates except the row
//! cap guard, which may rewrite the statement. The pipeline stops at the first
//! rejection.
//!
//! A passing verdict is the only way to obtain a [`ValidatedSql`], and that is
//! the only type the database layer accepts for execution.

pub mod analysis;
pub mod checks;

pub use analysis::{QueryFacts, SqlStatement};
pub use checks::{
    Checker, ComplexityCheck, InjectionCheck, OperationAllowlist, RowCapGuard,
    SchemaReferenceCheck, SyntaxCheck,
};

use crate::{schema::SchemaSnapshot, types::ValidationConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    SyntaxError,
    ForbiddenOperation,
    UnknownReference,
    ComplexityExceeded,
    SuspiciousPattern,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::SyntaxError => "SyntaxError",
            ViolationKind::ForbiddenOperation => "ForbiddenOperation",
            ViolationKind::UnknownReference => "UnknownReference",
            ViolationKind::ComplexityExceeded => "ComplexityExceeded",
            ViolationKind::SuspiciousPattern => "SuspiciousPattern",
        };
        f.write_str(name)
    }
}

/// A single rejected rule, with the offending identifier when there is one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: ViolationKind,
    pub identifier: Option<String>,
    pub suggestion: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(rule: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            rule,
            identifier: None,
            suggestion: None,
            message: message.into(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean '{suggestion}'?)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Reject,
}

/// What one checker decided.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Pass,
    /// The statement passes once replaced with this text.
    Rewrite { sql: String, note: String },
    Reject(Violation),
}

/// The immutable result of validating one candidate statement.
///
/// Only this crate can construct one, so a passing verdict always comes from
/// an actual run of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ValidationVerdict {
    pub outcome: Outcome,
    pub violations: Vec<Violation>,
    pub explanation: String,
    /// Statement as generated.
    pub original_sql: String,
    /// Statement that may be executed; differs from `original_sql` only after a rewrite.
    pub final_sql: String,
    pub rewrites: Vec<String>,
    pub checks_run: Vec<String>,
    pub snapshot_version: u64,
}

impl ValidationVerdict {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    pub fn violation(&self) -> Option<&Violation> {
        self.violations.first()
    }
}

/// A statement that carries a passing verdict.
///
/// Fields are private and the only constructor is [`Validator::validated`], so
/// the text handed to the database is always the exact text that passed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSql {
    sql: String,
    snapshot_version: u64,
    rewritten: bool,
}

impl ValidatedSql {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    pub fn was_rewritten(&self) -> bool {
        self.rewritten
    }
}

/// Everything a checker may look at.
pub struct CheckContext<'a> {
    pub statement: &'a SqlStatement,
    pub snapshot: &'a SchemaSnapshot,
    pub question: Option<&'a str>,
    pub config: &'a ValidationConfig,
}

/// Runs the checkers in order.
pub struct Validator {
    checkers: Vec<Box<dyn Checker>>,
    config: ValidationConfig,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field(
                "checkers",
                &self.checkers.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}

impl Validator {
    /// The standard six-stage pipeline.
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            checkers: vec![
                Box::new(SyntaxCheck),
                Box::new(OperationAllowlist),
                Box::new(SchemaReferenceCheck),
                Box::new(ComplexityCheck),
                Box::new(RowCapGuard),
                Box::new(InjectionCheck),
            ],
            config,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate(
        &self,
        sql: &str,
        snapshot: &SchemaSnapshot,
        question: Option<&str>,
    ) -> ValidationVerdict {
        let mut statement = SqlStatement::analyze(sql);
        let mut rewrites = Vec::new();
        let mut checks_run = Vec::new();

        for checker in &self.checkers {
            checks_run.push(checker.name().to_string());
            let ctx = CheckContext {
                statement: &statement,
                snapshot,
                question,
                config: &self.config,
            };
            match checker.check(&ctx) {
                CheckOutcome::Pass => {}
                CheckOutcome::Rewrite { sql: rewritten, note } => {
                    debug!(checker = checker.name(), %note, "Statement rewritten");
                    rewrites.push(note);
                    statement = SqlStatement::analyze(&rewritten);
                }
                CheckOutcome::Reject(violation) => {
                    info!(
                        checker = checker.name(),
                        violation = %violation,
                        "Candidate SQL rejected"
                    );
                    return ValidationVerdict {
                        outcome: Outcome::Reject,
                        explanation: violation.to_string(),
                        violations: vec![violation],
                        original_sql: sql.to_string(),
                        final_sql: statement.sql.clone(),
                        rewrites,
                        checks_run,
                        snapshot_version: snapshot.version,
                    };
                }
            }
        }

        let explanation = if rewrites.is_empty() {
            format!("Passed {} checks.", checks_run.len())
        } else {
            format!("Passed {} checks; {}.", checks_run.len(), rewrites.join("; "))
        };

        ValidationVerdict {
            outcome: Outcome::Pass,
            violations: Vec::new(),
            explanation,
            original_sql: sql.to_string(),
            final_sql: statement.sql,
            rewrites,
            checks_run,
            snapshot_version: snapshot.version,
        }
    }

    /// Releases the executable statement for a passing verdict.
    pub fn validated(verdict: &ValidationVerdict) -> Option<ValidatedSql> {
        verdict.passed().then(|| ValidatedSql {
            sql: verdict.final_sql.clone(),
            snapshot_version: verdict.snapshot_version,
            rewritten: !verdict.rewrites.is_empty(),
        })
    }
}
