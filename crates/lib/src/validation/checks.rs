//! The six checkers, in pipeline order.

use super::{CheckContext, CheckOutcome, Violation, ViolationKind};
use crate::schema::SchemaSnapshot;
use sqlparser::ast::{Expr, Fetch, Statement, Value};
use std::collections::BTreeSet;

/// Words that never belong in a read-only query, outside string literals.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "INSERT",
    "UPDATE",
    "DELETE",
    "MERGE",
    "UPSERT",
    "GRANT",
    "REVOKE",
    "EXEC",
    "EXECUTE",
    "ATTACH",
    "DETACH",
    "PRAGMA",
    "VACUUM",
    "REINDEX",
    "XP_CMDSHELL",
    "SP_EXECUTESQL",
];

/// Phrases that only show up when model instructions leak into the statement.
const INJECTION_MARKERS: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous",
    "disregard the above",
    "system prompt",
    "you are an ai",
];

/// Identifiers SQLite resolves without a table.
const BUILTIN_IDENTIFIERS: &[&str] = &[
    "current_date",
    "current_time",
    "current_timestamp",
    "rowid",
    "true",
    "false",
    "null",
];

const SUGGESTION_THRESHOLD: f64 = 0.8;

pub trait Checker: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &CheckContext<'_>) -> CheckOutcome;
}

fn forbidden_word(words: &[String]) -> Option<&String> {
    words
        .iter()
        .find(|w| FORBIDDEN_KEYWORDS.contains(&w.as_str()))
}

/// Closest known name by Jaro-Winkler similarity, if it is close enough.
pub fn suggest<'a>(needle: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let needle = needle.to_lowercase();
    candidates
        .into_iter()
        .map(|c| (strsim::jaro_winkler(&needle, &c.to_lowercase()), c))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, c)| c.to_string())
}

// --- 1. Syntax ---

pub struct SyntaxCheck;

impl Checker for SyntaxCheck {
    fn name(&self) -> &'static str {
        "syntax"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckOutcome {
        let Some(error) = &ctx.statement.parse_error else {
            return CheckOutcome::Pass;
        };
        // Unparseable statements carrying a forbidden keyword are reported by the
        // allowlist, so a mangled DROP is never softened into a syntax error.
        if forbidden_word(&ctx.statement.bare_words()).is_some() {
            return CheckOutcome::Pass;
        }
        CheckOutcome::Reject(Violation::new(
            ViolationKind::SyntaxError,
            format!("statement does not parse as SQLite SQL: {error}"),
        ))
    }
}

// --- 2. Operation allowlist ---

pub struct OperationAllowlist;

impl Checker for OperationAllowlist {
    fn name(&self) -> &'static str {
        "operation_allowlist"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckOutcome {
        let statement = ctx.statement;
        let forbidden = |keyword: &str, message: String| {
            CheckOutcome::Reject(
                Violation::new(ViolationKind::ForbiddenOperation, message).with_identifier(keyword),
            )
        };

        if statement.statements.len() > 1 {
            return forbidden(
                ";",
                format!(
                    "{} stacked statements; only a single SELECT is allowed",
                    statement.statements.len()
                ),
            );
        }

        if let Some(word) = forbidden_word(&statement.bare_words()) {
            return forbidden(word, format!("'{word}' is not permitted in read-only queries"));
        }

        match statement.statements.first() {
            Some(Statement::Query(_)) => {}
            Some(_) => {
                let keyword = statement.leading_keyword().unwrap_or_default();
                return forbidden(
                    &keyword,
                    format!("top-level operation '{keyword}' is not SELECT"),
                );
            }
            // Unparsed text only reaches this point when it held a forbidden word.
            None => return CheckOutcome::Pass,
        }

        if statement.facts.as_ref().map(|f| f.select_into).unwrap_or(false) {
            return forbidden("INTO", "SELECT ... INTO writes data".to_string());
        }

        CheckOutcome::Pass
    }
}

// --- 3. Schema references ---

pub struct SchemaReferenceCheck;

impl SchemaReferenceCheck {
    fn unknown(identifier: &str, suggestion: Option<String>, what: &str) -> CheckOutcome {
        CheckOutcome::Reject(
            Violation::new(
                ViolationKind::UnknownReference,
                format!("{what} '{identifier}' does not exist in the current schema"),
            )
            .with_identifier(identifier)
            .with_suggestion(suggestion),
        )
    }
}

impl Checker for SchemaReferenceCheck {
    fn name(&self) -> &'static str {
        "schema_reference"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckOutcome {
        let Some(facts) = &ctx.statement.facts else {
            return CheckOutcome::Pass;
        };
        let snapshot: &SchemaSnapshot = ctx.snapshot;

        // Tables, including through aliases.
        let mut base_tables: Vec<&str> = Vec::new();
        let mut qualifiers: Vec<(String, Option<&str>)> = Vec::new();
        for table in &facts.tables {
            let lowered = table.name.to_lowercase();
            if facts.cte_names.contains(&lowered) {
                qualifiers.push((lowered, None));
                if let Some(alias) = &table.alias {
                    qualifiers.push((alias.to_lowercase(), None));
                }
                continue;
            }
            match snapshot.table(&table.name) {
                Some(schema_table) => {
                    base_tables.push(schema_table.name.as_str());
                    qualifiers.push((lowered, Some(schema_table.name.as_str())));
                    if let Some(alias) = &table.alias {
                        qualifiers.push((alias.to_lowercase(), Some(schema_table.name.as_str())));
                    }
                }
                None => {
                    return Self::unknown(
                        &table.name,
                        suggest(&table.name, snapshot.table_names()),
                        "table",
                    )
                }
            }
        }
        for derived in facts.derived_aliases.iter().chain(facts.cte_names.iter()) {
            qualifiers.push((derived.clone(), None));
        }

        let resolve = |qualifier: &str| -> Option<Option<&str>> {
            let lowered = qualifier.to_lowercase();
            qualifiers
                .iter()
                .find(|(name, _)| *name == lowered)
                .map(|(_, table)| *table)
        };

        for qualifier in &facts.wildcard_qualifiers {
            if resolve(qualifier).is_none() {
                return Self::unknown(
                    qualifier,
                    suggest(qualifier, qualifiers.iter().map(|(q, _)| q.as_str())),
                    "table or alias",
                );
            }
        }

        // Qualified columns.
        for (qualifier, column) in &facts.qualified_columns {
            match resolve(qualifier) {
                None => {
                    return Self::unknown(
                        qualifier,
                        suggest(qualifier, qualifiers.iter().map(|(q, _)| q.as_str())),
                        "table or alias",
                    )
                }
                // Columns of derived tables and CTEs are not in the snapshot.
                Some(None) => {}
                Some(Some(table)) => {
                    if !snapshot.has_column(table, column) {
                        let columns = snapshot
                            .table(table)
                            .map(|t| t.column_names().collect::<Vec<_>>())
                            .unwrap_or_default();
                        return Self::unknown(
                            &format!("{table}.{column}"),
                            suggest(column, columns).map(|c| format!("{table}.{c}")),
                            "column",
                        );
                    }
                }
            }
        }

        // Unqualified columns must belong to some referenced table.
        if !facts.has_derived {
            let builtins: BTreeSet<&str> = BUILTIN_IDENTIFIERS.iter().copied().collect();
            for column in &facts.columns {
                let lowered = column.to_lowercase();
                if builtins.contains(lowered.as_str())
                    || facts.projection_aliases.contains(&lowered)
                {
                    continue;
                }
                if !base_tables.iter().any(|t| snapshot.has_column(t, column)) {
                    let candidates: Vec<&str> = base_tables
                        .iter()
                        .filter_map(|t| snapshot.table(t))
                        .flat_map(|t| t.column_names())
                        .collect();
                    return Self::unknown(column, suggest(column, candidates), "column");
                }
            }
        }

        CheckOutcome::Pass
    }
}

// --- 4. Complexity ---

pub struct ComplexityCheck;

impl Checker for ComplexityCheck {
    fn name(&self) -> &'static str {
        "complexity"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckOutcome {
        let Some(facts) = &ctx.statement.facts else {
            return CheckOutcome::Pass;
        };
        let config = ctx.config;
        let exceeded = |message: String| {
            CheckOutcome::Reject(Violation::new(ViolationKind::ComplexityExceeded, message))
        };

        if facts.join_count > config.max_joins {
            return exceeded(format!(
                "{} joins exceed the limit of {}",
                facts.join_count, config.max_joins
            ));
        }
        if facts.subquery_depth() > config.max_subquery_depth {
            return exceeded(format!(
                "subquery depth {} exceeds the limit of {}",
                facts.subquery_depth(),
                config.max_subquery_depth
            ));
        }
        if facts.cartesian {
            return exceeded(
                "cartesian product: relations combined without a join condition".to_string(),
            );
        }

        if !facts.has_aggregate && !facts.has_limit {
            for select in facts.selects.iter().filter(|s| !s.filtered) {
                for table in &select.tables {
                    let rows = ctx.snapshot.table(table).and_then(|t| t.row_count);
                    if let Some(rows) = rows.filter(|r| *r >= config.large_table_rows) {
                        return CheckOutcome::Reject(
                            Violation::new(
                                ViolationKind::ComplexityExceeded,
                                format!(
                                    "unfiltered scan of large table '{table}' ({rows} rows) without WHERE, GROUP BY or LIMIT"
                                ),
                            )
                            .with_identifier(table.clone()),
                        );
                    }
                }
            }
        }

        CheckOutcome::Pass
    }
}

// --- 5. Row cap guard ---

/// Ensures every statement carries a LIMIT no larger than the configured cap.
/// The only checker that rewrites; running it on its own output changes nothing.
pub struct RowCapGuard;

impl RowCapGuard {
    fn literal_limit(expr: &Expr) -> Option<u64> {
        match expr {
            Expr::Value(Value::Number(n, _)) => n.parse().ok(),
            _ => None,
        }
    }

    /// Rewrites the row limit as `LIMIT {limit}`. SQLite has no FETCH, so
    /// any FETCH clause is folded into the LIMIT.
    fn clamp(statement: &Statement, limit: u64) -> Option<String> {
        let mut statement = statement.clone();
        match &mut statement {
            Statement::Query(query) => {
                query.limit = Some(Expr::Value(Value::Number(limit.to_string(), false)));
                query.fetch = None;
            }
            _ => return None,
        }
        Some(statement.to_string())
    }

    fn fetch_rewrite(statement: &Statement, fetch: &Fetch, cap: u64) -> CheckOutcome {
        let quantity = fetch.quantity.as_ref().and_then(Self::literal_limit);
        let (limit, note) = match quantity {
            Some(n) if n <= cap && !fetch.percent && !fetch.with_ties => {
                (n, format!("FETCH FIRST {n} ROWS rewritten as LIMIT {n}"))
            }
            _ => (cap, format!("FETCH clause replaced with LIMIT {cap}")),
        };
        match Self::clamp(statement, limit) {
            Some(sql) => CheckOutcome::Rewrite { sql, note },
            None => CheckOutcome::Pass,
        }
    }
}

impl Checker for RowCapGuard {
    fn name(&self) -> &'static str {
        "row_cap"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckOutcome {
        let cap = ctx.config.row_cap;
        let (Some(query), Some(facts), Some(statement)) = (
            ctx.statement.query(),
            ctx.statement.facts.as_ref(),
            ctx.statement.statements.first(),
        ) else {
            return CheckOutcome::Pass;
        };

        if let Some(fetch) = &query.fetch {
            return Self::fetch_rewrite(statement, fetch, cap);
        }
        if facts.has_limit {
            return match query.limit.as_ref().map(Self::literal_limit) {
                None => CheckOutcome::Pass,
                Some(Some(limit)) if limit <= cap => CheckOutcome::Pass,
                Some(limit) => match Self::clamp(statement, cap) {
                    Some(sql) => CheckOutcome::Rewrite {
                        sql,
                        note: match limit {
                            Some(limit) => format!("LIMIT {limit} clamped to {cap}"),
                            None => format!("non-literal LIMIT replaced with {cap}"),
                        },
                    },
                    None => CheckOutcome::Pass,
                },
            };
        }

        let sql = if facts.has_offset || ctx.statement.ends_with_comment() {
            match Self::clamp(statement, cap) {
                Some(sql) => sql,
                None => return CheckOutcome::Pass,
            }
        } else {
            let trimmed = ctx
                .statement
                .sql
                .trim_end()
                .trim_end_matches(';')
                .trim_end();
            format!("{trimmed} LIMIT {cap}")
        };

        CheckOutcome::Rewrite {
            sql,
            note: format!("appended LIMIT {cap}"),
        }
    }
}

// --- 6. Injection patterns ---

pub struct InjectionCheck;

impl InjectionCheck {
    /// Longest run of consecutive words shared by both sequences.
    fn longest_shared_run<'a>(question: &'a [String], sql: &[String]) -> &'a [String] {
        let mut best = (0, 0);
        let mut previous = vec![0usize; sql.len() + 1];
        for (i, q) in question.iter().enumerate() {
            let mut current = vec![0usize; sql.len() + 1];
            for (j, s) in sql.iter().enumerate() {
                if q == s {
                    current[j + 1] = previous[j] + 1;
                    if current[j + 1] > best.1 {
                        best = (i + 1 - current[j + 1], current[j + 1]);
                    }
                }
            }
            previous = current;
        }
        &question[best.0..best.0 + best.1]
    }
}

impl Checker for InjectionCheck {
    fn name(&self) -> &'static str {
        "injection"
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckOutcome {
        let sql_words = ctx.statement.words_outside_literals();
        let joined = sql_words.join(" ");

        if let Some(marker) = INJECTION_MARKERS.iter().find(|m| joined.contains(*m)) {
            return CheckOutcome::Reject(
                Violation::new(
                    ViolationKind::SuspiciousPattern,
                    format!("statement contains instruction text '{marker}'"),
                )
                .with_identifier(*marker),
            );
        }

        let Some(question) = ctx.question else {
            return CheckOutcome::Pass;
        };
        let question_words: Vec<String> = question
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let run = Self::longest_shared_run(&question_words, &sql_words);
        if run.len() >= ctx.config.min_leaked_words.max(1) {
            let phrase = run.join(" ");
            return CheckOutcome::Reject(
                Violation::new(
                    ViolationKind::SuspiciousPattern,
                    format!(
                        "{} consecutive words of the question appear verbatim outside string literals",
                        run.len()
                    ),
                )
                .with_identifier(phrase),
            );
        }

        CheckOutcome::Pass
    }
}
