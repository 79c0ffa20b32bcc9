//! # Statement Analysis
//!
//! Tokenizes and parses a candidate statement exactly once and collects the
//! facts every checker needs: referenced tables and aliases, column
//! references, join count, nesting depth, filters and limits.

use sqlparser::ast::{
    Expr, JoinOperator, Query, Select, SelectItem, SetExpr, Statement, TableFactor, Visit,
    Visitor,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::collections::BTreeSet;
use std::ops::ControlFlow;

const AGGREGATES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX", "TOTAL", "GROUP_CONCAT"];

/// A base table reference as written in a FROM or JOIN clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

/// Per-SELECT facts used by the large-table scan rule.
#[derive(Debug, Clone, Default)]
pub struct SelectFacts {
    pub tables: Vec<String>,
    /// WHERE, GROUP BY or HAVING present.
    pub filtered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryFacts {
    pub tables: Vec<TableRef>,
    /// Lowercased CTE names.
    pub cte_names: BTreeSet<String>,
    /// Lowercased aliases of derived tables.
    pub derived_aliases: BTreeSet<String>,
    /// A derived table, CTE or table function is in scope somewhere.
    pub has_derived: bool,
    pub columns: Vec<String>,
    /// `(qualifier, column)` pairs.
    pub qualified_columns: Vec<(String, String)>,
    pub wildcard_qualifiers: Vec<String>,
    /// Lowercased projection aliases.
    pub projection_aliases: BTreeSet<String>,
    pub join_count: usize,
    /// 1 for a flat query, 2 with one level of subquery, and so on.
    pub max_query_depth: usize,
    pub cartesian: bool,
    pub selects: Vec<SelectFacts>,
    pub has_aggregate: bool,
    /// The outermost query carries LIMIT or FETCH.
    pub has_limit: bool,
    pub has_offset: bool,
    pub select_into: bool,
    /// Rendered WHERE clause of the outermost SELECT.
    pub filter: Option<String>,
}

impl QueryFacts {
    /// Distinct base table names in first-seen order, CTE names excluded.
    pub fn table_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.tables
            .iter()
            .filter(|t| !self.cte_names.contains(&t.name.to_lowercase()))
            .filter(|t| seen.insert(t.name.to_lowercase()))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Nested subquery levels below the outermost query.
    pub fn subquery_depth(&self) -> usize {
        self.max_query_depth.saturating_sub(1)
    }
}

/// A candidate statement, parsed once and shared by all checkers.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: String,
    pub tokens: Vec<Token>,
    pub statements: Vec<Statement>,
    pub parse_error: Option<String>,
    pub facts: Option<QueryFacts>,
}

impl SqlStatement {
    pub fn analyze(sql: &str) -> Self {
        let dialect = SQLiteDialect {};
        let tokens = Tokenizer::new(&dialect, sql).tokenize();
        let (tokens, tokenize_error) = match tokens {
            Ok(tokens) => (tokens, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        let (statements, parse_error) = match tokenize_error {
            Some(e) => (Vec::new(), Some(e)),
            None => match Parser::parse_sql(&dialect, sql) {
                Ok(statements) if statements.is_empty() => {
                    (statements, Some("no statement found".to_string()))
                }
                Ok(statements) => (statements, None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            },
        };

        let facts = match statements.as_slice() {
            [statement @ Statement::Query(_)] => {
                let mut collector = FactCollector::default();
                let _ = statement.visit(&mut collector);
                Some(collector.facts)
            }
            _ => None,
        };

        Self {
            sql: sql.to_string(),
            tokens,
            statements,
            parse_error,
            facts,
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.parse_error.is_none()
    }

    /// The single top-level query, if that is what was parsed.
    pub fn query(&self) -> Option<&Query> {
        match self.statements.as_slice() {
            [Statement::Query(query)] => Some(query),
            _ => None,
        }
    }

    /// Uppercased first keyword of the statement.
    pub fn leading_keyword(&self) -> Option<String> {
        self.tokens
            .iter()
            .find_map(|t| match t {
                Token::Word(w) => Some(w.value.to_uppercase()),
                Token::Whitespace(_) | Token::LParen => None,
                _ => Some(String::new()),
            })
            .filter(|k| !k.is_empty())
    }

    /// Lowercased words outside string literals, comment text included, in order.
    pub fn words_outside_literals(&self) -> Vec<String> {
        let mut words = Vec::new();
        for token in &self.tokens {
            match token {
                Token::Word(w) => push_words(&w.value, &mut words),
                Token::Whitespace(Whitespace::SingleLineComment { comment, .. })
                | Token::Whitespace(Whitespace::MultiLineComment(comment)) => {
                    push_words(comment, &mut words)
                }
                _ => {}
            }
        }
        words
    }

    /// Unquoted keywords plus comment words, uppercased. Used for forbidden-word scans.
    pub fn bare_words(&self) -> Vec<String> {
        let mut words = Vec::new();
        for token in &self.tokens {
            match token {
                Token::Word(w) if w.quote_style.is_none() => words.push(w.value.to_uppercase()),
                Token::Whitespace(Whitespace::SingleLineComment { comment, .. })
                | Token::Whitespace(Whitespace::MultiLineComment(comment)) => words.extend(
                    comment
                        .split(|c: char| !c.is_alphanumeric() && c != '_')
                        .filter(|w| !w.is_empty())
                        .map(str::to_uppercase),
                ),
                _ => {}
            }
        }
        words
    }

    /// True when the last meaningful token is a comment, so appending text would be swallowed.
    pub fn ends_with_comment(&self) -> bool {
        self.tokens
            .iter()
            .rev()
            .find(|t| {
                !matches!(
                    t,
                    Token::Whitespace(Whitespace::Space)
                        | Token::Whitespace(Whitespace::Newline)
                        | Token::Whitespace(Whitespace::Tab)
                        | Token::SemiColon
                )
            })
            .map(|t| {
                matches!(
                    t,
                    Token::Whitespace(Whitespace::SingleLineComment { .. })
                        | Token::Whitespace(Whitespace::MultiLineComment(_))
                )
            })
            .unwrap_or(false)
    }
}

fn push_words(text: &str, out: &mut Vec<String>) {
    out.extend(
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase),
    );
}

#[derive(Default)]
struct FactCollector {
    facts: QueryFacts,
    depth: usize,
}

impl FactCollector {
    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.collect_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            // Parenthesized queries are reached through `pre_visit_query`.
            _ => {}
        }
    }

    fn collect_select(&mut self, select: &Select) {
        if select.into.is_some() {
            self.facts.select_into = true;
        }

        for item in &select.projection {
            match item {
                SelectItem::ExprWithAlias { alias, .. } => {
                    self.facts.projection_aliases.insert(alias.value.to_lowercase());
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    if let Some(qualifier) = name.0.last() {
                        self.facts.wildcard_qualifiers.push(qualifier.value.clone());
                    }
                }
                _ => {}
            }
        }

        let mut tables = Vec::new();
        for twj in &select.from {
            self.collect_factor(&twj.relation, &mut tables);
            for join in &twj.joins {
                self.facts.join_count += 1;
                if matches!(join.join_operator, JoinOperator::CrossJoin) {
                    self.facts.cartesian = true;
                }
                self.collect_factor(&join.relation, &mut tables);
            }
        }

        if select.from.len() >= 2 && select.selection.is_none() {
            self.facts.cartesian = true;
        }

        let grouped = match &select.group_by {
            sqlparser::ast::GroupByExpr::All => true,
            sqlparser::ast::GroupByExpr::Expressions(exprs) => !exprs.is_empty(),
        };
        let filtered = select.selection.is_some() || select.having.is_some() || grouped;

        if self.depth == 1 && self.facts.filter.is_none() {
            self.facts.filter = select.selection.as_ref().map(|e| e.to_string());
        }

        self.facts.selects.push(SelectFacts { tables, filtered });
    }

    fn collect_factor(&mut self, factor: &TableFactor, tables: &mut Vec<String>) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                if let Some(ident) = name.0.last() {
                    let table = ident.value.clone();
                    tables.push(table.clone());
                    self.facts.tables.push(TableRef {
                        name: table,
                        alias: alias.as_ref().map(|a| a.name.value.clone()),
                    });
                }
            }
            TableFactor::Derived { alias, .. } => {
                self.facts.has_derived = true;
                if let Some(alias) = alias {
                    self.facts.derived_aliases.insert(alias.name.value.to_lowercase());
                }
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.collect_factor(&table_with_joins.relation, tables);
                for join in &table_with_joins.joins {
                    self.facts.join_count += 1;
                    if matches!(join.join_operator, JoinOperator::CrossJoin) {
                        self.facts.cartesian = true;
                    }
                    self.collect_factor(&join.relation, tables);
                }
            }
            _ => self.facts.has_derived = true,
        }
    }
}

impl Visitor for FactCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.depth += 1;
        self.facts.max_query_depth = self.facts.max_query_depth.max(self.depth);

        if self.depth == 1 {
            self.facts.has_limit = query.limit.is_some() || query.fetch.is_some();
            self.facts.has_offset = query.offset.is_some();
        }
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.facts.has_derived = true;
                self.facts.cte_names.insert(cte.alias.name.value.to_lowercase());
            }
        }
        self.collect_set_expr(&query.body);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.facts.columns.push(ident.value.clone()),
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let qualifier = parts[parts.len() - 2].value.clone();
                let column = parts[parts.len() - 1].value.clone();
                self.facts.qualified_columns.push((qualifier, column));
            }
            Expr::Function(function) => {
                let is_aggregate = function
                    .name
                    .0
                    .last()
                    .map(|n| AGGREGATES.contains(&n.value.to_uppercase().as_str()))
                    .unwrap_or(false);
                if is_aggregate {
                    self.facts.has_aggregate = true;
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_tables_aliases_and_columns() {
        let stmt = SqlStatement::analyze(
            "SELECT a.admit_date, p.name FROM admissions a JOIN patients p ON a.patient_id = p.id WHERE a.unit = 'medical'",
        );
        let facts = stmt.facts.expect("query facts");
        assert_eq!(facts.table_names(), vec!["admissions", "patients"]);
        assert_eq!(facts.join_count, 1);
        assert!(facts
            .qualified_columns
            .contains(&("a".to_string(), "admit_date".to_string())));
        assert_eq!(facts.filter.as_deref(), Some("a.unit = 'medical'"));
    }

    #[test]
    fn measures_subquery_depth() {
        let stmt = SqlStatement::analyze(
            "SELECT id FROM patients WHERE id IN (SELECT patient_id FROM admissions WHERE unit IN (SELECT name FROM units))",
        );
        assert_eq!(stmt.facts.unwrap().subquery_depth(), 2);
    }

    #[test]
    fn string_literals_are_not_words() {
        let stmt = SqlStatement::analyze("SELECT 'drop table' FROM patients -- note here");
        let words = stmt.words_outside_literals();
        assert!(!words.contains(&"drop".to_string()));
        assert!(words.contains(&"note".to_string()));
        assert!(stmt.ends_with_comment());
    }

    #[test]
    fn non_query_statements_have_no_facts() {
        let stmt = SqlStatement::analyze("DROP TABLE patients");
        assert!(stmt.is_parsed());
        assert!(stmt.facts.is_none());
        assert_eq!(stmt.leading_keyword().as_deref(), Some("DROP"));
    }
}
