use crate::{
    errors::SqlRagError,
    providers::{
        ai::{cosine_similarity, Embedder},
        db::sqlite::StateStore,
    },
    schema::{
        index::{rank, ChunkKind, IndexedChunk, ScoredChunk},
        SchemaSnapshot,
    },
    validation::{QueryFacts, SqlStatement, Validator},
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A previously validated question/SQL pair used as a few-shot exemplar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleQuery {
    pub id: String,
    pub question: String,
    pub sql: String,
    /// Base tables the SQL reads.
    pub tables: Vec<String>,
    /// `table.column` references the SQL makes.
    pub columns: Vec<String>,
    pub snapshot_version: u64,
    pub deprecated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ExampleEntry {
    example: ExampleQuery,
    chunk: Arc<IndexedChunk>,
}

#[derive(Debug)]
pub struct ExampleStore {
    embedder: Box<dyn Embedder>,
    entries: ArcSwap<Vec<Arc<ExampleEntry>>>,
    persistence: Option<Arc<StateStore>>,
}

fn chunk_content(question: &str, sql: &str) -> String {
    format!("Question: {question}\nSQL: {sql}")
}

/// Resolves the columns a query touches to `table.column` form where possible.
pub fn referenced_columns(facts: &QueryFacts, snapshot: &SchemaSnapshot) -> Vec<String> {
    let tables = facts.table_names();
    let mut out = BTreeSet::new();

    for (qualifier, column) in &facts.qualified_columns {
        let table = facts
            .tables
            .iter()
            .find(|t| {
                t.alias
                    .as_deref()
                    .map(|a| a.eq_ignore_ascii_case(qualifier))
                    .unwrap_or(false)
                    || t.name.eq_ignore_ascii_case(qualifier)
            })
            .and_then(|t| snapshot.table(&t.name));
        if let Some(table) = table {
            if let Some(col) = table.column(column) {
                out.insert(format!("{}.{}", table.name, col.name));
            }
        }
    }
    for column in &facts.columns {
        if let Some(table) = tables
            .iter()
            .filter_map(|t| snapshot.table(t))
            .find(|t| t.column(column).is_some())
        {
            if let Some(col) = table.column(column) {
                out.insert(format!("{}.{}", table.name, col.name));
            }
        }
    }
    out.into_iter().collect()
}

impl ExampleStore {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: ArcSwap::from_pointee(Vec::new()),
            persistence: None,
        }
    }

    /// Writes every change through to the state database.
    pub fn with_persistence(mut self, store: Arc<StateStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    async fn entry(&self, example: ExampleQuery) -> Result<Arc<ExampleEntry>, SqlRagError> {
        let content = chunk_content(&example.question, &example.sql);
        let embedding = self.embedder.embed(&example.question).await?;
        let chunk = Arc::new(IndexedChunk::new(
            format!("example:{}", example.id),
            ChunkKind::Example,
            example.id.clone(),
            content,
            embedding,
            example.snapshot_version,
        ));
        Ok(Arc::new(ExampleEntry { example, chunk }))
    }

    /// Re-embeds persisted examples at start-up, replacing the current contents.
    pub async fn load(&self, examples: Vec<ExampleQuery>) -> Result<(), SqlRagError> {
        let mut entries = Vec::with_capacity(examples.len());
        for example in examples {
            entries.push(self.entry(example).await?);
        }
        info!(count = entries.len(), "Loaded example queries.");
        self.entries.store(Arc::new(entries));
        Ok(())
    }

    /// Validates `sql` against `snapshot` and stores it as an exemplar.
    pub async fn add(
        &self,
        question: &str,
        sql: &str,
        validator: &Validator,
        snapshot: &SchemaSnapshot,
    ) -> Result<ExampleQuery, SqlRagError> {
        let verdict = validator.validate(sql, snapshot, None);
        if let Some(violation) = verdict.violation() {
            return Err(SqlRagError::Validation(violation.clone()));
        }

        let statement = SqlStatement::analyze(sql);
        let (tables, columns) = match &statement.facts {
            Some(facts) => (facts.table_names(), referenced_columns(facts, snapshot)),
            None => (Vec::new(), Vec::new()),
        };

        let example = ExampleQuery {
            id: Uuid::new_v4().to_string(),
            question: question.trim().to_string(),
            sql: sql.trim().trim_end_matches(';').to_string(),
            tables,
            columns,
            snapshot_version: snapshot.version,
            deprecated: false,
            created_at: Utc::now(),
        };

        let entry = self.entry(example.clone()).await?;
        if let Some(store) = &self.persistence {
            store.save_example(&example).await?;
        }
        self.entries.rcu(|old| {
            let mut next = old.as_ref().clone();
            next.push(entry.clone());
            next
        });
        info!(id = %example.id, tables = ?example.tables, "Added example query.");
        Ok(example)
    }

    /// The `m` non-deprecated examples most similar to the query vector.
    pub fn retrieve(&self, query: &[f32], m: usize) -> Vec<ScoredChunk> {
        let entries = self.entries.load();
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .filter(|e| !e.example.deprecated)
            .map(|e| ScoredChunk {
                score: cosine_similarity(query, &e.chunk.embedding),
                chunk: e.chunk.clone(),
            })
            .collect();
        rank(&mut scored);
        scored.truncate(m);
        scored
    }

    pub fn list(&self) -> Vec<ExampleQuery> {
        self.entries.load().iter().map(|e| e.example.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<ExampleQuery> {
        self.entries
            .load()
            .iter()
            .find(|e| e.example.id == id)
            .map(|e| e.example.clone())
    }

    /// Flags examples that read a removed table or column. Entries are kept.
    ///
    /// Returns the ids that changed.
    pub async fn deprecate_referencing(
        &self,
        removed_tables: &[String],
        removed_columns: &[(String, String)],
    ) -> Result<Vec<String>, SqlRagError> {
        let affected = |example: &ExampleQuery| {
            !example.deprecated
                && (example.tables.iter().any(|t| {
                    removed_tables.iter().any(|r| r.eq_ignore_ascii_case(t))
                }) || example.columns.iter().any(|c| {
                    removed_columns
                        .iter()
                        .any(|(t, col)| c.eq_ignore_ascii_case(&format!("{t}.{col}")))
                }))
        };

        let changed: Vec<String> = self
            .entries
            .load()
            .iter()
            .filter(|entry| affected(&entry.example))
            .map(|entry| entry.example.id.clone())
            .collect();
        if changed.is_empty() {
            return Ok(changed);
        }

        if let Some(store) = &self.persistence {
            store.mark_examples_deprecated(&changed).await?;
        }
        self.entries.rcu(|old| {
            old.iter()
                .map(|entry| {
                    if changed.contains(&entry.example.id) && !entry.example.deprecated {
                        let mut example = entry.example.clone();
                        example.deprecated = true;
                        Arc::new(ExampleEntry {
                            example,
                            chunk: entry.chunk.clone(),
                        })
                    } else {
                        entry.clone()
                    }
                })
                .collect::<Vec<_>>()
        });
        warn!(
            count = changed.len(),
            ids = ?changed,
            "Deprecated examples referencing removed schema objects."
        );
        Ok(changed)
    }
}
