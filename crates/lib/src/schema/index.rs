//! # Schema Index
//!
//! Searchable representation of one `SchemaSnapshot`: one chunk per table,
//! each embedded once. A rebuild produces a complete new `IndexGeneration`
//! which is then swapped in with a single atomic store. Requests that loaded
//! the previous generation keep using it until they finish.

use crate::{
    constants::CHARS_PER_TOKEN,
    errors::SqlRagError,
    providers::ai::{cosine_similarity, Embedder},
    schema::{SchemaSnapshot, TableSchema},
};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info};

/// Concurrent embedding requests during a rebuild.
const EMBED_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Table,
    Example,
    Rule,
}

/// A retrievable unit of context. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub kind: ChunkKind,
    /// Table name, example id or rule id that produced the chunk.
    pub source: String,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub snapshot_version: u64,
    pub indexed_at: DateTime<Utc>,
    pub token_estimate: usize,
}

impl IndexedChunk {
    pub fn new(
        id: String,
        kind: ChunkKind,
        source: String,
        content: String,
        embedding: Vec<f32>,
        snapshot_version: u64,
    ) -> Self {
        let token_estimate = estimate_tokens(&content);
        Self {
            id,
            kind,
            source,
            content,
            embedding,
            snapshot_version,
            indexed_at: Utc::now(),
            token_estimate,
        }
    }
}

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<IndexedChunk>,
    pub score: f32,
}

/// Rough token count used for context budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Orders by score descending, then most recently indexed first.
pub fn rank(chunks: &mut [ScoredChunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.chunk.indexed_at.cmp(&a.chunk.indexed_at))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// One complete, immutable build of the index.
#[derive(Debug)]
pub struct IndexGeneration {
    pub snapshot: Arc<SchemaSnapshot>,
    pub chunks: Vec<Arc<IndexedChunk>>,
    pub built_at: DateTime<Utc>,
}

/// The result of a retrieval, pinned to the generation it was served from.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub snapshot: Arc<SchemaSnapshot>,
    pub chunks: Vec<ScoredChunk>,
}

#[derive(Debug)]
pub struct SchemaIndex {
    embedder: Box<dyn Embedder>,
    current: ArcSwapOption<IndexGeneration>,
}

impl SchemaIndex {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            current: ArcSwapOption::empty(),
        }
    }

    /// Rebuilds every table chunk for `snapshot` and replaces the previous generation.
    ///
    /// If embedding fails part-way the previous generation stays in place.
    pub async fn index(&self, snapshot: Arc<SchemaSnapshot>) -> Result<(), SqlRagError> {
        let generation = self.build(snapshot).await?;
        self.install(generation);
        Ok(())
    }

    /// Embeds every table chunk of `snapshot` without making it visible.
    pub async fn build(
        &self,
        snapshot: Arc<SchemaSnapshot>,
    ) -> Result<IndexGeneration, SqlRagError> {
        let version = snapshot.version;
        let tables: Vec<(String, String)> = snapshot
            .tables
            .iter()
            .map(|table| (table.name.clone(), describe_table(&snapshot, table)))
            .collect();
        let chunks: Vec<Arc<IndexedChunk>> = stream::iter(tables)
            .map(|(name, content)| async move {
                let embedding = self.embedder.embed(&content).await?;
                Ok::<_, SqlRagError>(Arc::new(IndexedChunk::new(
                    format!("table:{}@{version}", name),
                    ChunkKind::Table,
                    name,
                    content,
                    embedding,
                    version,
                )))
            })
            .buffered(EMBED_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(IndexGeneration {
            snapshot,
            chunks,
            built_at: Utc::now(),
        })
    }

    /// Replaces the generation readers see.
    pub fn install(&self, generation: IndexGeneration) {
        info!(
            version = generation.snapshot.version,
            chunks = generation.chunks.len(),
            "Schema index rebuilt."
        );
        self.current.store(Some(Arc::new(generation)));
    }

    /// The generation readers currently see.
    pub fn generation(&self) -> Option<Arc<IndexGeneration>> {
        self.current.load_full()
    }

    pub fn snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current.load().as_ref().map(|g| g.snapshot.clone())
    }

    /// Embeds a query once so callers can score several stores with the same vector.
    pub async fn embed_query(&self, question: &str) -> Result<Vec<f32>, SqlRagError> {
        self.embedder.embed(question).await
    }

    /// The `k` table chunks most similar to `question`.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Retrieval, SqlRagError> {
        let generation = self.generation().ok_or(SqlRagError::IndexUnavailable)?;
        let query = self.embedder.embed(question).await?;
        Ok(Self::retrieve_from(&generation, &query, k))
    }

    /// Scores against an already-loaded generation with a precomputed query vector.
    pub fn retrieve_from(generation: &IndexGeneration, query: &[f32], k: usize) -> Retrieval {
        let mut scored: Vec<ScoredChunk> = generation
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(query, &chunk.embedding),
                chunk: chunk.clone(),
            })
            .collect();
        rank(&mut scored);
        scored.truncate(k);
        debug!(
            version = generation.snapshot.version,
            returned = scored.len(),
            "Retrieved schema chunks"
        );
        Retrieval {
            snapshot: generation.snapshot.clone(),
            chunks: scored,
        }
    }
}

/// Renders one table as prompt-ready text.
pub fn describe_table(snapshot: &SchemaSnapshot, table: &TableSchema) -> String {
    let mut text = format!("Table: {}\n", table.name);
    if let Some(description) = &table.description {
        let _ = writeln!(text, "Description: {description}");
    }
    if let Some(rows) = table.row_count {
        let _ = writeln!(text, "Rows: {rows}");
    }
    text.push_str("Columns:\n");
    for column in &table.columns {
        let _ = write!(text, "- {} ({}", column.name, column.data_type);
        if column.primary_key {
            text.push_str(", primary key");
        }
        if !column.nullable {
            text.push_str(", not null");
        }
        text.push(')');
        if !column.sample_values.is_empty() {
            let _ = write!(text, " e.g. {}", column.sample_values.join(", "));
        }
        text.push('\n');
    }
    let mut relationships = snapshot.relationships_of(&table.name).peekable();
    if relationships.peek().is_some() {
        text.push_str("Relationships:\n");
        for rel in relationships {
            let _ = writeln!(
                text,
                "- {}.{} -> {}.{}",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column
            );
        }
    }
    text
}
