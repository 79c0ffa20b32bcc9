use anyhow::Result;
use async_trait::async_trait;
use sqlrag::errors::SqlRagError;
use sqlrag::providers::ai::{AiProvider, Completion, DecodingParams, Prompt};
use sqlrag::providers::db::SqliteDatabase;
use sqlrag::schema::{ColumnSchema, Relationship, SchemaMetadata, SchemaSnapshot, TableSchema};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// --- Test Setup ---

/// Seed script for the hospital database used across tests.
pub const HOSPITAL_SQL: &str = "
    CREATE TABLE patients (
        patient_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        birth_date TEXT,
        gender TEXT
    );
    CREATE TABLE units (
        unit_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        unit_type TEXT NOT NULL
    );
    CREATE TABLE admissions (
        admission_id INTEGER PRIMARY KEY,
        patient_id INTEGER NOT NULL,
        unit_id INTEGER NOT NULL,
        admit_date TEXT NOT NULL,
        discharge_date TEXT,
        diagnosis TEXT
    );
    INSERT INTO patients VALUES (1, 'Alice Smith', '1980-02-11', 'F');
    INSERT INTO patients VALUES (2, 'Bob Jones', '1975-07-30', 'M');
    INSERT INTO patients VALUES (3, 'Carol White', '1992-11-05', 'F');
    INSERT INTO units VALUES (1, 'Cardiology', 'medical');
    INSERT INTO units VALUES (2, 'General Surgery', 'surgical');
    INSERT INTO units VALUES (3, 'Oncology', 'medical');
    INSERT INTO admissions VALUES (1, 1, 1, '2024-03-01', '2024-03-04', 'Arrhythmia');
    INSERT INTO admissions VALUES (2, 2, 2, '2024-03-01', NULL, 'Appendicitis');
    INSERT INTO admissions VALUES (3, 3, 3, '2024-03-02', NULL, 'Lymphoma');
    INSERT INTO admissions VALUES (4, 1, 1, '2024-03-02', NULL, 'Follow-up');
";

/// An isolated in-memory hospital database.
pub struct TestSetup {
    pub db: SqliteDatabase,
}

impl TestSetup {
    pub async fn new() -> Result<Self> {
        let db = SqliteDatabase::new(":memory:", Duration::from_secs(5)).await?;
        db.initialize_with_data(HOSPITAL_SQL).await?;
        Ok(Self { db })
    }

    /// Runs extra statements against the same database (e.g. to cause drift).
    pub async fn execute(&self, sql: &str) -> Result<()> {
        self.db.initialize_with_data(sql).await?;
        Ok(())
    }
}

fn column(name: &str, data_type: &str, primary_key: bool, samples: &[&str]) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: !primary_key,
        primary_key,
        sample_values: samples.iter().map(|s| s.to_string()).collect(),
        distinct_ratio: None,
    }
}

/// Schema metadata matching `HOSPITAL_SQL`, without touching a database.
pub fn hospital_metadata() -> SchemaMetadata {
    SchemaMetadata {
        tables: vec![
            TableSchema {
                name: "patients".into(),
                columns: vec![
                    column("patient_id", "INTEGER", true, &["1", "2"]),
                    column("name", "TEXT", false, &["Alice Smith", "Bob Jones"]),
                    column("birth_date", "TEXT", false, &["1980-02-11"]),
                    column("gender", "TEXT", false, &["F", "M"]),
                ],
                row_count: Some(3),
                description: None,
            },
            TableSchema {
                name: "units".into(),
                columns: vec![
                    column("unit_id", "INTEGER", true, &["1", "2"]),
                    column("name", "TEXT", false, &["Cardiology", "Oncology"]),
                    column("unit_type", "TEXT", false, &["medical", "surgical"]),
                ],
                row_count: Some(3),
                description: None,
            },
            TableSchema {
                name: "admissions".into(),
                columns: vec![
                    column("admission_id", "INTEGER", true, &["1", "2"]),
                    column("patient_id", "INTEGER", false, &["1", "2"]),
                    column("unit_id", "INTEGER", false, &["1", "2"]),
                    column("admit_date", "TEXT", false, &["2024-03-01"]),
                    column("discharge_date", "TEXT", false, &["2024-03-04"]),
                    column("diagnosis", "TEXT", false, &["Arrhythmia"]),
                ],
                row_count: Some(4),
                description: None,
            },
        ],
        relationships: vec![
            Relationship {
                from_table: "admissions".into(),
                from_column: "patient_id".into(),
                to_table: "patients".into(),
                to_column: "patient_id".into(),
            },
            Relationship {
                from_table: "admissions".into(),
                from_column: "unit_id".into(),
                to_table: "units".into(),
                to_column: "unit_id".into(),
            },
        ],
    }
}

/// Version 1 snapshot of the hospital schema.
pub fn hospital_snapshot() -> SchemaSnapshot {
    SchemaSnapshot::new(1, hospital_metadata())
}

// --- Mock AI Provider ---

#[derive(Debug, Default)]
struct MockState {
    queued: VecDeque<String>,
    keyed: Vec<(String, String)>,
    delays: VecDeque<Duration>,
    calls: Vec<Prompt>,
}

/// A scripted language model.
///
/// Queued responses are returned first, in order. After that, the first keyed
/// response whose key occurs in the user prompt is returned.
#[derive(Clone, Debug, Default)]
pub struct MockAiProvider {
    state: Arc<Mutex<MockState>>,
    mean_logprob: Option<f64>,
    delay: Option<Duration>,
}

impl MockAiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responds with `response` whenever the user prompt contains `key`.
    pub fn add_response(&self, key: &str, response: &str) {
        let mut state = self.state.lock().unwrap();
        state.keyed.push((key.to_string(), response.to_string()));
    }

    /// Responds with `response` on the next unanswered call.
    pub fn push_response(&self, response: &str) {
        self.state
            .lock()
            .unwrap()
            .queued
            .push_back(response.to_string());
    }

    /// Delays the next call by `delay`.
    pub fn push_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delays.push_back(delay);
    }

    /// Delays every call without a queued delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reports this mean token log-probability with every completion.
    pub fn with_logprob(mut self, mean_logprob: f64) -> Self {
        self.mean_logprob = Some(mean_logprob);
        self
    }

    /// The prompts received, oldest first.
    pub fn get_calls(&self) -> Vec<Prompt> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn complete(
        &self,
        prompt: &Prompt,
        _params: &DecodingParams,
        deadline: Duration,
    ) -> Result<Completion, SqlRagError> {
        let (delay, response) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(prompt.clone());
            let delay = state.delays.pop_front().or(self.delay);
            let response = state.queued.pop_front().or_else(|| {
                state
                    .keyed
                    .iter()
                    .find(|(key, _)| prompt.user.contains(key.as_str()))
                    .map(|(_, response)| response.clone())
            });
            (delay, response)
        };

        let work = async {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        };
        tokio::time::timeout(deadline, work)
            .await
            .map_err(|_| SqlRagError::GenerationTimeout(deadline))?;

        let text = response.ok_or_else(|| {
            SqlRagError::AiApi(format!(
                "MockAiProvider: no response programmed for prompt: '{}'",
                prompt.user
            ))
        })?;
        Ok(Completion {
            text,
            mean_logprob: self.mean_logprob,
            model: Some("mock".to_string()),
        })
    }
}
