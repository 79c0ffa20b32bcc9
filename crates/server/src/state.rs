//! # Application State
//!
//! Builds the shared `AppState` at startup: opens the target and state
//! databases, constructs the model and embedding providers, and restores the
//! pipeline. Background tasks are started separately so one-shot callers (the
//! CLI) can reuse the same construction without them.

use crate::config::AppConfig;
use anyhow::Context as _;
use sqlrag::{
    providers::{
        db::{SqliteDatabase, StateStore},
        factory::{create_ai_provider, create_embedder},
    },
    MonitorHandle, SqlRagExecutor,
};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// How often idle conversations are dropped.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// The shared application state, accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub executor: Arc<SqlRagExecutor>,
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    if path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory for '{path}'"))?;
        }
    }
    Ok(())
}

/// Builds the executor from the configuration and restores persisted state.
///
/// On return the current snapshot is indexed and questions can be answered.
pub async fn build_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    ensure_parent_dir(&config.db_url)?;
    ensure_parent_dir(&config.database.state_path)?;

    let database = SqliteDatabase::new(&config.db_url, config.query_timeout()).await?;
    let state = Arc::new(StateStore::new(&config.database.state_path).await?);
    let ai_provider = create_ai_provider(&config.llm)?;
    let embedder = create_embedder(&config.embedding)?;

    let executor = SqlRagExecutor::builder()
        .database(Box::new(database))
        .ai_provider(ai_provider)
        .embedder(embedder)
        .state_store(state)
        .retained_snapshots(config.monitor.retained_snapshots)
        .config(config.pipeline())
        .build()?;
    let version = executor.initialize().await?;
    info!(
        db_path = %config.db_url,
        state_path = %config.database.state_path,
        snapshot_version = version,
        "Initialized SQL-RAG pipeline."
    );

    Ok(AppState {
        config: Arc::new(config),
        executor: Arc::new(executor),
    })
}

/// The drift monitor and the idle-session purge. Both stop when dropped.
pub struct BackgroundTasks {
    _monitor: Option<MonitorHandle>,
    purge: JoinHandle<()>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.purge.abort();
    }
}

pub fn spawn_background_tasks(state: &AppState) -> BackgroundTasks {
    let monitor = state.config.monitor.enabled.then(|| {
        state
            .executor
            .monitor
            .clone()
            .spawn(Duration::from_secs(state.config.monitor.interval_secs))
    });

    let conversations = state.executor.conversations.clone();
    let purge = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            conversations.purge_expired().await;
        }
    });

    BackgroundTasks {
        _monitor: monitor,
        purge,
    }
}
