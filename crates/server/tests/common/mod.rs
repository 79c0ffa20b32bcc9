//! # Common Test Utilities
//!
//! `TestApp` spawns the real router on a random port against a seeded
//! hospital database file, with the language model replaced by an
//! `httpmock::MockServer` speaking the OpenAI chat-completions format.

// Not every test file uses every helper.
#![allow(unused)]

use anyhow::Result;
use axum::serve;
use httpmock::MockServer;
use reqwest::Client;
use serde_json::json;
use sqlrag::providers::db::SqliteDatabase;
use sqlrag_server::{config, router, state::build_app_state, state::AppState};
use sqlrag_test_utils::HOSPITAL_SQL;
use std::{fs::File, io::Write, net::SocketAddr, time::Duration};
use tempfile::{tempdir, TempDir};
use tokio::{net::TcpListener, task::JoinHandle};

pub const CHAT_PATH: &str = "/v1/chat/completions";

/// A chat-completions response body carrying `content`.
pub fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "model": "mock-chat-model",
        "choices": [{
            "message": { "role": "assistant", "content": content }
        }]
    })
}

pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub mock_server: MockServer,
    pub app_state: AppState,
    _dir: TempDir,
    _server_handle: JoinHandle<()>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestApp {
    pub async fn spawn() -> Result<Self> {
        dotenvy::dotenv().ok();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .compact()
            .try_init();

        let mock_server = MockServer::start();
        let dir = tempdir()?;
        let db_path = dir.path().join("target.db");
        let state_path = dir.path().join("state.db");

        {
            let seed =
                SqliteDatabase::new(db_path.to_str().unwrap(), Duration::from_secs(5)).await?;
            seed.initialize_with_data(HOSPITAL_SQL).await?;
        }

        let config_path = dir.path().join("config.yml");
        let config_content = format!(
            r#"
port: 0
db_url: "{}"
database:
  state_path: "{}"
  query_timeout_secs: 5
llm:
  provider: "local"
  api_url: "{}"
  model: "mock-chat-model"
  timeout_secs: 5
embedding:
  provider: "hashing"
  dimensions: 256
monitor:
  enabled: false
"#,
            db_path.to_str().unwrap(),
            state_path.to_str().unwrap(),
            mock_server.url(CHAT_PATH)
        );
        let mut file = File::create(&config_path)?;
        file.write_all(config_content.as_bytes())?;

        let config = config::get_config(Some(config_path.to_str().unwrap()))?;
        let app_state = build_app_state(config).await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let address = format!("http://{addr}");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let router_state = app_state.clone();
        let server_handle = tokio::spawn(async move {
            let app = router::create_router(router_state);
            let server = serve(listener, app).with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            if let Err(e) = server.await {
                tracing::error!("[TestApp] Server error: {}", e);
            }
        });

        Ok(Self {
            address,
            client: Client::new(),
            mock_server,
            app_state,
            _dir: dir,
            _server_handle: server_handle,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
