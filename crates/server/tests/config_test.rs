//! # Configuration Tests
//!
//! Environment variables are process-global, so every test here runs serially.

use serial_test::serial;
use sqlrag_server::config::{get_config, substitute_env_vars, ConfigError};
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const VARS: &[&str] = &[
    "PORT",
    "DB_URL",
    "SQLRAG_LLM__MODEL",
    "SQLRAG_VALIDATION__ROW_CAP",
    "TEST_LLM_URL",
];

fn clear_env_vars() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn defaults_fill_missing_sections() {
    clear_env_vars();
    let file = config_file("db_url: \"db/hospital.db\"\n");
    let config = get_config(Some(file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.port, 9090);
    assert_eq!(config.db_url, "db/hospital.db");
    assert_eq!(config.llm.provider, "ollama");
    assert_eq!(config.llm.timeout_secs, 45);
    assert_eq!(config.llm.temperature, 0.0);
    assert_eq!(config.embedding.provider, "hashing");
    assert_eq!(config.rag.token_budget, 2000);
    assert_eq!(config.validation.row_cap, 1000);
    assert_eq!(config.conversation.max_turns, 5);
    assert_eq!(config.monitor.retained_snapshots, 10);
    assert_eq!(config.slo.latency_ms, 5000);
    assert_eq!(config.pipeline().slo_latency_ms, 5000);
}

#[test]
#[serial]
fn substitutes_variables_with_defaults() {
    clear_env_vars();
    env::set_var("TEST_LLM_URL", "http://llm.internal:8080");
    let expanded =
        substitute_env_vars("a: ${TEST_LLM_URL}\nb: ${UNSET_FOR_TEST:fallback:1}\nc: ${UNSET_FOR_TEST}\n")
            .unwrap();
    assert_eq!(
        expanded,
        "a: http://llm.internal:8080\nb: fallback:1\nc: \n"
    );
    clear_env_vars();
}

#[test]
#[serial]
fn environment_overrides_file() {
    clear_env_vars();
    env::set_var("PORT", "9999");
    env::set_var("SQLRAG_LLM__MODEL", "llama3");
    env::set_var("SQLRAG_VALIDATION__ROW_CAP", "50");
    let file = config_file("port: 8000\nllm:\n  model: \"gemma:2b\"\n  timeout_secs: 10\n");

    let config = get_config(Some(file.path().to_str().unwrap())).unwrap();
    assert_eq!(config.port, 9999);
    assert_eq!(config.llm.model, "llama3");
    assert_eq!(config.llm.timeout_secs, 10);
    assert_eq!(config.validation.row_cap, 50);
    clear_env_vars();
}

#[test]
#[serial]
fn missing_override_file_is_not_found() {
    clear_env_vars();
    let result = get_config(Some("/nonexistent/sqlrag/config.yml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}
