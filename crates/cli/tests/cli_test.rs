//! # CLI Command Tests
//!
//! Runs the `sqlrag` binary against a seeded hospital database. None of
//! these commands reach the language model.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use sqlrag::providers::db::SqliteDatabase;
use sqlrag_test_utils::HOSPITAL_SQL;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

/// Seeds a target database and writes a config pointing at it.
async fn setup() -> (TempDir, String) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("target.db");
    let state_path = dir.path().join("state.db");

    let seed = SqliteDatabase::new(db_path.to_str().unwrap(), Duration::from_secs(5))
        .await
        .unwrap();
    seed.initialize_with_data(HOSPITAL_SQL).await.unwrap();
    drop(seed);

    let config_path = dir.path().join("config.yml");
    fs::write(
        &config_path,
        format!(
            "db_url: \"{}\"\ndatabase:\n  state_path: \"{}\"\nllm:\n  provider: \"local\"\n  api_url: \"http://127.0.0.1:9/v1/chat/completions\"\nembedding:\n  provider: \"hashing\"\n",
            db_path.display(),
            state_path.display()
        ),
    )
    .unwrap();
    let config = config_path.to_str().unwrap().to_string();
    (dir, config)
}

fn sqlrag(dir: &Path, config: &str) -> Command {
    let mut cmd = Command::cargo_bin("sqlrag").unwrap();
    cmd.current_dir(dir).arg("--config").arg(config);
    cmd
}

#[tokio::test]
async fn test_validate_command_pass_and_reject() {
    let (dir, config) = setup().await;

    sqlrag(dir.path(), &config)
        .arg("validate")
        .arg("SELECT name FROM patients")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"pass\""))
        .stdout(predicate::str::contains("LIMIT 1000"));

    sqlrag(dir.path(), &config)
        .arg("validate")
        .arg("DELETE FROM patients")
        .assert()
        .failure()
        .stdout(predicate::str::contains("ForbiddenOperation"))
        .stderr(predicate::str::contains("Command failed"));
}

#[tokio::test]
async fn test_examples_persist_between_runs() {
    let (dir, config) = setup().await;

    sqlrag(dir.path(), &config)
        .args(["examples", "add", "--question", "How many units are there?"])
        .args(["--sql", "SELECT COUNT(*) FROM units"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"units\""));

    sqlrag(dir.path(), &config)
        .args(["examples", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("How many units are there?"));
}

#[tokio::test]
async fn test_rules_add_requires_meaning() {
    let (dir, config) = setup().await;

    sqlrag(dir.path(), &config)
        .args(["rules", "add", "--term", "vip"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Command failed"));

    sqlrag(dir.path(), &config)
        .args(["rules", "add", "--term", "long stay"])
        .args(["--fragment", "julianday(discharge_date) - julianday(admit_date) > 7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("long stay"));
}

#[tokio::test]
async fn test_snapshot_commands() {
    let (dir, config) = setup().await;

    sqlrag(dir.path(), &config)
        .arg("drift")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"baseline_version\": 1"));

    sqlrag(dir.path(), &config)
        .arg("index")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"version\": 2"));

    sqlrag(dir.path(), &config)
        .arg("rollback")
        .arg("99")
        .assert()
        .failure();
}
