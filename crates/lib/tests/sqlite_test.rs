mod common;

use crate::common::setup_tracing;
use sqlrag::providers::db::{Database, StateStore};
use sqlrag::schema::SchemaSnapshot;
use sqlrag::stores::{BusinessRule, ExampleQuery};
use sqlrag::types::ValidationConfig;
use sqlrag::validation::{ValidatedSql, Validator};
use sqlrag_test_utils::{hospital_metadata, TestSetup};
use tempfile::tempdir;

async fn validated(setup: &TestSetup, sql: &str) -> ValidatedSql {
    let snapshot = SchemaSnapshot::new(1, setup.db.fetch_schema_metadata().await.unwrap());
    let verdict = Validator::new(ValidationConfig::default()).validate(sql, &snapshot, None);
    Validator::validated(&verdict).expect("statement should pass validation")
}

#[tokio::test]
async fn introspects_hospital_schema() {
    setup_tracing();
    let setup = TestSetup::new().await.unwrap();
    let metadata = setup.db.fetch_schema_metadata().await.unwrap();

    let mut names: Vec<_> = metadata.tables.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["admissions", "patients", "units"]);

    let admissions = metadata.tables.iter().find(|t| t.name == "admissions").unwrap();
    assert_eq!(admissions.row_count, Some(4));
    let id = admissions.column("admission_id").unwrap();
    assert!(id.primary_key);
    assert_eq!(id.data_type, "INTEGER");
    let admit_date = admissions.column("admit_date").unwrap();
    assert!(!admit_date.nullable);
    assert!(!admit_date.sample_values.is_empty());
    assert!(admit_date.sample_values.len() <= 3);
    assert_eq!(admit_date.distinct_ratio, Some(0.5));
}

#[tokio::test]
async fn executes_validated_query() {
    setup_tracing();
    let setup = TestSetup::new().await.unwrap();
    let sql = validated(
        &setup,
        "SELECT u.name, COUNT(*) AS admitted FROM admissions a JOIN units u ON a.unit_id = u.unit_id WHERE u.unit_type = 'medical' GROUP BY u.name ORDER BY u.name",
    )
    .await;
    assert!(sql.was_rewritten());

    let result = setup.db.execute_readonly(&sql, 1000).await.unwrap();
    assert_eq!(result.columns, vec!["name", "admitted"]);
    assert_eq!(result.row_count, 2);
    assert!(!result.truncated);
    assert_eq!(result.rows[0]["name"], "Cardiology");
    assert_eq!(result.rows[0]["admitted"], 2);
    assert_eq!(result.rows[1]["name"], "Oncology");
}

#[tokio::test]
async fn stops_reading_at_row_cap() {
    setup_tracing();
    let setup = TestSetup::new().await.unwrap();
    let sql = validated(&setup, "SELECT admission_id FROM admissions ORDER BY admission_id").await;

    let result = setup.db.execute_readonly(&sql, 2).await.unwrap();
    assert_eq!(result.row_count, 2);
    assert!(result.truncated);
    assert!(result.summary().contains("2 rows"));
}

#[tokio::test]
async fn runtime_errors_are_execution_errors() {
    setup_tracing();
    let setup = TestSetup::new().await.unwrap();
    let sql = validated(&setup, "SELECT name FROM patients").await;
    setup.execute("DROP TABLE patients").await.unwrap();

    let err = setup.db.execute_readonly(&sql, 10).await.unwrap_err();
    assert!(matches!(err, sqlrag::SqlRagError::Execution(_)));
}

#[tokio::test]
async fn state_store_round_trips_snapshots() {
    setup_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.db");
    let store = StateStore::new(path.to_str().unwrap()).await.unwrap();

    for version in 1..=4 {
        let snapshot = SchemaSnapshot::new(version, hospital_metadata());
        store.save_snapshot(&snapshot, 3).await.unwrap();
    }
    let (snapshots, current) = store.load_snapshots().await.unwrap();
    let versions: Vec<u64> = snapshots.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![2, 3, 4]);
    assert_eq!(current, Some(4));
    assert_eq!(snapshots[2].tables.len(), 3);

    store.set_current_snapshot(3).await.unwrap();
    let (_, current) = store.load_snapshots().await.unwrap();
    assert_eq!(current, Some(3));
}

#[tokio::test]
async fn state_store_round_trips_examples_and_rules() {
    setup_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.db");
    let store = StateStore::new(path.to_str().unwrap()).await.unwrap();

    let example = ExampleQuery {
        id: "ex-1".into(),
        question: "patient names".into(),
        sql: "SELECT name FROM patients".into(),
        tables: vec!["patients".into()],
        columns: vec!["patients.name".into()],
        snapshot_version: 1,
        deprecated: false,
        created_at: chrono::Utc::now(),
    };
    store.save_example(&example).await.unwrap();
    store.mark_examples_deprecated(&["ex-1".to_string()]).await.unwrap();

    let rule = BusinessRule {
        id: "rule-1".into(),
        term: "medical units".into(),
        aliases: vec!["medical wards".into()],
        sql_fragment: Some("units.unit_type = 'medical'".into()),
        clarification: None,
        created_at: chrono::Utc::now(),
    };
    store.save_rule(&rule).await.unwrap();

    let examples = store.load_examples().await.unwrap();
    assert_eq!(examples.len(), 1);
    assert!(examples[0].deprecated);
    assert_eq!(examples[0].columns, vec!["patients.name"]);

    let rules = store.load_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].aliases, vec!["medical wards"]);
    assert_eq!(rules[0].clarification, None);
}
