//! Query Engine Tests (SQLite)
//!
//! Runs the executor against a real SQLite file.
//!
//! Test Categories:
//! 1. Atomicity
//! 2. Template injection
//! 3. Identity handling
//! 4. Statement ordering and results

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use grest::query::sqlite::SqliteSource;
use grest::query::{
    ErrorClass, ExecutionContext, ExecutorOptions, PoolSettings, QueryError, QueryExecutor,
    StatementTemplate,
};

async fn executor(dir: &TempDir, options: ExecutorOptions) -> QueryExecutor {
    let url = format!("sqlite://{}", dir.path().join("engine.db").display());
    let source = SqliteSource::connect(&url, PoolSettings::default()).await.unwrap();
    QueryExecutor::new(Arc::new(source), options).unwrap()
}

fn statements(raw: &[&str]) -> Vec<StatementTemplate> {
    raw.iter()
        .enumerate()
        .map(|(i, sql)| StatementTemplate::compile(format!("s{}", i), sql).unwrap())
        .collect()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

fn ctx(template: Value, bound: Value) -> ExecutionContext {
    ExecutionContext::new(object(template), object(bound))
}

async fn setup_orders(executor: &QueryExecutor) {
    executor
        .execute(
            "",
            &statements(&["CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT NOT NULL)"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap();
}

async fn order_count(executor: &QueryExecutor) -> Value {
    let rows = executor
        .execute(
            "",
            &statements(&["SELECT COUNT(*) AS n FROM orders"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap();
    rows[0]["n"].clone()
}

// =============================================================================
// ATOMICITY
// =============================================================================

/// Test: A failing later statement discards the writes of earlier ones.
#[tokio::test]
async fn test_failed_statement_rolls_back_whole_route() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;
    setup_orders(&executor).await;

    let err = executor
        .execute(
            "",
            &statements(&[
                "INSERT INTO orders (item) VALUES (:item)",
                "INSERT INTO no_such_table (item) VALUES (:item)",
            ]),
            &ctx(json!({}), json!({"item": "pen"})),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Statement { ref statement, .. } if statement == "s1"));
    assert_eq!(order_count(&executor).await, json!(0));
}

/// Test: Constraint violations are client errors and leave no partial write.
#[tokio::test]
async fn test_constraint_violation_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;
    setup_orders(&executor).await;

    let err = executor
        .execute(
            "",
            &statements(&[
                "INSERT INTO orders (item) VALUES ('kept only on success')",
                "INSERT INTO orders (item) VALUES (:item)",
            ]),
            &ctx(json!({}), json!({"item": null})),
        )
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::BadRequest);
    assert_eq!(order_count(&executor).await, json!(0));
}

// =============================================================================
// TEMPLATE INJECTION
// =============================================================================

/// Test: A template param that is not an identifier never reaches the database.
#[tokio::test]
async fn test_injection_through_template_param_rejected() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;
    setup_orders(&executor).await;

    let err = executor
        .execute(
            "",
            &statements(&["SELECT * FROM {{table}}"]),
            &ctx(json!({"table": "orders; DROP TABLE orders"}), json!({})),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Validation(_)));
    assert_eq!(err.class(), ErrorClass::BadRequest);
    assert_eq!(order_count(&executor).await, json!(0));
}

/// Test: Nested keys are checked as well as values.
#[tokio::test]
async fn test_injection_through_body_key_rejected() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;

    let err = executor
        .execute(
            "",
            &statements(&[
                "CREATE TABLE t ({{#each body}}{{@key}} {{@value}}{{/each}})",
            ]),
            &ctx(
                json!({"body": {"id INTEGER); DROP TABLE users; --": "TEXT"}}),
                json!({}),
            ),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Validation(_)));
}

/// Test: Bound values are data, however hostile their content.
#[tokio::test]
async fn test_bound_values_are_not_interpreted() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;
    setup_orders(&executor).await;

    let hostile = "x'); DROP TABLE orders; --";
    let rows = executor
        .execute(
            "",
            &statements(&[
                "INSERT INTO orders (item) VALUES (:item)",
                "SELECT item FROM orders",
            ]),
            &ctx(json!({}), json!({"item": hostile})),
        )
        .await
        .unwrap();

    assert_eq!(rows[0]["item"], json!(hostile));
    assert_eq!(order_count(&executor).await, json!(1));
}

// =============================================================================
// IDENTITY
// =============================================================================

fn session_role_options() -> ExecutorOptions {
    ExecutorOptions {
        impersonate_statement: Some("INSERT INTO session_role (name) VALUES ('{{role}}')".into()),
        reset_statement: Some("DELETE FROM session_role".into()),
        ..ExecutorOptions::default()
    }
}

async fn current_role(executor: &QueryExecutor, identity: &str) -> Value {
    let rows = executor
        .execute(
            identity,
            &statements(&["SELECT name FROM session_role"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    rows[0]["name"].clone()
}

/// Test: Statements run under the caller's identity, or the anonymous role.
#[tokio::test]
async fn test_statements_run_under_effective_identity() {
    let dir = TempDir::new().unwrap();
    let plain = executor(&dir, ExecutorOptions::default()).await;
    plain
        .execute(
            "",
            &statements(&["CREATE TABLE session_role (name TEXT NOT NULL)"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap();

    let executor = executor(&dir, session_role_options()).await;
    assert_eq!(current_role(&executor, "alice").await, json!("alice"));
    assert_eq!(current_role(&executor, "").await, json!("anon"));
    assert_eq!(current_role(&executor, "alice'; --").await, json!("anon"));
}

/// Test: The reset statement runs before commit, so no identity leaks.
#[tokio::test]
async fn test_identity_reset_before_commit() {
    let dir = TempDir::new().unwrap();
    let plain = executor(&dir, ExecutorOptions::default()).await;
    plain
        .execute(
            "",
            &statements(&["CREATE TABLE session_role (name TEXT NOT NULL)"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap();

    let executor = executor(&dir, session_role_options()).await;
    current_role(&executor, "bob").await;

    let rows = plain
        .execute(
            "",
            &statements(&["SELECT COUNT(*) AS n FROM session_role"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], json!(0));
}

/// Test: A refused identity switch is Unauthorized and runs nothing.
#[tokio::test]
async fn test_failed_impersonation_is_unauthorized() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, session_role_options()).await;

    let err = executor
        .execute(
            "alice",
            &statements(&["CREATE TABLE never (id INTEGER)"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Impersonation { ref role, .. } if role == "alice"));
    assert_eq!(err.class(), ErrorClass::Unauthorized);
}

// =============================================================================
// ORDERING AND RESULTS
// =============================================================================

/// Test: Only the last statement's rows are returned, after earlier writes.
#[tokio::test]
async fn test_last_statement_rows_returned() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;

    let rows = executor
        .execute(
            "",
            &statements(&[
                "CREATE TABLE {{table}} (id INTEGER PRIMARY KEY, label TEXT)",
                "INSERT INTO {{table}} (label) VALUES (:label)",
                "SELECT id, label FROM {{table}}",
            ]),
            &ctx(json!({"table": "things"}), json!({"label": "first"})),
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(Value::Object(rows[0].clone()), json!({"id": 1, "label": "first"}));
}

/// Test: Read-only routes return the same rows on repeated calls.
#[tokio::test]
async fn test_read_route_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;
    setup_orders(&executor).await;
    executor
        .execute(
            "",
            &statements(&["INSERT INTO orders (item) VALUES ('a'), ('b')"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap();

    let read = statements(&["SELECT item FROM orders ORDER BY id"]);
    let first = executor.execute("", &read, &ExecutionContext::empty()).await.unwrap();
    let second = executor.execute("", &read, &ExecutionContext::empty()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

/// Test: A bound name with no value fails before anything runs.
#[tokio::test]
async fn test_missing_bound_param() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, ExecutorOptions::default()).await;

    let err = executor
        .execute(
            "",
            &statements(&["SELECT :absent AS v"]),
            &ExecutionContext::empty(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::MissingBoundParam { ref name, .. } if name == "absent"));
    assert_eq!(err.class(), ErrorClass::BadRequest);
}
