//! End-to-end coverage against file-backed SQLite targets.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use udom::{
    Compare, ConnectionManager, Predicate, Record, TargetConfig, TxState, Udom, UdomError,
    UqlOutcome, Value,
};

async fn open_db(dir: &TempDir, name: &str) -> Udom {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("udom=info")),
        )
        .with_test_writer()
        .try_init();

    let url = format!("sqlite:///{}", dir.path().join(name).display());
    let config = TargetConfig::new("sql", "sqlite", &url).unwrap();
    Udom::open_with(config, Arc::new(ConnectionManager::new()))
        .await
        .unwrap()
}

fn user(name: &str, age: i64) -> Record {
    Record::new().with_field("name", name).with_field("age", age)
}

#[tokio::test]
async fn create_and_find_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "roundtrip.db").await;

    let id = db.create("users", &user("ada", 36)).await.unwrap();
    assert!(id.is_some());
    db.create("users", &user("grace", 45)).await.unwrap();
    db.create("users", &user("linus", 12)).await.unwrap();

    let adults = db
        .find("users", &Predicate::new().and("age", Compare::Gte, 18i64))
        .await
        .unwrap();
    assert_eq!(adults.len(), 2);

    let all = db.find("users", &Predicate::match_all()).await.unwrap();
    assert_eq!(all.len(), 3);

    let ada = db
        .find("users", &Predicate::new().eq("name", "ada"))
        .await
        .unwrap();
    assert_eq!(ada.len(), 1);
    assert_eq!(ada[0].get("age"), Some(&Value::Int(36)));
}

#[tokio::test]
async fn ordered_and_limited_find() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "ordered.db").await;

    for (name, age) in [("a", 10i64), ("b", 30), ("c", 20)] {
        db.create("users", &user(name, age)).await.unwrap();
    }

    let top = db
        .find_with(
            "users",
            &Predicate::match_all(),
            Some(&udom::OrderBy::desc("age")),
            Some(2),
        )
        .await
        .unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].get("name"), Some(&Value::Text("b".into())));
    assert_eq!(top[1].get("name"), Some(&Value::Text("c".into())));
}

#[tokio::test]
async fn update_returns_match_count() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "update.db").await;

    db.create("users", &user("ada", 36)).await.unwrap();
    db.create("users", &user("grace", 45)).await.unwrap();

    let changed = db
        .update(
            "users",
            &Record::new().with_field("age", 50i64),
            &Predicate::new().and("age", Compare::Gt, 40i64),
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let fifty = db
        .find("users", &Predicate::new().eq("age", 50i64))
        .await
        .unwrap();
    assert_eq!(fifty.len(), 1);
    assert_eq!(fifty[0].get("name"), Some(&Value::Text("grace".into())));
}

#[tokio::test]
async fn delete_is_exact_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "delete.db").await;

    db.create("users", &user("ada", 36)).await.unwrap();
    db.create("users", &user("grace", 45)).await.unwrap();

    let removed = db
        .delete("users", &Predicate::new().eq("name", "ada"))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    // Second delete of the same predicate is a successful no-op.
    let removed = db
        .delete("users", &Predicate::new().eq("name", "ada"))
        .await
        .unwrap();
    assert_eq!(removed, 0);

    let remaining = db.find("users", &Predicate::match_all()).await.unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn scoped_transaction_commits_on_ok() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "tx_ok.db").await;
    db.create("users", &user("ada", 36)).await.unwrap();

    db.transaction(|tx| async move {
        tx.create("users", &user("grace", 45)).await?;
        tx.create("users", &user("linus", 12)).await?;
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(db.tx_state().await, TxState::Committed);
    let all = db.find("users", &Predicate::match_all()).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn scoped_transaction_rolls_back_on_err() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "tx_err.db").await;
    db.create("users", &user("ada", 36)).await.unwrap();

    let result: Result<(), UdomError> = db
        .transaction(|tx| async move {
            tx.create("users", &user("grace", 45)).await?;
            Err(UdomError::execution("boom"))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(db.tx_state().await, TxState::RolledBack);

    let all = db.find("users", &Predicate::match_all()).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn transaction_state_machine_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "tx_state.db").await;
    db.create("users", &user("ada", 36)).await.unwrap();

    db.begin().await.unwrap();
    assert_eq!(db.tx_state().await, TxState::Open);

    // A second begin fails and leaves the transaction open.
    assert!(matches!(
        db.begin().await,
        Err(UdomError::TransactionState { .. })
    ));
    assert_eq!(db.tx_state().await, TxState::Open);

    assert!(db.rollback().await.unwrap());
    // Rollback after finalization is a no-op, not an error.
    assert!(!db.rollback().await.unwrap());

    // Commit without an open transaction is a state error.
    assert!(matches!(
        db.commit().await,
        Err(UdomError::TransactionState { .. })
    ));

    // A fresh begin starts a new cycle.
    db.begin().await.unwrap();
    db.create("users", &user("grace", 45)).await.unwrap();
    db.commit().await.unwrap();
    assert_eq!(db.tx_state().await, TxState::Committed);

    let all = db.find("users", &Predicate::match_all()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn failed_engine_rollback_still_finalizes_the_context() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "tx_broken.db").await;
    db.create("users", &user("ada", 36)).await.unwrap();

    db.begin().await.unwrap();
    db.create("users", &user("grace", 45)).await.unwrap();
    // End the engine transaction out from under the session.
    db.execute("ROLLBACK").await.unwrap();

    let err = db.rollback().await.unwrap_err();
    assert!(matches!(err, UdomError::Execution { .. }));
    // The context is finalized, not wedged open.
    assert_eq!(db.tx_state().await, TxState::RolledBack);

    db.begin().await.unwrap();
    db.create("users", &user("linus", 12)).await.unwrap();
    db.commit().await.unwrap();

    let all = db.find("users", &Predicate::match_all()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn exhausted_pool_surfaces_a_pool_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:///{}", dir.path().join("tiny_pool.db").display());
    let manager = Arc::new(ConnectionManager::new());
    let config = TargetConfig::new("sql", "sqlite", &url)
        .unwrap()
        .pool_max_connections(1)
        .pool_acquire_timeout(Duration::from_millis(200));

    let first = Udom::open_with(config.clone(), Arc::clone(&manager))
        .await
        .unwrap();
    let second = Udom::open_with(config, Arc::clone(&manager))
        .await
        .unwrap();

    first.begin().await.unwrap();
    let err = second.begin().await.unwrap_err();
    assert!(matches!(err, UdomError::PoolTimeout { .. }));

    // Releasing the held connection lets the other session proceed.
    first.rollback().await.unwrap();
    second.begin().await.unwrap();
    second.commit().await.unwrap();
}

#[tokio::test]
async fn rollback_without_begin_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "tx_idle.db").await;

    assert!(matches!(
        db.rollback().await,
        Err(UdomError::TransactionState { .. })
    ));
}

#[tokio::test]
async fn concurrent_creates_both_land() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "concurrent.db").await;

    // Provision the table before racing the writes.
    db.create("events", &Record::new().with_field("tag", "seed"))
        .await
        .unwrap();

    let a = db.clone();
    let b = db.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.create("events", &Record::new().with_field("tag", "a")).await }),
        tokio::spawn(async move { b.create("events", &Record::new().with_field("tag", "b")).await }),
    );
    ra.unwrap().unwrap();
    rb.unwrap().unwrap();

    let all = db.find("events", &Predicate::match_all()).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn uql_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "uql.db").await;

    let outcome = db
        .uexecute(r#"CREATE users {name: "ada", age: 36, active: true}"#)
        .await
        .unwrap();
    assert!(matches!(outcome, UqlOutcome::Created(Some(_))));
    db.uexecute(r#"CREATE users {name: "linus", age: 12, active: false}"#)
        .await
        .unwrap();

    let adults = db.uquery("FIND users WHERE age >= 18").await.unwrap();
    assert_eq!(adults.len(), 1);
    assert_eq!(adults[0].get("name"), Some(&Value::Text("ada".into())));

    let outcome = db
        .uexecute("UPDATE users SET {age: 13} WHERE name = 'linus'")
        .await
        .unwrap();
    assert!(matches!(outcome, UqlOutcome::Updated(1)));

    let outcome = db
        .uexecute("DELETE users WHERE active = false")
        .await
        .unwrap();
    assert!(matches!(outcome, UqlOutcome::Deleted(1)));

    // Mutations are rejected by the query-only entry point.
    assert!(db.uquery("DELETE users WHERE age > 0").await.is_err());

    // Malformed statements surface a syntax error with a position.
    assert!(matches!(
        db.uquery("FIND WHERE").await,
        Err(UdomError::UqlSyntax { .. })
    ));
}

#[tokio::test]
async fn native_execute_passthrough() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "native.db").await;

    let result = db
        .execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
        .await
        .unwrap();
    assert!(result.affected_rows.is_some());

    let result = db
        .execute("INSERT INTO notes (body) VALUES ('hello')")
        .await
        .unwrap();
    assert_eq!(result.affected_rows, Some(1));

    let result = db.execute("SELECT * FROM notes").await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.columns[1].name, "body");
}

#[tokio::test]
async fn create_many_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "batch.db").await;

    let outcome = db
        .create_many(
            "items",
            &[
                Record::new().with_field("sku", "a-1"),
                Record::new().with_field("sku", "a-2"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(outcome.ids.len(), 2);

    // A unique index makes the third record fail; nothing from the
    // failing batch may remain.
    db.execute("CREATE UNIQUE INDEX idx_items_sku ON items (sku)")
        .await
        .unwrap();

    let err = db
        .create_many(
            "items",
            &[
                Record::new().with_field("sku", "b-1"),
                Record::new().with_field("sku", "a-1"),
                Record::new().with_field("sku", "b-2"),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UdomError::ConstraintViolation { .. }));

    let all = db.find("items", &Predicate::match_all()).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn validation_guards_reject_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir, "guards.db").await;

    assert!(db.create("  ", &user("ada", 1)).await.is_err());
    assert!(db.create("users", &Record::new()).await.is_err());
    assert!(db
        .update("users", &Record::new(), &Predicate::match_all())
        .await
        .is_err());
    assert!(db.execute("   ").await.is_err());
    assert!(db
        .find("users; DROP TABLE x", &Predicate::match_all())
        .await
        .is_err());
}
