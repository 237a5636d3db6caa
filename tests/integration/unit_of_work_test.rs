//! Unit of work tests: transactions, saves, multi-context saves and raw SQL.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use datakit::prelude::*;

use crate::helpers::{self, Order, TestApp, User};

/// Records every statement it sees and answers queries with a fixed user.
#[derive(Clone, Default)]
struct RecordingSql {
    statements: Arc<Mutex<Vec<String>>>,
}

impl RecordingSql {
    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

impl SqlHandler for RecordingSql {
    fn execute(&self, sql: &str, params: &[Value]) -> AppResult<u64> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(params.len() as u64)
    }

    fn query(&self, sql: &str, _params: &[Value]) -> AppResult<Vec<serde_json::Value>> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(vec![json!({
            "id": 77,
            "name": "from-sql",
            "age": 40,
            "deleted": false,
            "address": null,
        })])
    }
}

fn order(id: i64, user_id: i64, total: f64) -> Order {
    Order { id, user_id, total }
}

#[tokio::test]
async fn test_save_without_changes_skips_transaction() {
    let app = TestApp::with_users(3);
    let mut uow = app.unit_of_work();

    assert_eq!(uow.save().await.unwrap(), 0);
    assert!(!uow.has_transaction());
    assert_eq!(uow.transaction_state(), TransactionState::NoTransaction);
}

#[tokio::test]
async fn test_save_commits_implicit_transaction() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();
    let users = uow.repository::<User>();

    users.add(helpers::user(1, "alice", 30)).unwrap();
    users.add(helpers::user(2, "bob", 25)).unwrap();

    assert_eq!(uow.save().await.unwrap(), 2);
    assert_eq!(uow.transaction_state(), TransactionState::Committed);
    assert!(!uow.has_transaction());
    assert!(!uow.has_changes());
    assert_eq!(app.store.row_count(User::NAME), 2);
}

#[tokio::test]
async fn test_explicit_transaction_commit() {
    let app = TestApp::with_users(2);
    let mut uow = app.unit_of_work();

    uow.begin_transaction(IsolationLevel::Serializable)
        .await
        .unwrap();
    assert_eq!(uow.transaction_state(), TransactionState::Active);

    let users = uow.repository::<User>();
    users
        .update_where(Predicate::new(|u: &User| u.id == 1), |u: &mut User| {
            u.age = 50
        })
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(uow.transaction_state(), TransactionState::Committed);
    assert_eq!(app.stored_users()[0].age, 50);
}

#[tokio::test]
async fn test_double_begin_is_invalid() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();

    uow.begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .unwrap();
    let err = uow
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .unwrap_err();

    assert!(err.is(ErrorKind::InvalidState));
    assert_eq!(err.message, "There's already an active transaction.");
    assert_eq!(uow.transaction_state(), TransactionState::Active);
}

#[tokio::test]
async fn test_commit_without_transaction_is_invalid() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();

    let err = uow.commit().await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
    assert_eq!(err.message, "There's no active transaction.");
}

#[tokio::test]
async fn test_rollback_without_transaction_is_noop() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();

    uow.rollback().await;
    assert_eq!(uow.transaction_state(), TransactionState::NoTransaction);
}

#[tokio::test]
async fn test_new_transaction_after_commit() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();
    let users = uow.repository::<User>();

    users.add(helpers::user(1, "first", 20)).unwrap();
    uow.save().await.unwrap();
    users.add(helpers::user(2, "second", 21)).unwrap();
    uow.save().await.unwrap();

    assert_eq!(helpers::ids(&app.stored_users()), vec![1, 2]);
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();
    uow.repository::<User>()
        .add(helpers::user(1, "doomed", 20))
        .unwrap();

    app.store.fail_next_commit("disk full");
    let err = uow.save().await.unwrap_err();

    assert!(err.is(ErrorKind::Store));
    assert_eq!(uow.transaction_state(), TransactionState::RolledBack);
    assert_eq!(app.store.row_count(User::NAME), 0);
}

#[tokio::test]
async fn test_failed_save_keeps_changes_for_retry() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();
    uow.repository::<User>()
        .add(helpers::user(1, "retry", 20))
        .unwrap();

    app.store.fail_next_save("connection reset");
    let err = uow.save().await.unwrap_err();
    assert!(err.is(ErrorKind::Store));
    assert_eq!(uow.transaction_state(), TransactionState::RolledBack);
    assert!(uow.has_changes());

    assert_eq!(uow.save().await.unwrap(), 1);
    assert_eq!(app.store.row_count(User::NAME), 1);
}

#[tokio::test]
async fn test_duplicate_insert_leaves_store_unchanged() {
    let app = TestApp::with_users(2);
    let mut uow = app.unit_of_work();
    let users = uow.repository::<User>();

    users.add(helpers::user(9, "new", 20)).unwrap();
    users.add(helpers::user(2, "clash", 20)).unwrap();

    let err = uow.save().await.unwrap_err();
    assert!(err.is(ErrorKind::Store));
    assert_eq!(helpers::ids(&app.stored_users()), vec![1, 2]);
}

#[tokio::test]
async fn test_save_without_accepting_keeps_entries_pending() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();
    uow.repository::<User>()
        .add(helpers::user(1, "kept", 20))
        .unwrap();

    let options = SaveOptions {
        accept_all_changes_on_success: false,
        ..SaveOptions::default()
    };
    assert_eq!(uow.save_changes(options).await.unwrap(), 1);

    assert!(uow.has_changes());
    assert_eq!(app.store.row_count(User::NAME), 1);
}

#[tokio::test]
async fn test_save_with_history_records_changes() {
    let app = TestApp::with_users(2);
    let mut uow = app.unit_of_work();
    let users = uow.repository::<User>();

    users.add(helpers::user(3, "added", 30)).unwrap();
    let mut changed = users.find(1_i64).await.unwrap().unwrap();
    changed.age = 60;
    users.update(changed, &["age"]).unwrap();

    let options = SaveOptions {
        ensure_history: true,
        ..SaveOptions::default()
    };
    // Two entity rows plus two history rows.
    assert_eq!(uow.save_changes(options).await.unwrap(), 4);

    let history = app.store.rows::<AutoHistory>().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.table_name == User::NAME));

    let modified = history
        .iter()
        .find(|h| h.kind == EntityState::Modified)
        .unwrap();
    assert_eq!(modified.row_id, "1");
    let changed: serde_json::Value = serde_json::from_str(&modified.changed).unwrap();
    assert_eq!(changed["before"]["age"], json!(10));
    assert_eq!(changed["after"]["age"], json!(60));
}

#[tokio::test]
async fn test_save_all_across_stores() {
    let users_app = TestApp::new();
    let orders_app = TestApp::new();

    let mut first = users_app.unit_of_work();
    first
        .repository::<User>()
        .add(helpers::user(1, "buyer", 30))
        .unwrap();
    let mut second = orders_app.unit_of_work();
    second
        .repository::<Order>()
        .add_range(vec![order(1, 1, 9.5), order(2, 1, 20.0)])
        .unwrap();

    let mut units: [&mut dyn SaveChanges; 2] = [&mut first, &mut second];
    let affected = save_changes_all(&mut units, MultiSaveOptions::default())
        .await
        .unwrap();

    assert_eq!(affected, 3);
    assert_eq!(users_app.store.row_count(User::NAME), 1);
    assert_eq!(orders_app.store.row_count(Order::NAME), 2);
    assert_eq!(first.transaction_state(), TransactionState::NoTransaction);
}

#[tokio::test]
async fn test_save_all_rolls_back_every_store_when_one_commit_fails() {
    let users_app = TestApp::with_users(3);
    let orders_app = TestApp::new();

    let mut first = users_app.unit_of_work();
    first
        .repository::<User>()
        .remove(helpers::user(2, "gone", 0))
        .unwrap();
    let mut second = orders_app.unit_of_work();
    second
        .repository::<Order>()
        .add(order(1, 2, 5.0))
        .unwrap();

    orders_app.store.fail_next_commit("replica unavailable");

    let mut units: [&mut dyn SaveChanges; 2] = [&mut first, &mut second];
    let err = save_changes_all(&mut units, MultiSaveOptions::default())
        .await
        .unwrap_err();

    assert!(err.is(ErrorKind::Store));
    assert_eq!(helpers::ids(&users_app.stored_users()), vec![1, 2, 3]);
    assert_eq!(orders_app.store.row_count(Order::NAME), 0);
}

#[tokio::test]
async fn test_save_all_without_transaction_keeps_earlier_saves() {
    let users_app = TestApp::new();
    let orders_app = TestApp::new();

    let mut first = users_app.unit_of_work();
    first
        .repository::<User>()
        .add(helpers::user(1, "kept", 30))
        .unwrap();
    let mut second = orders_app.unit_of_work();
    second
        .repository::<Order>()
        .add(order(1, 1, 5.0))
        .unwrap();

    orders_app.store.fail_next_save("lost connection");

    let options = MultiSaveOptions {
        use_transaction: false,
        ..MultiSaveOptions::default()
    };
    let mut units: [&mut dyn SaveChanges; 2] = [&mut first, &mut second];
    assert!(save_changes_all(&mut units, options).await.is_err());

    assert_eq!(users_app.store.row_count(User::NAME), 1);
    assert_eq!(orders_app.store.row_count(Order::NAME), 0);
}

#[tokio::test]
async fn test_save_all_of_nothing() {
    let mut units: [&mut dyn SaveChanges; 0] = [];
    let affected = save_changes_all(&mut units, MultiSaveOptions::default())
        .await
        .unwrap();
    assert_eq!(affected, 0);
}

#[tokio::test]
async fn test_explicit_scope() {
    let app = TestApp::new();
    let mut uow = app.unit_of_work();
    uow.repository::<User>()
        .add(helpers::user(1, "scoped", 30))
        .unwrap();

    let mut scope = TransactionScope::new(Duration::from_secs(30));
    uow.save_changes_in(&mut scope, SaveOptions::default())
        .await
        .unwrap();
    assert_eq!(scope.len(), 1);
    assert_eq!(app.store.row_count(User::NAME), 1);

    scope.complete().await.unwrap();
    assert!(scope.is_completed());

    let err = uow
        .save_changes_in(&mut scope, SaveOptions::default())
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
}

#[tokio::test]
async fn test_disposed_scope_reverts_writes() {
    let app = TestApp::with_users(2);
    let mut uow = app.unit_of_work();
    uow.repository::<User>()
        .add(helpers::user(3, "reverted", 30))
        .unwrap();

    let mut scope = TransactionScope::new(Duration::from_secs(30));
    uow.save_changes_in(&mut scope, SaveOptions::default())
        .await
        .unwrap();
    scope.dispose().await;

    assert_eq!(app.store.row_count(User::NAME), 2);
}

#[tokio::test]
async fn test_raw_sql_goes_to_handler() {
    let app = TestApp::new();
    let sql = RecordingSql::default();
    app.store.set_sql_handler(sql.clone());
    let uow = app.unit_of_work();

    let affected = uow
        .execute_sql(
            "UPDATE users SET age = ? WHERE id = ?",
            &[Value::Integer(30), Value::Integer(1)],
        )
        .await
        .unwrap();
    assert_eq!(affected, 2);

    let rows: Vec<User> = uow
        .from_sql("SELECT * FROM users", &[])
        .await
        .unwrap();
    assert_eq!(rows[0].name, "from-sql");

    assert_eq!(
        sql.statements(),
        vec!["UPDATE users SET age = ? WHERE id = ?", "SELECT * FROM users"]
    );
}

#[tokio::test]
async fn test_raw_sql_without_handler_is_not_implemented() {
    let app = TestApp::new();
    let uow = app.unit_of_work();

    let err = uow.execute_sql("DELETE FROM users", &[]).await.unwrap_err();
    assert!(err.is(ErrorKind::NotImplemented));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let app = TestApp::with_users(4);
    let mut uow = app.unit_of_work();

    uow.begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .unwrap();
    uow.repository::<User>()
        .remove_where(Predicate::new(|_: &User| true))
        .await
        .unwrap();
    assert_eq!(app.store.row_count(User::NAME), 0);

    uow.close().await.unwrap();
    uow.close().await.unwrap();

    assert!(uow.is_closed());
    assert_eq!(app.store.closed_connections(), 1);
    assert_eq!(app.store.row_count(User::NAME), 4);

    let err = uow.save().await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidState));
}

#[tokio::test]
async fn test_cancelled_save_does_not_write() {
    let app = TestApp::new();
    let token = CancellationToken::new();
    let mut uow = app.unit_of_work().with_cancellation(token.clone());
    uow.repository::<User>()
        .add(helpers::user(1, "never", 30))
        .unwrap();

    token.cancel();
    let err = uow.save().await.unwrap_err();

    assert!(err.is(ErrorKind::Cancelled));
    assert_eq!(app.store.row_count(User::NAME), 0);
}

#[tokio::test]
async fn test_configured_unit_of_work() {
    let config = DataKitConfig::from_toml(
        r#"
        [unit_of_work]
        isolation_level = "snapshot"
        command_timeout_seconds = 15
        accept_all_changes_on_success = false
        "#,
    )
    .unwrap();

    let app = TestApp::new();
    let mut uow = UnitOfWork::with_config(app.store.context(), config.unit_of_work.clone());

    assert_eq!(uow.timeout(), Some(Duration::from_secs(15)));
    assert!(!uow.default_save_options().accept_all_changes_on_success);

    uow.set_timeout(None);
    assert_eq!(uow.timeout(), None);

    uow.repository::<User>()
        .add(helpers::user(1, "configured", 30))
        .unwrap();
    assert_eq!(uow.save().await.unwrap(), 1);
    // Entries are not accepted, so the insert is still pending.
    assert!(uow.has_changes());
}
