//! Integration coverage for the Higher-Level Query Adapter (C6) against a
//! real SQLite-backed `SimpleManager`: insert/update/delete/select/
//! select_count's null-on-failure, zero-is-valid return contract.

use std::path::PathBuf;
use std::sync::Arc;

use db_runtime::config::{ConnectionDescriptor, Dialect};
use db_runtime::environment::Environment;
use db_runtime::manager::{ConnectionManager, SimpleManager};
use db_runtime::{QueryAdapter, QueryExecuter};

fn sqlite_descriptor(path: &str) -> ConnectionDescriptor {
    ConnectionDescriptor {
        dialect: Dialect::Sqlite,
        database: path.to_string(),
        ..ConnectionDescriptor::default()
    }
}

fn fresh_sqlite_file(name: &str) -> String {
    let path: PathBuf = std::env::temp_dir().join(format!("db_runtime_adapter_test_{name}.sqlite"));
    let _ = std::fs::remove_file(&path);
    std::fs::File::create(&path).unwrap();
    path.to_string_lossy().into_owned()
}

async fn create_users_table(manager: &Arc<dyn ConnectionManager>) {
    let mut executer = QueryExecuter::new(manager.clone(), None);
    executer
        .prepare(
            "CREATE TABLE users (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                email TEXT NOT NULL UNIQUE, \
                name TEXT NOT NULL\
            )",
        )
        .await;
    assert!(executer.execute().await, "{:?}", executer.last_error());
}

#[tokio::test]
async fn insert_returns_last_inserted_id() {
    let path = fresh_sqlite_file("insert");
    let manager: Arc<dyn ConnectionManager> =
        Arc::new(SimpleManager::new(sqlite_descriptor(&path), Environment::Embedded));
    create_users_table(&manager).await;

    let adapter = QueryAdapter::new(manager.clone(), None);
    let id = adapter
        .insert(
            "INSERT INTO users (email, name) VALUES (:email, :name)",
            &[("email", "ada@example.com".into()), ("name", "Ada".into())],
        )
        .await;
    assert_eq!(id, Some(1));
    assert!(adapter.last_error().is_none());
}

#[tokio::test]
async fn insert_duplicate_email_is_null_with_duplicate_key_message() {
    let path = fresh_sqlite_file("insert_duplicate");
    let manager: Arc<dyn ConnectionManager> =
        Arc::new(SimpleManager::new(sqlite_descriptor(&path), Environment::Embedded));
    create_users_table(&manager).await;

    let adapter = QueryAdapter::new(manager.clone(), None);
    assert!(
        adapter
            .insert(
                "INSERT INTO users (email, name) VALUES (:email, :name)",
                &[("email", "dup@example.com".into()), ("name", "One".into())],
            )
            .await
            .is_some()
    );

    let second = adapter
        .insert(
            "INSERT INTO users (email, name) VALUES (:email, :name)",
            &[("email", "dup@example.com".into()), ("name", "Two".into())],
        )
        .await;
    assert_eq!(second, None);
    let message = adapter.last_error().unwrap().message;
    assert!(
        message.contains("cannot be created because a record with the same unique information already exists"),
        "{message}"
    );
}

#[tokio::test]
async fn update_returns_zero_as_a_valid_result() {
    let path = fresh_sqlite_file("update_zero");
    let manager: Arc<dyn ConnectionManager> =
        Arc::new(SimpleManager::new(sqlite_descriptor(&path), Environment::Embedded));
    create_users_table(&manager).await;

    let adapter = QueryAdapter::new(manager.clone(), None);
    let affected = adapter
        .update(
            "UPDATE users SET name = :name WHERE email = :email",
            &[("name", "Nobody".into()), ("email", "missing@example.com".into())],
        )
        .await;
    assert_eq!(affected, Some(0));
    assert!(adapter.last_error().is_none());
}

#[tokio::test]
async fn select_and_select_count_round_trip() {
    let path = fresh_sqlite_file("select");
    let manager: Arc<dyn ConnectionManager> =
        Arc::new(SimpleManager::new(sqlite_descriptor(&path), Environment::Embedded));
    create_users_table(&manager).await;

    let adapter = QueryAdapter::new(manager.clone(), None);
    for (email, name) in [("a@example.com", "A"), ("b@example.com", "B")] {
        adapter
            .insert(
                "INSERT INTO users (email, name) VALUES (:email, :name)",
                &[("email", email.into()), ("name", name.into())],
            )
            .await;
    }

    let count = adapter
        .select_count("SELECT COUNT(*) AS c FROM users", &[])
        .await;
    assert_eq!(count, Some(2));

    let rows = adapter.select("SELECT email, name FROM users ORDER BY id", &[]).await;
    let rows = rows.expect("select should succeed");
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn delete_returns_affected_row_count() {
    let path = fresh_sqlite_file("delete");
    let manager: Arc<dyn ConnectionManager> =
        Arc::new(SimpleManager::new(sqlite_descriptor(&path), Environment::Embedded));
    create_users_table(&manager).await;

    let adapter = QueryAdapter::new(manager.clone(), None);
    adapter
        .insert(
            "INSERT INTO users (email, name) VALUES (:email, :name)",
            &[("email", "gone@example.com".into()), ("name", "Gone".into())],
        )
        .await;

    let deleted = adapter
        .delete("DELETE FROM users WHERE email = :email", &[("email", "gone@example.com".into())])
        .await;
    assert_eq!(deleted, Some(1));
}
