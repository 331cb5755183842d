//! Integration coverage for the schema reconciliation engine (C7) against a
//! real SQLite catalog: add-only reconciliation, then drop-obsolete.

use std::path::PathBuf;
use std::sync::Arc;

use db_runtime::config::{ConnectionDescriptor, Dialect};
use db_runtime::environment::Environment;
use db_runtime::manager::{ConnectionManager, SimpleManager};
use db_runtime::schema::Constraint;
use db_runtime::{QueryExecuter, SchemaReconciler};

fn sqlite_descriptor(path: &str) -> ConnectionDescriptor {
    ConnectionDescriptor {
        dialect: Dialect::Sqlite,
        database: path.to_string(),
        ..ConnectionDescriptor::default()
    }
}

fn fresh_sqlite_file(name: &str) -> String {
    let path: PathBuf = std::env::temp_dir().join(format!("db_runtime_schema_test_{name}.sqlite"));
    let _ = std::fs::remove_file(&path);
    std::fs::File::create(&path).unwrap();
    path.to_string_lossy().into_owned()
}

async fn create_accounts_table(manager: &Arc<dyn ConnectionManager>) {
    let mut executer = QueryExecuter::new(manager.clone(), None);
    executer
        .prepare(
            "CREATE TABLE accounts (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                email TEXT NOT NULL, \
                nickname TEXT NOT NULL\
            )",
        )
        .await;
    assert!(executer.execute().await, "{:?}", executer.last_error());
}

async fn create_legacy_index(manager: &Arc<dyn ConnectionManager>) {
    let mut executer = QueryExecuter::new(manager.clone(), None);
    executer
        .prepare("CREATE INDEX legacy_nickname ON accounts (nickname)")
        .await;
    assert!(executer.execute().await, "{:?}", executer.last_error());
}

#[tokio::test]
async fn reconcile_add_only_applies_missing_unique_constraint() {
    let path = fresh_sqlite_file("add_only");
    let manager: Arc<dyn ConnectionManager> =
        Arc::new(SimpleManager::new(sqlite_descriptor(&path), Environment::Embedded));
    create_accounts_table(&manager).await;

    let declared = [Constraint::unique("email")];
    let mut reconciler = SchemaReconciler::new(manager.clone(), "accounts", &declared, false);
    assert!(reconciler.reconcile().await, "{:?}", reconciler.last_error());

    let summary = reconciler.summary();
    assert_eq!(summary.total_constraints, 1);
    assert!(!summary.has_errors);

    // Reconciling again against the now-existing index is a no-op, not a
    // second CREATE UNIQUE INDEX (which would error on the duplicate name).
    let mut second_pass = SchemaReconciler::new(manager.clone(), "accounts", &declared, false);
    assert!(second_pass.reconcile().await, "{:?}", second_pass.last_error());
}

#[tokio::test]
async fn reconcile_drop_obsolete_removes_undeclared_index() {
    let path = fresh_sqlite_file("drop_obsolete");
    let manager: Arc<dyn ConnectionManager> =
        Arc::new(SimpleManager::new(sqlite_descriptor(&path), Environment::Embedded));
    create_accounts_table(&manager).await;
    create_legacy_index(&manager).await;

    // Nothing declared, but remove_obsolete=true should drop legacy_nickname.
    let declared: [Constraint; 0] = [];
    let mut reconciler = SchemaReconciler::new(manager.clone(), "accounts", &declared, true);
    assert!(reconciler.reconcile().await, "{:?}", reconciler.last_error());

    let mut probe = QueryExecuter::new(manager.clone(), None);
    probe
        .prepare("SELECT COUNT(*) AS c FROM sqlite_master WHERE name = 'legacy_nickname'")
        .await;
    assert!(probe.execute().await);
    assert_eq!(probe.fetch_column().await, Some(db_runtime::RowValue::Int(0)));
}
