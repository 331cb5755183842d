//! Dialect-aware DDL emission and catalog probing for C7.
//!
//! MySQL and PostgreSQL share an `INFORMATION_SCHEMA` probe family. SQLite
//! has no `INFORMATION_SCHEMA`; it is given its own probe path over
//! `sqlite_master`/`PRAGMA index_list` instead.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Dialect;
use crate::executer::QueryExecuter;
use crate::manager::ConnectionManager;
use crate::row::RowValue;

use super::constraint::{ConstraintDescriptor, ConstraintKind, ReferentialAction};

#[derive(Debug, Clone)]
pub struct ConstraintRecord {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub name: String,
    pub columns: BTreeSet<String>,
    pub is_unique: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub constraints: Vec<ConstraintRecord>,
    pub indexes: Vec<IndexRecord>,
}

impl CatalogSnapshot {
    pub fn has_name(&self, name: &str) -> bool {
        self.constraints.iter().any(|c| c.name == name) || self.indexes.iter().any(|i| i.name == name)
    }
}

fn row_str(row: &crate::row::RowMap, column: &str) -> Option<String> {
    match row.get(column)? {
        RowValue::Str(s) => Some(s.clone()),
        RowValue::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Fetches the live catalog snapshot for `table`, branching on dialect.
pub async fn fetch_catalog_snapshot(
    manager: Arc<dyn ConnectionManager>,
    dialect: Dialect,
    table: &str,
) -> CatalogSnapshot {
    match dialect {
        Dialect::MySql | Dialect::Postgres => fetch_information_schema_snapshot(manager, table).await,
        Dialect::Sqlite => fetch_sqlite_snapshot(manager, table).await,
    }
}

async fn fetch_information_schema_snapshot(
    manager: Arc<dyn ConnectionManager>,
    table: &str,
) -> CatalogSnapshot {
    let mut snapshot = CatalogSnapshot::default();

    let mut executer = QueryExecuter::new(manager.clone(), None);
    executer
        .prepare(
            "SELECT constraint_name, constraint_type FROM information_schema.table_constraints \
             WHERE table_name = :table",
        )
        .await;
    executer.bind("table", table);
    if executer.execute().await {
        if let Some(rows) = executer.fetch_all().await {
            for row in rows {
                let Some(name) = row_str(&row, "constraint_name") else {
                    continue;
                };
                let kind = match row_str(&row, "constraint_type").as_deref() {
                    Some("UNIQUE") => ConstraintKind::Unique,
                    Some("FOREIGN KEY") => ConstraintKind::ForeignKey,
                    Some("CHECK") => ConstraintKind::Check,
                    Some("PRIMARY KEY") => ConstraintKind::Primary,
                    _ => continue,
                };
                let columns = fetch_constraint_columns(manager.clone(), table, &name).await;
                snapshot.constraints.push(ConstraintRecord { name, kind, columns });
            }
        }
    }

    let mut index_executer = QueryExecuter::new(manager.clone(), None);
    index_executer
        .prepare(
            "SELECT index_name, non_unique, column_name FROM information_schema.statistics \
             WHERE table_name = :table",
        )
        .await;
    index_executer.bind("table", table);
    if index_executer.execute().await {
        if let Some(rows) = index_executer.fetch_all().await {
            let mut by_name: std::collections::BTreeMap<String, (bool, BTreeSet<String>)> =
                std::collections::BTreeMap::new();
            for row in rows {
                let Some(name) = row_str(&row, "index_name") else {
                    continue;
                };
                let is_unique = matches!(row.get("non_unique"), Some(RowValue::Int(0)));
                let column = row_str(&row, "column_name");
                let entry = by_name.entry(name).or_insert((is_unique, BTreeSet::new()));
                entry.0 = is_unique;
                if let Some(col) = column {
                    entry.1.insert(col);
                }
            }
            for (name, (is_unique, columns)) in by_name {
                snapshot.indexes.push(IndexRecord { name, columns, is_unique });
            }
        }
    }

    snapshot
}

async fn fetch_constraint_columns(
    manager: Arc<dyn ConnectionManager>,
    table: &str,
    name: &str,
) -> BTreeSet<String> {
    let mut executer = QueryExecuter::new(manager, None);
    executer
        .prepare(
            "SELECT column_name FROM information_schema.key_column_usage \
             WHERE table_name = :table AND constraint_name = :name",
        )
        .await;
    executer.bind("table", table);
    executer.bind("name", name);
    let mut columns = BTreeSet::new();
    if executer.execute().await {
        if let Some(rows) = executer.fetch_all().await {
            for row in rows {
                if let Some(col) = row_str(&row, "column_name") {
                    columns.insert(col);
                }
            }
        }
    }
    columns
}

async fn fetch_sqlite_snapshot(manager: Arc<dyn ConnectionManager>, table: &str) -> CatalogSnapshot {
    let mut snapshot = CatalogSnapshot::default();

    let mut index_list = QueryExecuter::new(manager.clone(), None);
    index_list.prepare(&format!("PRAGMA index_list({table})")).await;
    if index_list.execute().await {
        if let Some(rows) = index_list.fetch_all().await {
            for row in rows {
                let Some(name) = row_str(&row, "name") else {
                    continue;
                };
                // sqlite's autoindex names (sqlite_autoindex_<table>_N) back
                // an unnamed UNIQUE/PRIMARY KEY; skip them here since they
                // have no caller-facing name to reconcile against.
                if name.starts_with("sqlite_autoindex_") {
                    continue;
                }
                let is_unique = matches!(row.get("unique"), Some(RowValue::Int(1)));
                let columns = fetch_sqlite_index_columns(manager.clone(), &name).await;
                snapshot.indexes.push(IndexRecord { name, columns, is_unique });
            }
        }
    }

    let mut fk_list = QueryExecuter::new(manager.clone(), None);
    fk_list.prepare(&format!("PRAGMA foreign_key_list({table})")).await;
    if fk_list.execute().await {
        if let Some(rows) = fk_list.fetch_all().await {
            for (idx, row) in rows.iter().enumerate() {
                let mut columns = BTreeSet::new();
                if let Some(col) = row_str(row, "from") {
                    columns.insert(col);
                }
                snapshot.constraints.push(ConstraintRecord {
                    name: format!("fk_{table}_{idx}"),
                    kind: ConstraintKind::ForeignKey,
                    columns,
                });
            }
        }
    }

    snapshot
}

async fn fetch_sqlite_index_columns(manager: Arc<dyn ConnectionManager>, index_name: &str) -> BTreeSet<String> {
    let mut executer = QueryExecuter::new(manager, None);
    executer.prepare(&format!("PRAGMA index_info({index_name})")).await;
    let mut columns = BTreeSet::new();
    if executer.execute().await {
        if let Some(rows) = executer.fetch_all().await {
            for row in rows {
                if let Some(col) = row_str(&row, "name") {
                    columns.insert(col);
                }
            }
        }
    }
    columns
}

/// Synthesizes a stable name for a declared constraint lacking one (§4.7:
/// `unique_<cols>`, `idx_<cols>`, `fk_<col>_<reftable>`).
pub fn synthesize_name(table: &str, descriptor: &ConstraintDescriptor) -> String {
    if let Some(name) = &descriptor.name {
        return name.clone();
    }
    let cols = descriptor.columns.join("_");
    match descriptor.kind {
        ConstraintKind::Unique => format!("unique_{cols}"),
        ConstraintKind::Index => format!("idx_{cols}"),
        ConstraintKind::Fulltext => format!("fulltext_{cols}"),
        ConstraintKind::Check => format!("chk_{table}_{}", descriptor.columns.len()),
        ConstraintKind::ForeignKey => {
            let reftable = descriptor
                .references
                .as_ref()
                .map(|(t, _)| t.as_str())
                .unwrap_or("ref");
            format!("fk_{cols}_{reftable}")
        }
        ConstraintKind::Primary => format!("pk_{cols}"),
        ConstraintKind::AutoIncrement => format!("ai_{cols}"),
    }
}

/// Emits the `ADD`-side DDL for a declared constraint (§6). `Primary` and
/// `AutoIncrement` are table-creation-time concerns and never reach here —
/// callers skip them as no-ops.
///
/// SQLite has no `ALTER TABLE ADD CONSTRAINT` of any kind; a declared
/// `Unique` constraint is realized there as `CREATE UNIQUE INDEX` instead,
/// the same DDL shape `Index.unique()` already uses. `ForeignKey`/`Check`
/// against an existing SQLite table would require a table rebuild, which is
/// out of scope here; callers targeting SQLite should declare those at
/// table-creation time instead.
pub fn emit_add_ddl(table: &str, name: &str, descriptor: &ConstraintDescriptor, dialect: Dialect) -> String {
    let cols = descriptor.columns.join(", ");
    match descriptor.kind {
        ConstraintKind::Unique if dialect == Dialect::Sqlite => {
            format!("CREATE UNIQUE INDEX {name} ON {table} ({cols})")
        }
        ConstraintKind::Unique => format!("ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE ({cols})"),
        ConstraintKind::Index => {
            let unique = if descriptor.unique { "UNIQUE " } else { "" };
            format!("CREATE {unique}INDEX {name} ON {table} ({cols})")
        }
        ConstraintKind::ForeignKey => {
            let (reftable, refcol) = descriptor
                .references
                .clone()
                .unwrap_or_else(|| ("unknown".to_string(), "id".to_string()));
            let mut ddl = format!(
                "ALTER TABLE {table} ADD CONSTRAINT {name} FOREIGN KEY ({cols}) REFERENCES {reftable}({refcol})"
            );
            if let Some(action) = descriptor.on_delete {
                ddl.push_str(&format!(" ON DELETE {}", action.render()));
            }
            if let Some(action) = descriptor.on_update {
                ddl.push_str(&format!(" ON UPDATE {}", action.render()));
            }
            ddl
        }
        ConstraintKind::Check => {
            let expr = descriptor.expression.clone().unwrap_or_default();
            format!("ALTER TABLE {table} ADD CONSTRAINT {name} CHECK ({expr})")
        }
        ConstraintKind::Fulltext => format!("CREATE FULLTEXT INDEX {name} ON {table} ({cols})"),
        ConstraintKind::Primary | ConstraintKind::AutoIncrement => String::new(),
    }
}

/// Emits the `DROP`-side DDL for an obsolete catalog entry (§6).
///
/// Index drops are the dialect-sensitive half: MySQL drops an index through
/// `ALTER TABLE ... DROP INDEX`, while Postgres and SQLite both treat an
/// index as a standalone object dropped via a bare `DROP INDEX`.
pub fn emit_drop_ddl(table: &str, name: &str, is_index: bool, dialect: Dialect) -> String {
    if is_index {
        match dialect {
            Dialect::MySql => format!("ALTER TABLE {table} DROP INDEX {name}"),
            Dialect::Postgres | Dialect::Sqlite => format!("DROP INDEX {name}"),
        }
    } else {
        format!("ALTER TABLE {table} DROP CONSTRAINT {name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::constraint::Constraint;

    #[test]
    fn synthesizes_unique_name() {
        let descriptor = Constraint::unique("email").to_descriptor();
        assert_eq!(synthesize_name("users", &descriptor), "unique_email");
    }

    #[test]
    fn synthesizes_foreign_key_name() {
        let descriptor = Constraint::foreign_key("user_id", "users.id").to_descriptor();
        assert_eq!(synthesize_name("orders", &descriptor), "fk_user_id_users");
    }

    #[test]
    fn emits_foreign_key_ddl_with_actions() {
        let descriptor = Constraint::foreign_key("user_id", "users.id")
            .on_delete("cascade")
            .to_descriptor();
        let ddl = emit_add_ddl("orders", "fk_user_id_users", &descriptor, Dialect::MySql);
        assert_eq!(
            ddl,
            "ALTER TABLE orders ADD CONSTRAINT fk_user_id_users FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE"
        );
    }

    #[test]
    fn emits_unique_index_ddl() {
        let descriptor = Constraint::index(vec!["a", "b"]).unique_index().to_descriptor();
        let ddl = emit_add_ddl("t", "idx_a_b", &descriptor, Dialect::MySql);
        assert_eq!(ddl, "CREATE UNIQUE INDEX idx_a_b ON t (a, b)");
    }

    #[test]
    fn emits_sqlite_unique_as_create_index() {
        let descriptor = Constraint::unique("email").to_descriptor();
        let ddl = emit_add_ddl("users", "unique_email", &descriptor, Dialect::Sqlite);
        assert_eq!(ddl, "CREATE UNIQUE INDEX unique_email ON users (email)");
    }

    #[test]
    fn drops_index_per_dialect() {
        assert_eq!(
            emit_drop_ddl("t", "idx_a", true, Dialect::MySql),
            "ALTER TABLE t DROP INDEX idx_a"
        );
        assert_eq!(emit_drop_ddl("t", "idx_a", true, Dialect::Postgres), "DROP INDEX idx_a");
        assert_eq!(emit_drop_ddl("t", "idx_a", true, Dialect::Sqlite), "DROP INDEX idx_a");
    }
}
