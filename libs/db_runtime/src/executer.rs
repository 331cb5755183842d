//! Query Executer (C3): prepared-statement lifecycle, named-parameter
//! binding, execute, and result fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Dialect;
use crate::error::{normalize, DbError, DbErrorKind, ErrorSlot, Operation};
use crate::manager::{ConnectionHandle, ConnectionManager};
use crate::row::{decode_row, RowMap, RowValue};
use crate::value::Value;

const MAX_QUERY_BYTES: usize = 1_000_000;

struct PreparedSlot {
    raw_sql: String,
    rewritten_sql: String,
    param_order: Vec<String>,
    bindings: HashMap<String, Value>,
    is_select: bool,
}

/// One session: a single active prepared statement, a checked-out
/// connection (acquired lazily), and a view onto its manager's transaction
/// state. Forces rollback-and-release on drop (§3 "Executers are
/// session-scoped").
pub struct QueryExecuter {
    manager: Arc<dyn ConnectionManager>,
    pool_name: Option<String>,
    conn: Option<ConnectionHandle>,
    slot: Option<PreparedSlot>,
    pending_rows: Option<Vec<sqlx::any::AnyRow>>,
    affected_rows: u64,
    last_inserted_id: Option<String>,
    execution_millis: f64,
    error: ErrorSlot,
}

impl QueryExecuter {
    pub fn new(manager: Arc<dyn ConnectionManager>, pool_name: Option<String>) -> Self {
        Self {
            manager,
            pool_name,
            conn: None,
            slot: None,
            pending_rows: None,
            affected_rows: 0,
            last_inserted_id: None,
            execution_millis: 0.0,
            error: ErrorSlot::new(),
        }
    }

    fn clear_error(&mut self) {
        self.error.clear();
    }

    /// Validates and stages `sql`; closes the previous slot's cursor and
    /// acquires a connection if none is held yet.
    pub async fn prepare(&mut self, sql: &str) -> &mut Self {
        self.pending_rows = None;
        self.slot = None;

        if sql.trim().is_empty() {
            self.error
                .set(DbError::new(DbErrorKind::PrepareFailure, "Query is empty"));
            return self;
        }
        if sql.len() > MAX_QUERY_BYTES {
            self.error.set(DbError::new(
                DbErrorKind::PrepareFailure,
                "Query exceeds maximum length",
            ));
            return self;
        }

        if self.conn.is_none() {
            match self.manager.acquire(self.pool_name.as_deref()).await {
                Some(conn) => self.conn = Some(conn),
                None => {
                    let underlying = self
                        .manager
                        .last_error()
                        .map(|e| e.message)
                        .unwrap_or_else(|| "Failed to connect".to_string());
                    self.error.set(DbError::new(
                        DbErrorKind::PrepareFailure,
                        format!("Error preparing statement: {underlying}"),
                    ));
                    return self;
                }
            }
        }

        let dialect = self.manager.stats().config.dialect;
        let (rewritten_sql, param_order) = rewrite_named_params(sql, dialect);
        let is_select = starts_with_ci(sql, "select") || starts_with_ci(sql, "with");

        self.slot = Some(PreparedSlot {
            raw_sql: sql.to_string(),
            rewritten_sql,
            param_order,
            bindings: HashMap::new(),
            is_select,
        });
        self.clear_error();
        self
    }

    /// Binds `value` to the `:name` placeholder(s) recorded at `prepare`
    /// time. Requires an active slot.
    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        match self.slot.as_mut() {
            Some(slot) => {
                slot.bindings.insert(name.to_string(), value.into());
                self.clear_error();
            }
            None => {
                // A failed `prepare()` (e.g. connect failure) already left a
                // more specific error in place; don't clobber it with the
                // generic "no statement" message.
                if self.error.get().is_none() {
                    self.error
                        .set(DbError::new(DbErrorKind::BindFailure, "No statement prepared"));
                }
            }
        }
        self
    }

    /// Dispatches the staged statement. For `SELECT`/`WITH` statements, the
    /// full rowset is fetched eagerly and held until a fetch call or
    /// [`Self::secure`] releases the connection; `sqlx::Any` has no
    /// server-side cursor to keep open across calls, so "keep the connection
    /// until drained" is honored by deferring release rather than by a live
    /// cursor.
    pub async fn execute(&mut self) -> bool {
        let Some(slot) = self.slot.as_ref() else {
            if self.error.get().is_none() {
                self.error
                    .set(DbError::new(DbErrorKind::ExecuteFailure, "No statement prepared"));
            }
            return false;
        };

        let mut resolved = Vec::with_capacity(slot.param_order.len());
        for name in &slot.param_order {
            match slot.bindings.get(name) {
                Some(v) => resolved.push(v.clone()),
                None => {
                    self.error.set(DbError::new(
                        DbErrorKind::ExecuteFailure,
                        format!("Missing binding for parameter \":{name}\""),
                    ));
                    return false;
                }
            }
        }
        let rewritten_sql = slot.rewritten_sql.clone();
        let raw_sql = slot.raw_sql.clone();
        let is_select = slot.is_select;

        let Some(conn) = self.conn.as_mut() else {
            self.error
                .set(DbError::new(DbErrorKind::ExecuteFailure, "No connection available"));
            return false;
        };

        let mut query = sqlx::query(&rewritten_sql);
        for value in &resolved {
            query = value.bind_any(query);
        }

        let operation = infer_operation(&raw_sql, is_select);
        let start = Instant::now();

        if is_select {
            match query.fetch_all(conn.as_conn_mut()).await {
                Ok(rows) => {
                    self.affected_rows = rows.len() as u64;
                    self.last_inserted_id = None;
                    self.pending_rows = Some(rows);
                }
                Err(e) => {
                    self.error.set(normalize(&e, operation));
                    return false;
                }
            }
        } else {
            match query.execute(conn.as_conn_mut()).await {
                Ok(result) => {
                    self.affected_rows = result.rows_affected();
                    self.last_inserted_id = if starts_with_ci(&raw_sql, "insert") {
                        result.last_insert_id().map(|id| id.to_string())
                    } else {
                        None
                    };
                }
                Err(e) => {
                    self.error.set(normalize(&e, operation));
                    return false;
                }
            }
        }

        self.execution_millis = start.elapsed().as_secs_f64() * 1000.0;
        self.clear_error();

        if !is_select && !self.manager.in_transaction(self.pool_name.as_deref()) {
            if let Some(conn) = self.conn.take() {
                self.manager.release(conn, self.pool_name.as_deref()).await;
            }
        }

        true
    }

    async fn release_after_fetch(&mut self) {
        if !self.manager.in_transaction(self.pool_name.as_deref()) {
            if let Some(conn) = self.conn.take() {
                self.manager.release(conn, self.pool_name.as_deref()).await;
            }
        }
    }

    /// Drains the held rowset as maps. Requires a prior successful `SELECT`
    /// execute.
    pub async fn fetch_all(&mut self) -> Option<Vec<RowMap>> {
        match self.pending_rows.take() {
            Some(rows) => {
                let mapped = rows.iter().map(decode_row).collect();
                self.release_after_fetch().await;
                Some(mapped)
            }
            None => {
                self.error
                    .set(DbError::new(DbErrorKind::FetchFailure, "Failed to fetch results"));
                None
            }
        }
    }

    /// Drains the held rowset, converting each row through the caller's
    /// `TryFrom<RowMap>` projection (the row-to-entity casting contract is
    /// referenced only as this bound, never implemented generically).
    pub async fn fetch_all_objects<T>(&mut self) -> Option<Vec<T>>
    where
        T: TryFrom<RowMap>,
    {
        let rows = self.fetch_all().await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match T::try_from(row) {
                Ok(obj) => out.push(obj),
                Err(_) => {
                    self.error
                        .set(DbError::new(DbErrorKind::FetchFailure, "Failed to fetch results"));
                    return None;
                }
            }
        }
        Some(out)
    }

    pub async fn fetch_one(&mut self) -> Option<RowMap> {
        let rows = self.fetch_all().await?;
        rows.into_iter().next()
    }

    pub async fn fetch_column(&mut self) -> Option<RowValue> {
        let row = self.fetch_one().await?;
        row.into_values().next()
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_inserted_id(&self) -> Option<String> {
        self.last_inserted_id.clone()
    }

    pub fn execution_millis(&self) -> f64 {
        self.execution_millis
    }

    pub fn last_error(&self) -> Option<DbError> {
        self.error.get().cloned()
    }

    pub fn in_transaction(&self) -> bool {
        self.manager.in_transaction(self.pool_name.as_deref())
    }

    pub async fn begin_transaction(&mut self) -> bool {
        self.manager
            .begin_transaction(&mut self.conn, self.pool_name.as_deref())
            .await
    }

    pub async fn commit(&mut self) -> bool {
        self.manager
            .commit(&mut self.conn, self.pool_name.as_deref())
            .await
    }

    pub async fn rollback(&mut self) -> bool {
        self.manager
            .rollback(&mut self.conn, self.pool_name.as_deref())
            .await
    }

    /// Idempotent teardown: rolls back if `force_rollback` or a transaction
    /// is active, closes the cursor, releases the connection. Guaranteed to
    /// run (best-effort) on session destruction via `Drop`.
    pub async fn secure(&mut self, force_rollback: bool) {
        self.pending_rows = None;
        if force_rollback || self.in_transaction() {
            self.manager
                .rollback(&mut self.conn, self.pool_name.as_deref())
                .await;
        }
        if let Some(conn) = self.conn.take() {
            self.manager.release(conn, self.pool_name.as_deref()).await;
        }
    }
}

impl Drop for QueryExecuter {
    fn drop(&mut self) {
        if self.conn.is_none() && !self.in_transaction() {
            return;
        }
        let manager = self.manager.clone();
        let mut conn = self.conn.take();
        let pool_name = self.pool_name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if manager.in_transaction(pool_name.as_deref()) {
                        manager.rollback(&mut conn, pool_name.as_deref()).await;
                    }
                    if let Some(conn) = conn {
                        manager.release(conn, pool_name.as_deref()).await;
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    "QueryExecuter dropped outside a tokio runtime; connection teardown skipped"
                );
            }
        }
    }
}

fn starts_with_ci(sql: &str, needle: &str) -> bool {
    let trimmed = sql.trim_start();
    trimmed
        .get(..needle.len())
        .map(|s| s.eq_ignore_ascii_case(needle))
        .unwrap_or(false)
}

fn infer_operation(sql: &str, is_select: bool) -> Operation {
    if is_select {
        return Operation::Select;
    }
    if starts_with_ci(sql, "insert") {
        Operation::Insert
    } else if starts_with_ci(sql, "update") {
        Operation::Update
    } else if starts_with_ci(sql, "delete") {
        Operation::Delete
    } else {
        Operation::Execute
    }
}

/// Rewrites `:name` tokens (outside `'...'` string literals) to the
/// dialect's positional placeholder, returning the rewritten SQL and the
/// occurrence order used to resolve bindings at execute time.
fn rewrite_named_params(sql: &str, dialect: Dialect) -> (String, Vec<String>) {
    let chars: Vec<char> = sql.chars().collect();
    let mut output = String::with_capacity(sql.len());
    let mut order: Vec<String> = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_string = !in_string;
            output.push(c);
            i += 1;
            continue;
        }
        if !in_string
            && c == ':'
            && i + 1 < chars.len()
            && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_')
        {
            let start = i + 1;
            let mut j = start;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let name: String = chars[start..j].iter().collect();
            order.push(name);
            match dialect {
                Dialect::Postgres => output.push_str(&format!("${}", order.len())),
                Dialect::MySql | Dialect::Sqlite => output.push('?'),
            }
            i = j;
            continue;
        }
        output.push(c);
        i += 1;
    }

    (output, order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_named_params_for_mysql() {
        let (sql, order) = rewrite_named_params("SELECT * FROM t WHERE a = :x AND b = :y", Dialect::MySql);
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(order, vec!["x", "y"]);
    }

    #[test]
    fn rewrites_named_params_for_postgres_with_repeats() {
        let (sql, order) =
            rewrite_named_params("WHERE a = :x OR b = :x", Dialect::Postgres);
        assert_eq!(sql, "WHERE a = $1 OR b = $2");
        assert_eq!(order, vec!["x", "x"]);
    }

    #[test]
    fn ignores_colons_inside_string_literals() {
        let (sql, order) = rewrite_named_params("SELECT ':not_a_param' WHERE a = :real", Dialect::MySql);
        assert_eq!(sql, "SELECT ':not_a_param' WHERE a = ?");
        assert_eq!(order, vec!["real"]);
    }

    #[test]
    fn detects_statement_kind() {
        assert!(starts_with_ci("  select 1", "select"));
        assert!(!starts_with_ci("insert into t", "select"));
    }

    fn mock_manager_never_in_transaction() -> crate::manager::MockConnectionManager {
        let mut mock = crate::manager::MockConnectionManager::new();
        mock.expect_in_transaction().returning(|_| false);
        mock
    }

    #[tokio::test]
    async fn prepare_rejects_empty_query_without_acquiring() {
        let manager: Arc<dyn ConnectionManager> = Arc::new(mock_manager_never_in_transaction());
        let mut executer = QueryExecuter::new(manager, None);
        executer.prepare("   ").await;
        assert_eq!(executer.last_error().unwrap().message, "Query is empty");
    }

    #[tokio::test]
    async fn prepare_rejects_oversized_query() {
        let manager: Arc<dyn ConnectionManager> = Arc::new(mock_manager_never_in_transaction());
        let mut executer = QueryExecuter::new(manager, None);
        let huge = "a".repeat(MAX_QUERY_BYTES + 1);
        executer.prepare(&huge).await;
        assert_eq!(
            executer.last_error().unwrap().message,
            "Query exceeds maximum length"
        );
    }

    #[tokio::test]
    async fn bind_without_prepare_sets_no_statement_error() {
        let manager: Arc<dyn ConnectionManager> = Arc::new(mock_manager_never_in_transaction());
        let mut executer = QueryExecuter::new(manager, None);
        executer.bind("x", 1i64);
        assert_eq!(executer.last_error().unwrap().message, "No statement prepared");
    }

    #[tokio::test]
    async fn execute_without_prepare_sets_no_statement_error() {
        let manager: Arc<dyn ConnectionManager> = Arc::new(mock_manager_never_in_transaction());
        let mut executer = QueryExecuter::new(manager, None);
        assert!(!executer.execute().await);
        assert_eq!(executer.last_error().unwrap().message, "No statement prepared");
    }

    /// A failed `prepare()` (connection acquisition failure) must surface
    /// its specific "Error preparing statement: ..." message; a subsequent
    /// `bind()` call must not clobber it with the generic bind-failure text.
    #[tokio::test]
    async fn prepare_acquire_failure_survives_a_later_bind_call() {
        let mut mock = mock_manager_never_in_transaction();
        mock.expect_acquire().returning(|_| None);
        mock.expect_last_error().returning(|| {
            Some(DbError::new(
                DbErrorKind::ConnectFailure,
                "Failed to connect: connection refused",
            ))
        });
        let manager: Arc<dyn ConnectionManager> = Arc::new(mock);
        let mut executer = QueryExecuter::new(manager, None);

        executer.prepare("SELECT 1").await;
        let prepare_err = executer.last_error().unwrap().message;
        assert!(prepare_err.starts_with("Error preparing statement: "), "{prepare_err}");

        executer.bind("x", 1i64);
        assert_eq!(executer.last_error().unwrap().message, prepare_err);
    }
}
