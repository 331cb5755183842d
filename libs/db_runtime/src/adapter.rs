//! Higher-Level Query Adapter (C6): wraps C3 to expose
//! insert/update/delete/select/selectCount with normalized return contracts.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DbError, DbErrorKind, ErrorSlot};
use crate::executer::QueryExecuter;
use crate::manager::ConnectionManager;
use crate::row::{RowMap, RowValue};
use crate::value::Value;

/// Lazily constructs an [`QueryExecuter`] per call; holds no statement
/// state of its own beyond the last error (§3's per-component `lastError`
/// slot).
pub struct QueryAdapter {
    manager: Arc<dyn ConnectionManager>,
    pool_name: Option<String>,
    error: Mutex<ErrorSlot>,
}

impl QueryAdapter {
    pub fn new(manager: Arc<dyn ConnectionManager>, pool_name: Option<String>) -> Self {
        Self {
            manager,
            pool_name,
            error: Mutex::new(ErrorSlot::new()),
        }
    }

    fn set_error(&self, err: DbError) {
        self.error.lock().set(err);
    }

    fn clear_error(&self) {
        self.error.lock().clear();
    }

    pub fn last_error(&self) -> Option<DbError> {
        self.error.lock().get().cloned()
    }

    async fn dispatch(&self, sql: &str, params: &[(&str, Value)]) -> QueryExecuter {
        let mut executer = QueryExecuter::new(self.manager.clone(), self.pool_name.clone());
        executer.prepare(sql).await;
        for (name, value) in params {
            executer.bind(name, value.clone());
        }
        executer
    }

    fn adopt_executer_error(&self, executer: &QueryExecuter, fallback: &str) {
        self.set_error(
            executer
                .last_error()
                .unwrap_or_else(|| DbError::new(DbErrorKind::ExecuteFailure, fallback)),
        );
    }

    /// Returns `lastInsertedId` as `i64`; if the id is `0`/absent/non-numeric
    /// and `affectedRows >= 1`, returns `1`; `affectedRows == 0` with no
    /// driver error returns `None` with `"Insert operation failed"`.
    pub async fn insert(&self, sql: &str, params: &[(&str, Value)]) -> Option<i64> {
        let mut executer = self.dispatch(sql, params).await;
        if !executer.execute().await {
            self.adopt_executer_error(&executer, "Insert operation failed");
            return None;
        }

        let affected = executer.affected_rows();
        let parsed_id = executer
            .last_inserted_id()
            .and_then(|s| s.parse::<i64>().ok());

        match parsed_id {
            Some(id) if id != 0 => {
                self.clear_error();
                Some(id)
            }
            _ if affected >= 1 => {
                self.clear_error();
                Some(1)
            }
            _ => {
                self.set_error(DbError::new(DbErrorKind::ExecuteFailure, "Insert operation failed"));
                None
            }
        }
    }

    /// Returns `affectedRows`; `0` is a legitimate result, `None` only on
    /// driver error.
    pub async fn update(&self, sql: &str, params: &[(&str, Value)]) -> Option<u64> {
        let mut executer = self.dispatch(sql, params).await;
        if !executer.execute().await {
            self.adopt_executer_error(&executer, "Update operation failed");
            return None;
        }
        self.clear_error();
        Some(executer.affected_rows())
    }

    /// Same semantics as [`Self::update`].
    pub async fn delete(&self, sql: &str, params: &[(&str, Value)]) -> Option<u64> {
        let mut executer = self.dispatch(sql, params).await;
        if !executer.execute().await {
            self.adopt_executer_error(&executer, "Delete operation failed");
            return None;
        }
        self.clear_error();
        Some(executer.affected_rows())
    }

    pub async fn select(&self, sql: &str, params: &[(&str, Value)]) -> Option<Vec<RowMap>> {
        let mut executer = self.dispatch(sql, params).await;
        if !executer.execute().await {
            self.adopt_executer_error(&executer, "Select operation failed");
            return None;
        }
        let rows = executer.fetch_all().await;
        match &rows {
            Some(_) => self.clear_error(),
            None => self.adopt_executer_error(&executer, "Failed to fetch results"),
        }
        rows
    }

    /// Projects rows through the caller-supplied `TryFrom<RowMap>` bound —
    /// the row-to-entity casting contract, referenced only as this bound.
    pub async fn select_objects<T>(&self, sql: &str, params: &[(&str, Value)]) -> Option<Vec<T>>
    where
        T: TryFrom<RowMap>,
    {
        let mut executer = self.dispatch(sql, params).await;
        if !executer.execute().await {
            self.adopt_executer_error(&executer, "Select operation failed");
            return None;
        }
        let objects = executer.fetch_all_objects::<T>().await;
        match &objects {
            Some(_) => self.clear_error(),
            None => self.adopt_executer_error(&executer, "Failed to fetch results"),
        }
        objects
    }

    /// Single scalar; a non-numeric result is `None` with
    /// `"Count query did not return a numeric value"`.
    pub async fn select_count(&self, sql: &str, params: &[(&str, Value)]) -> Option<i64> {
        let mut executer = self.dispatch(sql, params).await;
        if !executer.execute().await {
            self.adopt_executer_error(&executer, "Select operation failed");
            return None;
        }
        match executer.fetch_column().await {
            Some(RowValue::Int(v)) => {
                self.clear_error();
                Some(v)
            }
            Some(RowValue::Float(v)) => {
                self.clear_error();
                Some(v as i64)
            }
            _ => {
                self.set_error(DbError::new(
                    DbErrorKind::FetchFailure,
                    "Count query did not return a numeric value",
                ));
                None
            }
        }
    }
}
