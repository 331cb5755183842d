//! Closed error taxonomy (C4) and the per-component `lastError` slot.

use std::collections::BTreeMap;
use std::fmt;

/// The closed set of error kinds a component can report.
///
/// `thiserror::Error` gives each variant a stable category label via
/// `Display` (distinct from [`DbError`]'s own operation-specific message);
/// used in `tracing` events so logs can be filtered/aggregated by kind
/// without re-parsing the user-facing message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DbErrorKind {
    #[error("configuration missing")]
    ConfigMissing,
    #[error("connect failure")]
    ConnectFailure,
    #[error("prepare failure")]
    PrepareFailure,
    #[error("bind failure")]
    BindFailure,
    #[error("execute failure")]
    ExecuteFailure,
    #[error("duplicate key")]
    DuplicateKey,
    #[error("foreign key violation")]
    ForeignKey,
    #[error("transient error")]
    Transient,
    #[error("fetch failure")]
    FetchFailure,
    #[error("no active transaction")]
    NoActiveTransaction,
    #[error("already in transaction")]
    AlreadyInTransaction,
    #[error("unknown constraint kind")]
    UnknownConstraintKind,
    #[error("constraint apply failure")]
    ConstraintApplyFailure,
}

/// A normalized, user-facing error.
///
/// `Display` renders `message`, followed by `"; Context: k=v, ..."` when
/// `context` is non-empty — matching §3/§7's error-state contract. Context
/// keys are kept in a `BTreeMap` so the rendering is deterministic.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DbError {
    pub kind: DbErrorKind,
    pub message: String,
    pub retryable: bool,
    pub context: BTreeMap<String, String>,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
            context: BTreeMap::new(),
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.context.is_empty() {
            write!(f, "; Context: ")?;
            let rendered = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "{rendered}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DbError {}

/// A component's single `lastError` slot (§3).
///
/// Setting a new error replaces the previous one; setting `None` clears it.
/// Components never surface errors by panicking or propagating exceptions —
/// they store here and return `false`/`None` to the caller.
#[derive(Debug, Default, Clone)]
pub struct ErrorSlot(Option<DbError>);

impl ErrorSlot {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn set(&mut self, error: DbError) {
        self.0 = Some(error);
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn get(&self) -> Option<&DbError> {
        self.0.as_ref()
    }

    pub fn take(&mut self) -> Option<DbError> {
        self.0.take()
    }
}

/// Which higher-level operation a driver error occurred under; selects the
/// user-facing message template in §4.4's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Select,
    Prepare,
    Execute,
    Fetch,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Insert => "Insert",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::Select => "Select",
            Operation::Prepare => "Prepare",
            Operation::Execute => "Execute",
            Operation::Fetch => "Fetch",
        }
    }
}

/// Normalizes a raw `sqlx::Error` into the closed taxonomy (§4.4).
///
/// Duplicate-key and foreign-key detection is grounded in `sqlx`'s own
/// cross-dialect `DatabaseError::kind()` classification, falling back to a
/// message-substring check for drivers or error shapes `sqlx` cannot
/// classify.
pub fn normalize(err: &sqlx::Error, operation: Operation) -> DbError {
    let normalized = normalize_inner(err, operation);
    tracing::debug!(kind = %normalized.kind, retryable = normalized.retryable, "driver error normalized");
    normalized
}

fn normalize_inner(err: &sqlx::Error, operation: Operation) -> DbError {
    if let sqlx::Error::Database(db_err) = err {
        let message = db_err.message().to_string();
        let lower = message.to_lowercase();
        let kind = db_err.kind();

        let is_duplicate = matches!(kind, sqlx::error::ErrorKind::UniqueViolation)
            || lower.contains("duplicate")
            || lower.contains("already exists");
        if is_duplicate {
            let user_message = match operation {
                Operation::Insert => {
                    "The record cannot be created because a record with the same unique information already exists."
                }
                Operation::Update => {
                    "The record cannot be updated because another record with the same unique information already exists."
                }
                _ => {
                    "The operation cannot be completed because a record with the same unique information already exists."
                }
            };
            return DbError::new(DbErrorKind::DuplicateKey, user_message);
        }

        let is_foreign_key = matches!(kind, sqlx::error::ErrorKind::ForeignKeyViolation)
            || lower.contains("foreign key constraint")
            || lower.contains("cannot delete");
        if is_foreign_key {
            let user_message = match operation {
                Operation::Delete => {
                    "The record cannot be deleted because it has related data in other tables."
                }
                _ => {
                    "The operation cannot be completed because it references related data in other tables."
                }
            };
            return DbError::new(DbErrorKind::ForeignKey, user_message);
        }

        if is_transient_message(&lower) {
            return DbError::new(
                DbErrorKind::Transient,
                format!("{} failed: {}", operation.label(), message),
            )
            .retryable()
            .with_context("retryable", "true");
        }

        return DbError::new(
            DbErrorKind::ExecuteFailure,
            format!("{} operation failed: {}", operation.label(), message),
        );
    }

    if is_transient_driver_error(err) {
        return DbError::new(
            DbErrorKind::Transient,
            format!("{} failed: {}", operation.label(), err),
        )
        .retryable()
        .with_context("retryable", "true");
    }

    DbError::new(
        DbErrorKind::ExecuteFailure,
        format!("{} operation failed: {}", operation.label(), err),
    )
}

fn is_transient_message(lower: &str) -> bool {
    lower.contains("connection") || lower.contains("timeout") || lower.contains("deadlock")
}

fn is_transient_driver_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_rendering_is_sorted_and_suffixed() {
        let err = DbError::new(DbErrorKind::Transient, "boom")
            .with_context("b", "2")
            .with_context("a", "1");
        assert_eq!(err.to_string(), "boom; Context: a=1, b=2");
    }

    #[test]
    fn empty_context_has_no_suffix() {
        let err = DbError::new(DbErrorKind::ExecuteFailure, "plain");
        assert_eq!(err.to_string(), "plain");
    }

    #[test]
    fn slot_set_clear_replace() {
        let mut slot = ErrorSlot::new();
        assert!(slot.get().is_none());
        slot.set(DbError::new(DbErrorKind::NoActiveTransaction, "no tx"));
        assert_eq!(slot.get().unwrap().message, "no tx");
        slot.set(DbError::new(DbErrorKind::AlreadyInTransaction, "already"));
        assert_eq!(slot.get().unwrap().message, "already");
        slot.clear();
        assert!(slot.get().is_none());
    }
}
