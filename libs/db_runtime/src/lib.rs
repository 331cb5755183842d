//! `db_runtime`: a typed, pooled, environment-adaptive bridge between
//! application code and SQL engines (MySQL, PostgreSQL, SQLite).
//!
//! Four tightly coupled subsystems: connection lifecycle (environment
//! detection + the three `ConnectionManager` variants), query execution
//! (`QueryExecuter`, parameter binding, fetch, error normalization), the
//! transaction coordinator, and schema reconciliation against a live
//! catalog.

pub mod adapter;
pub mod config;
pub mod environment;
pub mod error;
pub mod executer;
pub mod manager;
pub mod pagination;
pub mod row;
pub mod schema;
pub mod transaction;
pub mod value;

pub use adapter::QueryAdapter;
pub use config::{ConnectionDescriptor, Dialect, PoolDescriptor};
pub use environment::{DetectionMetrics, Environment, EnvironmentDetector};
pub use error::{DbError, DbErrorKind};
pub use executer::QueryExecuter;
pub use manager::{ConnectionManager, ConnectionManagerFactory, ManagerKind, ManagerStats};
pub use pagination::PaginationManager;
pub use row::{RowMap, RowValue};
pub use schema::{Constraint, ConstraintDescriptor, ConstraintKind, ReferentialAction, SchemaReconciler};
pub use value::Value;
