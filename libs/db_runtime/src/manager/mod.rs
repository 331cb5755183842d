//! Connection Manager (C2): acquire, hand out, and release backing
//! connections. One trait, three variants — Simple, Persistent, Pooled —
//! selected by the detected [`crate::environment::Environment`].

pub mod persistent;
pub mod pooled;
pub mod simple;

pub use persistent::PersistentManager;
pub use pooled::PooledManager;
pub use simple::SimpleManager;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{self, ConnectionDescriptor};
use crate::environment::{Environment, EnvironmentDetector};
use crate::error::DbError;

/// A checked-out backing connection, however it was acquired.
pub enum ConnectionHandle {
    Owned(sqlx::AnyConnection),
    Pooled(sqlx::pool::PoolConnection<sqlx::Any>),
}

impl ConnectionHandle {
    /// The live connection, for dispatching a query through `sqlx`.
    pub fn as_conn_mut(&mut self) -> &mut sqlx::AnyConnection {
        match self {
            ConnectionHandle::Owned(conn) => conn,
            ConnectionHandle::Pooled(conn) => &mut *conn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    Simple,
    Persistent,
    Pooled,
}

/// Diagnostic snapshot returned by `ConnectionManager::stats` (§4.2).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManagerStats {
    pub kind: ManagerKind,
    pub environment: Environment,
    pub has_connection: bool,
    pub in_transaction: bool,
    pub initialized: bool,
    pub persistent: bool,
    pub config: ConnectionDescriptor,
}

/// The shared contract implemented by [`SimpleManager`], [`PersistentManager`],
/// and [`PooledManager`].
///
/// `pool_name` is advisory: Simple and Persistent ignore it outright; Pooled
/// selects among named pools, defaulting to `"default"` when `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Returns a usable backing connection, clearing any prior error. On
    /// failure, sets the error and returns `None`.
    async fn acquire(&self, pool_name: Option<&str>) -> Option<ConnectionHandle>;

    /// Releases `conn` back to wherever it came from.
    async fn release(&self, conn: ConnectionHandle, pool_name: Option<&str>);

    /// Begins a transaction over `*slot`, acquiring a connection into it
    /// first if `slot` is empty. Fails if already in a transaction.
    ///
    /// `slot` is the caller's (the executer's) own connection slot: unlike
    /// the PHP original this is translated from, a Rust connection is an
    /// owned value with one owner at a time, so the transaction verbs take
    /// that owner's slot by reference instead of silently holding a
    /// connection inside the manager (see `DESIGN.md`).
    async fn begin_transaction(&self, slot: &mut Option<ConnectionHandle>, pool_name: Option<&str>) -> bool;

    /// Commits the transaction active over `*slot` and releases the
    /// connection. Fails with "No active transaction" if none is active.
    async fn commit(&self, slot: &mut Option<ConnectionHandle>, pool_name: Option<&str>) -> bool;

    /// Rolls back the transaction active over `*slot` and releases the
    /// connection. Fails with "No active transaction" if none is active.
    async fn rollback(&self, slot: &mut Option<ConnectionHandle>, pool_name: Option<&str>) -> bool;

    fn in_transaction(&self, pool_name: Option<&str>) -> bool;

    /// Rolls back (if in a transaction) then releases.
    async fn disconnect(&self);

    fn stats(&self) -> ManagerStats;

    fn last_error(&self) -> Option<DbError>;
}

static GLOBAL: Mutex<Option<Arc<dyn ConnectionManager>>> = Mutex::new(None);

/// The process-singleton accessor (Design Note §9): the *only* code that
/// mutates the global manager slot.
pub struct ConnectionManagerFactory;

impl ConnectionManagerFactory {
    /// Returns the process-singleton manager, building it from the detected
    /// environment and process configuration on first call.
    pub async fn get() -> Arc<dyn ConnectionManager> {
        if let Some(existing) = GLOBAL.lock().as_ref().cloned() {
            return existing;
        }
        let manager = Self::build().await;
        *GLOBAL.lock() = Some(manager.clone());
        manager
    }

    async fn build() -> Arc<dyn ConnectionManager> {
        let environment = EnvironmentDetector::new().detect();
        let descriptor = config::load_connection_descriptor();

        if config::persistent_connections_requested() {
            return Arc::new(PersistentManager::new(descriptor, environment));
        }

        match environment {
            Environment::PooledAsync => {
                let pool_descriptor = config::load_pool_descriptor();
                Arc::new(PooledManager::new(descriptor, pool_descriptor, environment).await)
            }
            Environment::Synchronous | Environment::Embedded => {
                Arc::new(SimpleManager::new(descriptor, environment))
            }
        }
    }

    /// Test hook: disconnects and clears the process-singleton slot.
    pub async fn reset_singleton() {
        let existing = GLOBAL.lock().take();
        if let Some(manager) = existing {
            manager.disconnect().await;
        }
    }
}
