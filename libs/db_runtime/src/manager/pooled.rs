//! Pooled connection manager: named `sqlx::AnyPool`s for the async/pooled
//! environment, with an optional background heartbeat per pool.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::Executor;
use tokio::sync::RwLock;

use crate::config::{ConnectionDescriptor, PoolDescriptor};
use crate::environment::Environment;
use crate::error::{DbError, DbErrorKind, ErrorSlot};
use crate::transaction::TransactionCoordinator;

use super::{ConnectionHandle, ConnectionManager, ManagerKind, ManagerStats};

const DEFAULT_POOL: &str = "default";

struct NamedPool {
    pool: sqlx::AnyPool,
    tx: parking_lot::Mutex<TransactionCoordinator>,
}

/// Wraps one or more named `sqlx::AnyPool`s, building each lazily from the
/// same [`ConnectionDescriptor`]/[`PoolDescriptor`] pair on first use.
/// `tokio::sync::RwLock` guards the pool table (not `parking_lot`) because
/// pool construction holds the lock across an `.await`.
pub struct PooledManager {
    descriptor: ConnectionDescriptor,
    pool_descriptor: PoolDescriptor,
    environment: Environment,
    pools: RwLock<HashMap<String, NamedPool>>,
    initialized: bool,
    error: parking_lot::Mutex<ErrorSlot>,
}

impl PooledManager {
    pub async fn new(
        descriptor: ConnectionDescriptor,
        pool_descriptor: PoolDescriptor,
        environment: Environment,
    ) -> Self {
        let initialized = descriptor.is_configured();
        let mut error = ErrorSlot::new();
        if !initialized {
            error.set(DbError::new(
                DbErrorKind::ConfigMissing,
                "Database configuration is missing; falling back to defaults",
            ));
        }
        let manager = Self {
            descriptor,
            pool_descriptor,
            environment,
            pools: RwLock::new(HashMap::new()),
            initialized,
            error: parking_lot::Mutex::new(error),
        };
        manager.ensure_pool(DEFAULT_POOL).await;
        manager
    }

    fn set_error(&self, err: DbError) {
        self.error.lock().set(err);
    }

    async fn build_pool(&self) -> Result<sqlx::AnyPool, sqlx::Error> {
        crate::config::ensure_any_drivers_installed();
        let url = self.descriptor.to_url();
        let opts = AnyPoolOptions::new()
            .min_connections(self.pool_descriptor.min)
            .max_connections(self.pool_descriptor.max)
            .acquire_timeout(self.pool_descriptor.connect_timeout)
            .idle_timeout(Some(self.pool_descriptor.max_idle));
        opts.connect(&url).await
    }

    /// Builds and registers the named pool on first reference, spawning a
    /// heartbeat task if `heartbeatSec` was configured.
    async fn ensure_pool(&self, name: &str) -> bool {
        if self.pools.read().await.contains_key(name) {
            return true;
        }
        let mut pools = self.pools.write().await;
        if pools.contains_key(name) {
            return true;
        }
        match self.build_pool().await {
            Ok(pool) => {
                if let Some(interval) = self.pool_descriptor.heartbeat {
                    spawn_heartbeat(pool.clone(), interval);
                }
                pools.insert(
                    name.to_string(),
                    NamedPool {
                        pool,
                        tx: parking_lot::Mutex::new(TransactionCoordinator::new()),
                    },
                );
                true
            }
            Err(e) => {
                self.set_error(DbError::new(
                    DbErrorKind::ConnectFailure,
                    format!("Failed to build pool '{name}': {e}"),
                ));
                false
            }
        }
    }

    fn resolve<'a>(pool_name: Option<&'a str>) -> &'a str {
        pool_name.unwrap_or(DEFAULT_POOL)
    }
}

fn spawn_heartbeat(pool: sqlx::AnyPool, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            if let Err(err) = sqlx::query("SELECT 1").execute(&pool).await {
                tracing::warn!(error = %err, "pool heartbeat query failed");
            }
        }
    });
}

#[async_trait]
impl ConnectionManager for PooledManager {
    async fn acquire(&self, pool_name: Option<&str>) -> Option<ConnectionHandle> {
        let name = Self::resolve(pool_name);
        if !self.ensure_pool(name).await {
            return None;
        }
        let pools = self.pools.read().await;
        let named = pools.get(name)?;
        match tokio::time::timeout(self.pool_descriptor.wait_timeout, named.pool.acquire()).await {
            Ok(Ok(conn)) => {
                self.error.lock().clear();
                Some(ConnectionHandle::Pooled(conn))
            }
            Ok(Err(e)) => {
                self.set_error(DbError::new(
                    DbErrorKind::ConnectFailure,
                    format!("Failed to acquire from pool '{name}': {e}"),
                ));
                None
            }
            Err(_elapsed) => {
                self.set_error(DbError::new(
                    DbErrorKind::ConnectFailure,
                    "Failed to get database connection",
                ));
                None
            }
        }
    }

    async fn release(&self, conn: ConnectionHandle, _pool_name: Option<&str>) {
        // Returning `conn` to the pool happens on drop via sqlx's own guard.
        drop(conn);
    }

    async fn begin_transaction(
        &self,
        slot: &mut Option<ConnectionHandle>,
        pool_name: Option<&str>,
    ) -> bool {
        let name = Self::resolve(pool_name);
        if slot.is_none() {
            match self.acquire(Some(name)).await {
                Some(conn) => *slot = Some(conn),
                None => return false,
            }
        }

        let pools = self.pools.read().await;
        let Some(named) = pools.get(name) else {
            return false;
        };
        match named.tx.lock().begin() {
            Ok(()) => {
                if let Some(conn) = slot.as_mut() {
                    if let Err(e) = conn.as_conn_mut().execute("BEGIN").await {
                        named.tx.lock().force_rollback();
                        self.set_error(DbError::new(
                            DbErrorKind::ExecuteFailure,
                            format!("Failed to start transaction: {e}"),
                        ));
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                self.set_error(e);
                false
            }
        }
    }

    async fn commit(&self, slot: &mut Option<ConnectionHandle>, pool_name: Option<&str>) -> bool {
        let name = Self::resolve(pool_name);
        let pools = self.pools.read().await;
        let Some(named) = pools.get(name) else {
            return false;
        };
        match named.tx.lock().commit() {
            Ok(()) => {
                if let Some(mut conn) = slot.take() {
                    if let Err(e) = conn.as_conn_mut().execute("COMMIT").await {
                        self.set_error(DbError::new(
                            DbErrorKind::ExecuteFailure,
                            format!("Failed to commit transaction: {e}"),
                        ));
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                self.set_error(e);
                false
            }
        }
    }

    async fn rollback(
        &self,
        slot: &mut Option<ConnectionHandle>,
        pool_name: Option<&str>,
    ) -> bool {
        let name = Self::resolve(pool_name);
        let pools = self.pools.read().await;
        let Some(named) = pools.get(name) else {
            return false;
        };
        match named.tx.lock().rollback() {
            Ok(()) => {
                if let Some(mut conn) = slot.take() {
                    if let Err(e) = conn.as_conn_mut().execute("ROLLBACK").await {
                        self.set_error(DbError::new(
                            DbErrorKind::ExecuteFailure,
                            format!("Failed to rollback transaction: {e}"),
                        ));
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                self.set_error(e);
                false
            }
        }
    }

    fn in_transaction(&self, pool_name: Option<&str>) -> bool {
        let name = Self::resolve(pool_name);
        match self.pools.try_read() {
            Ok(pools) => pools
                .get(name)
                .map(|named| named.tx.lock().in_transaction())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn disconnect(&self) {
        let mut pools = self.pools.write().await;
        for named in pools.values() {
            named.tx.lock().force_rollback();
            named.pool.close().await;
        }
        pools.clear();
    }

    fn stats(&self) -> ManagerStats {
        let has_connection = self
            .pools
            .try_read()
            .map(|pools| pools.values().any(|n| n.pool.size() > 0))
            .unwrap_or(false);
        ManagerStats {
            kind: ManagerKind::Pooled,
            environment: self.environment,
            has_connection,
            in_transaction: self.in_transaction(None),
            initialized: self.initialized,
            persistent: false,
            config: self.descriptor.clone(),
        }
    }

    fn last_error(&self) -> Option<DbError> {
        self.error.lock().get().cloned()
    }
}
