//! Persistent connection manager: requests a long-lived handle from the
//! driver and hands the same handle back out across sessions.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::ConnectOptions;
use sqlx::Executor;

use crate::config::ConnectionDescriptor;
use crate::environment::Environment;
use crate::error::{DbError, DbErrorKind, ErrorSlot};
use crate::transaction::TransactionCoordinator;

use super::{ConnectionHandle, ConnectionManager, ManagerKind, ManagerStats};

/// Unlike [`super::SimpleManager`], `release` does not close the socket: the
/// handle is kept so a later `acquire` can hand it straight back out,
/// simulating the OS-level persistence the driver layer provides in the
/// reference system. Isolation guarantees across re-acquisition are
/// driver-dependent and not guaranteed here (§9 Open Questions).
pub struct PersistentManager {
    descriptor: ConnectionDescriptor,
    environment: Environment,
    tx: Mutex<TransactionCoordinator>,
    cached: Mutex<Option<sqlx::AnyConnection>>,
    checked_out: Mutex<bool>,
    initialized: bool,
    error: Mutex<ErrorSlot>,
}

impl PersistentManager {
    pub fn new(descriptor: ConnectionDescriptor, environment: Environment) -> Self {
        let initialized = descriptor.is_configured();
        let mut error = ErrorSlot::new();
        if !initialized {
            error.set(DbError::new(
                DbErrorKind::ConfigMissing,
                "Database configuration is missing; falling back to defaults",
            ));
        }
        Self {
            descriptor,
            environment,
            tx: Mutex::new(TransactionCoordinator::new()),
            cached: Mutex::new(None),
            checked_out: Mutex::new(false),
            initialized,
            error: Mutex::new(error),
        }
    }

    async fn dial(&self) -> Result<sqlx::AnyConnection, sqlx::Error> {
        crate::config::ensure_any_drivers_installed();
        let url = self.descriptor.to_url();
        url.parse::<sqlx::any::AnyConnectOptions>()?
            .connect()
            .await
    }

    fn set_error(&self, err: DbError) {
        self.error.lock().set(err);
    }
}

#[async_trait]
impl ConnectionManager for PersistentManager {
    async fn acquire(&self, _pool_name: Option<&str>) -> Option<ConnectionHandle> {
        if let Some(conn) = self.cached.lock().take() {
            *self.checked_out.lock() = true;
            self.error.lock().clear();
            return Some(ConnectionHandle::Owned(conn));
        }

        match self.dial().await {
            Ok(conn) => {
                *self.checked_out.lock() = true;
                self.error.lock().clear();
                Some(ConnectionHandle::Owned(conn))
            }
            Err(e) => {
                self.set_error(DbError::new(
                    DbErrorKind::ConnectFailure,
                    format!("Failed to connect: {e}"),
                ));
                None
            }
        }
    }

    async fn release(&self, conn: ConnectionHandle, _pool_name: Option<&str>) {
        if let ConnectionHandle::Owned(conn) = conn {
            *self.cached.lock() = Some(conn);
        }
        *self.checked_out.lock() = false;
    }

    async fn begin_transaction(
        &self,
        slot: &mut Option<ConnectionHandle>,
        pool_name: Option<&str>,
    ) -> bool {
        if slot.is_none() {
            match self.acquire(pool_name).await {
                Some(conn) => *slot = Some(conn),
                None => return false,
            }
        }

        match self.tx.lock().begin() {
            Ok(()) => {
                if let Some(conn) = slot.as_mut() {
                    if let Err(e) = conn.as_conn_mut().execute("BEGIN").await {
                        self.tx.lock().force_rollback();
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
        match self.tx.lock().commit() {
            Ok(()) => {
                if let Some(mut conn) = slot.take() {
                    match conn.as_conn_mut().execute("COMMIT").await {
                        Ok(_) => self.release(conn, pool_name).await,
                        Err(e) => {
                            // The connection's state after a failed COMMIT is
                            // uncertain; drop it rather than caching it for reuse.
                            drop(conn);
                            *self.checked_out.lock() = false;
                            self.set_error(DbError::new(
                                DbErrorKind::ExecuteFailure,
                                format!("Failed to commit transaction: {e}"),
                            ));
                            return false;
                        }
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
        match self.tx.lock().rollback() {
            Ok(()) => {
                if let Some(mut conn) = slot.take() {
                    match conn.as_conn_mut().execute("ROLLBACK").await {
                        Ok(_) => self.release(conn, pool_name).await,
                        Err(e) => {
                            drop(conn);
                            *self.checked_out.lock() = false;
                            self.set_error(DbError::new(
                                DbErrorKind::ExecuteFailure,
                                format!("Failed to rollback transaction: {e}"),
                            ));
                            return false;
                        }
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

    fn in_transaction(&self, _pool_name: Option<&str>) -> bool {
        self.tx.lock().in_transaction()
    }

    async fn disconnect(&self) {
        if self.in_transaction(None) {
            self.tx.lock().force_rollback();
        }
        *self.checked_out.lock() = false;
        *self.cached.lock() = None;
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            kind: ManagerKind::Persistent,
            environment: self.environment,
            has_connection: *self.checked_out.lock() || self.cached.lock().is_some(),
            in_transaction: self.in_transaction(None),
            initialized: self.initialized,
            persistent: true,
            config: self.descriptor.clone(),
        }
    }

    fn last_error(&self) -> Option<DbError> {
        self.error.lock().get().cloned()
    }
}
