//! Simple connection manager: one connection per session, dialed lazily and
//! discarded on release.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::ConnectOptions;
use sqlx::Executor;

use crate::config::ConnectionDescriptor;
use crate::environment::Environment;
use crate::error::{DbError, DbErrorKind, ErrorSlot};
use crate::transaction::TransactionCoordinator;

use super::{ConnectionHandle, ConnectionManager, ManagerKind, ManagerStats};

/// Holds at most one backing connection, reused by the owning session until
/// [`ConnectionManager::release`] or [`ConnectionManager::disconnect`].
pub struct SimpleManager {
    descriptor: ConnectionDescriptor,
    environment: Environment,
    tx: Mutex<TransactionCoordinator>,
    has_connection: Mutex<bool>,
    initialized: bool,
    error: Mutex<ErrorSlot>,
}

impl SimpleManager {
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
            has_connection: Mutex::new(false),
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
impl ConnectionManager for SimpleManager {
    async fn acquire(&self, _pool_name: Option<&str>) -> Option<ConnectionHandle> {
        match self.dial().await {
            Ok(conn) => {
                *self.has_connection.lock() = true;
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
        drop(conn);
        *self.has_connection.lock() = false;
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

        let begin_result = self.tx.lock().begin();
        match begin_result {
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

    async fn commit(&self, slot: &mut Option<ConnectionHandle>, _pool_name: Option<&str>) -> bool {
        match self.tx.lock().commit() {
            Ok(()) => {
                if let Some(mut conn) = slot.take() {
                    let result = conn.as_conn_mut().execute("COMMIT").await;
                    *self.has_connection.lock() = false;
                    if let Err(e) = result {
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
        _pool_name: Option<&str>,
    ) -> bool {
        match self.tx.lock().rollback() {
            Ok(()) => {
                if let Some(mut conn) = slot.take() {
                    let result = conn.as_conn_mut().execute("ROLLBACK").await;
                    *self.has_connection.lock() = false;
                    if let Err(e) = result {
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

    fn in_transaction(&self, _pool_name: Option<&str>) -> bool {
        self.tx.lock().in_transaction()
    }

    async fn disconnect(&self) {
        if self.in_transaction(None) {
            self.tx.lock().force_rollback();
        }
        *self.has_connection.lock() = false;
    }

    fn stats(&self) -> ManagerStats {
        ManagerStats {
            kind: ManagerKind::Simple,
            environment: self.environment,
            has_connection: *self.has_connection.lock(),
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
