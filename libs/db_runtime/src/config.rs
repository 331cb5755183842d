//! Connection descriptors and environment-variable configuration loading.
//!
//! Values are sourced from process environment variables with per-field
//! defaults; non-parseable numerics fall back to their default rather than
//! failing the whole load, loading `.env` best-effort first.

use std::env;
use std::sync::Once;
use std::time::Duration;

static ANY_DRIVERS: Once = Once::new();

/// Registers `sqlx::Any`'s backing drivers (mysql/postgres/sqlite) once per
/// process. Every manager variant dials through `AnyConnectOptions`, so each
/// calls this before its first connect attempt.
pub fn ensure_any_drivers_installed() {
    ANY_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// The three dialects this runtime speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    fn from_env_value(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Dialect::Postgres,
            "sqlite" => Dialect::Sqlite,
            _ => Dialect::MySql,
        }
    }
}

/// A connection descriptor (§3): everything needed to dial a backing
/// connection, independent of whether the manager is Simple, Persistent or
/// Pooled.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionDescriptor {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    // Diagnostic snapshots (ManagerStats, health endpoints) serialize this
    // descriptor; the password never belongs in that output.
    #[serde(skip_serializing)]
    pub password: String,
    pub charset: String,
    pub collation: String,
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self {
            dialect: Dialect::MySql,
            host: "localhost".to_string(),
            port: 3306,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            charset: "utf8mb4".to_string(),
            collation: "utf8mb4_unicode_ci".to_string(),
        }
    }
}

impl ConnectionDescriptor {
    /// Whether configuration loading actually found a target database, as
    /// opposed to falling back to all-defaults. `database` is the clearest
    /// signal: `username` can legitimately be empty under trust auth, but an
    /// empty database name means nothing real was configured.
    pub fn is_configured(&self) -> bool {
        !self.database.is_empty()
    }

    /// Builds a connection URL for `sqlx::AnyPool`.
    ///
    /// SQLite ignores host/port/credentials entirely; `database` is treated
    /// as a filesystem path (or `:memory:`).
    pub fn to_url(&self) -> String {
        match self.dialect {
            Dialect::MySql => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.database
            ),
            Dialect::Postgres => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.database
            ),
            Dialect::Sqlite => format!("sqlite://{}", self.database),
        }
    }
}

/// Pool-specific tuning (§3); only meaningful for the Pooled manager
/// variant.
#[derive(Debug, Clone)]
pub struct PoolDescriptor {
    pub min: u32,
    pub max: u32,
    pub connect_timeout: Duration,
    pub wait_timeout: Duration,
    pub max_idle: Duration,
    pub heartbeat: Option<Duration>,
}

impl Default for PoolDescriptor {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            connect_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(3),
            max_idle: Duration::from_secs(60),
            heartbeat: None,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_truthy(key: &str) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => false,
    }
}

/// Loads a [`ConnectionDescriptor`] from the process environment, applying
/// the defaults tabulated in SPEC_FULL §6. A missing `.env` file is not an
/// error; it is simply skipped (best-effort, matching teacher's
/// `dotenv::dotenv()` handling in `wire_api::Config::load`).
pub fn load_connection_descriptor() -> ConnectionDescriptor {
    match dotenv::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env file"),
        Err(e) => tracing::debug!(%e, "no .env file loaded"),
    }

    let driver = env_string("DB_DRIVER", "mysql");
    // DB_HOST_CLI_DEV overrides DB_HOST when set, for CLI/dev contexts.
    let host = env::var("DB_HOST_CLI_DEV")
        .ok()
        .or_else(|| env::var("DB_HOST").ok())
        .unwrap_or_else(|| "localhost".to_string());

    ConnectionDescriptor {
        dialect: Dialect::from_env_value(&driver),
        host,
        port: env_parsed("DB_PORT", 3306),
        database: env_string("DB_NAME", ""),
        username: env_string("DB_USER", ""),
        password: env_string("DB_PASSWORD", ""),
        charset: env_string("DB_CHARSET", "utf8mb4"),
        collation: env_string("DB_COLLATION", "utf8mb4_unicode_ci"),
    }
}

/// Loads a [`PoolDescriptor`] from the process environment.
///
/// `DB_HEARTBEAT_SEC` is an addition beyond the documented env table: `0` or
/// unset disables the background ping loop, matching the "no heartbeat in
/// the defaults" baseline.
pub fn load_pool_descriptor() -> PoolDescriptor {
    let heartbeat_secs: u64 = env_parsed("DB_HEARTBEAT_SEC", 0);
    PoolDescriptor {
        min: env_parsed("MIN_DB_CONNECTION_POOL", 1),
        max: env_parsed("MAX_DB_CONNECTION_POOL", 10),
        connect_timeout: Duration::from_secs(env_parsed("DB_CONNECTION_TIME_OUT", 10)),
        wait_timeout: Duration::from_secs(env_parsed("DB_CONNECTION_EXPIER_TIME", 3)),
        max_idle: Duration::from_secs(env_parsed("DB_CONNECTION_MAX_AGE", 60)),
        heartbeat: (heartbeat_secs > 0).then(|| Duration::from_secs(heartbeat_secs)),
    }
}

/// Whether `DB_PERSISTENT_CONNECTIONS` selects the Persistent manager
/// variant.
pub fn persistent_connections_requested() -> bool {
    env_truthy("DB_PERSISTENT_CONNECTIONS")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in [
            "DB_DRIVER",
            "DB_HOST",
            "DB_HOST_CLI_DEV",
            "DB_PORT",
            "DB_NAME",
        ] {
            unsafe { env::remove_var(key) };
        }
        let descriptor = load_connection_descriptor();
        assert_eq!(descriptor.host, "localhost");
        assert_eq!(descriptor.port, 3306);
        assert!(matches!(descriptor.dialect, Dialect::MySql));
    }

    #[test]
    fn unparseable_port_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("DB_PORT", "not-a-number") };
        let descriptor = load_connection_descriptor();
        assert_eq!(descriptor.port, 3306);
        unsafe { env::remove_var("DB_PORT") };
    }

    #[test]
    fn cli_dev_host_overrides_host() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            env::set_var("DB_HOST", "prod.internal");
            env::set_var("DB_HOST_CLI_DEV", "localhost.dev");
        }
        let descriptor = load_connection_descriptor();
        assert_eq!(descriptor.host, "localhost.dev");
        unsafe {
            env::remove_var("DB_HOST");
            env::remove_var("DB_HOST_CLI_DEV");
        }
    }

    #[test]
    fn truthy_values_recognized() {
        let _guard = ENV_LOCK.lock().unwrap();
        for truthy in ["1", "true", "yes", "TRUE"] {
            unsafe { env::set_var("DB_PERSISTENT_CONNECTIONS", truthy) };
            assert!(persistent_connections_requested());
        }
        unsafe { env::set_var("DB_PERSISTENT_CONNECTIONS", "0") };
        assert!(!persistent_connections_requested());
        unsafe { env::remove_var("DB_PERSISTENT_CONNECTIONS") };
    }
}
