//! Environment detection (C1).

use std::env;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The runtime shape a session is operating under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    /// An async runtime with a shared connection pool (the Pooled manager).
    PooledAsync,
    /// A classic, single-connection-per-request synchronous caller.
    Synchronous,
    /// An embedded/local database with no network round trip.
    Embedded,
}

/// Detection timing/cache metrics (diagnostic surface only).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DetectionMetrics {
    pub detection: Duration,
    pub cached: bool,
}

/// Classifies the current process as [`Environment::PooledAsync`],
/// [`Environment::Synchronous`], or [`Environment::Embedded`], caching the
/// result until [`EnvironmentDetector::reset`] is called.
///
/// `WEBSERVER_TYPE` wins outright when set; otherwise the presence of an
/// async-pool runtime marker (`DB_DRIVER=sqlite` counts as embedded; a
/// running multi-threaded tokio runtime plus a pooled driver counts as
/// pooled-async) decides the rest.
pub struct EnvironmentDetector {
    cache: Mutex<Option<Environment>>,
    last_metrics: Mutex<Option<DetectionMetrics>>,
}

impl Default for EnvironmentDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentDetector {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
            last_metrics: Mutex::new(None),
        }
    }

    pub fn detect(&self) -> Environment {
        if let Some(env) = *self.cache.lock() {
            *self.last_metrics.lock() = Some(DetectionMetrics {
                detection: Duration::ZERO,
                cached: true,
            });
            return env;
        }
        self.force_detect()
    }

    /// Bypasses the cache and re-runs classification, repopulating it.
    pub fn force_detect(&self) -> Environment {
        let start = Instant::now();
        let env = classify();
        let elapsed = start.elapsed();
        *self.cache.lock() = Some(env);
        *self.last_metrics.lock() = Some(DetectionMetrics {
            detection: elapsed,
            cached: false,
        });
        env
    }

    pub fn metrics(&self) -> Option<DetectionMetrics> {
        *self.last_metrics.lock()
    }

    /// Test hook: clears the cached classification.
    pub fn reset(&self) {
        *self.cache.lock() = None;
        *self.last_metrics.lock() = None;
    }
}

fn classify() -> Environment {
    if let Ok(webserver_type) = env::var("WEBSERVER_TYPE") {
        return match webserver_type.to_lowercase().as_str() {
            "pooled-async" | "pooledasync" | "async" => Environment::PooledAsync,
            "embedded" => Environment::Embedded,
            _ => Environment::Synchronous,
        };
    }

    if env::var("DB_DRIVER")
        .map(|v| v.eq_ignore_ascii_case("sqlite"))
        .unwrap_or(false)
    {
        return Environment::Embedded;
    }

    if tokio::runtime::Handle::try_current().is_ok() {
        return Environment::PooledAsync;
    }

    Environment::Synchronous
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    static ENV_LOCK: StdMutex<()> = StdMutex::new(());

    #[test]
    fn webserver_type_override_wins() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("WEBSERVER_TYPE", "embedded") };
        let detector = EnvironmentDetector::new();
        assert_eq!(detector.force_detect(), Environment::Embedded);
        unsafe { std::env::remove_var("WEBSERVER_TYPE") };
    }

    #[test]
    fn detect_caches_until_reset() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("WEBSERVER_TYPE", "synchronous") };
        let detector = EnvironmentDetector::new();
        assert_eq!(detector.detect(), Environment::Synchronous);
        assert!(detector.metrics().unwrap().cached == false);

        unsafe { std::env::set_var("WEBSERVER_TYPE", "embedded") };
        // Still cached: the override change is not observed until reset.
        assert_eq!(detector.detect(), Environment::Synchronous);
        assert!(detector.metrics().unwrap().cached);

        detector.reset();
        assert_eq!(detector.detect(), Environment::Embedded);
        unsafe { std::env::remove_var("WEBSERVER_TYPE") };
    }
}
