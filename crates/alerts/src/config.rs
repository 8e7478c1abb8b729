//! Scheduler-level configuration.

use std::env;
use std::time::Duration;

use crate::schema::duration::parse_duration;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_duration(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| parse_duration(&s))
        .unwrap_or(default)
}

/// Tunables for the scheduler facade. Per-group settings (the evaluation
/// interval) live in the group documents, not here.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the periodic reconcile fires.
    pub reconcile_every: Duration,
    /// Drain budget for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_every: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    /// Read configuration from `LANTERN_RECONCILE_EVERY` and
    /// `LANTERN_SHUTDOWN_TIMEOUT` (duration strings like "90s" or "2m"),
    /// falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reconcile_every: env_duration("LANTERN_RECONCILE_EVERY", defaults.reconcile_every),
            shutdown_timeout: env_duration("LANTERN_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout),
        }
    }
}
