//! Error types for the alert subsystem.

use thiserror::Error;

/// Failures while enumerating or reading alert configuration.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("alert group '{project}/{group}' not found")]
    GroupNotFound { project: String, group: String },

    #[error("invalid group file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("config watch failed: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures from an alert-state store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("persist failed: {0}")]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed group evaluation tick.
///
/// Per-rule query and shape failures are not represented here — they are
/// recorded on the rule's status and the tick continues. Only failures that
/// abort the tick surface as `EvalError`.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("config lookup failed: {0}")]
    Config(#[from] WatcherError),

    #[error("persisting rule state failed: {0}")]
    StatePersist(#[from] StoreError),

    #[error("transition delivery failed for rule '{rule}': {message}")]
    TransitionDelivery { rule: String, message: String },
}

/// A failed reconcile pass.
///
/// `Clone` so that coalesced reconcile callers can all observe the same
/// outcome; the payload is the rendered message of the underlying failure.
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error("config enumeration failed: {0}")]
    Watcher(String),
}

impl From<WatcherError> for SchedulerError {
    fn from(err: WatcherError) -> Self {
        SchedulerError::Watcher(err.to_string())
    }
}
