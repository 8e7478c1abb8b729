//! Alert rule scheduling and evaluation.
//!
//! This crate provides:
//! - YAML-based alert-group definitions loaded from a config tree
//! - A pure state machine for rule status with `for` / `keep_firing_for` dwell
//! - A per-group evaluator driving queries through [`lantern_query::Queryable`]
//! - A reconciling scheduler that keeps one worker task per configured group
//! - Persistence and transition-delivery contracts for embedders to implement

pub mod config;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod schema;
pub mod scheduler;
pub mod state;
pub mod store;

pub use config::SchedulerConfig;
pub use error::{EvalError, SchedulerError, StoreError, WatcherError};
pub use evaluator::{Evaluator, TransitionEvent, TransitionSink, ALERT_QUERY_LIMIT};
pub use loader::{ConfigSource, DirConfigSource, Page};
pub use schema::{AlertGroup, NamedRuleSpec, Project, RuleSpec};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerHooks};
pub use state::{advance, Contribution, Labels, RuleState, RuleStatus, Transition};
pub use store::{AlertStateStore, MemoryStateStore};
