//! The alert scheduler facade.
//!
//! [`Scheduler::start`] drives an outer loop that alternates reconciling the
//! worker registry against the configuration source and waiting on the
//! reconcile trigger. Each discovered (project, group) pair gets one
//! long-running worker task that evaluates the group on its interval; the
//! reconciler starts, stops, and restarts workers as configuration changes.
//!
//! Trigger timing is injected: production uses interval sleeps, tests install
//! channels they drive by hand (see [`SchedulerBuilder::group_trigger`]).

mod reconcile;
mod worker;


use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lantern_query::Queryable;

use crate::config::SchedulerConfig;
use crate::error::{EvalError, SchedulerError};
use crate::evaluator::TransitionSink;
use crate::loader::ConfigSource;
use crate::store::AlertStateStore;

use self::reconcile::ReconcileGate;

// ── Injected timing and observability ───────────────────────────────

/// Source of "now" for evaluations. Tests substitute fixed or stepped clocks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Produces the future the outer loop waits on between reconciles.
pub type ReconcileTriggerFactory = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Produces the future a group worker waits on between ticks. Arguments:
/// project name, group name, group interval.
pub type GroupTriggerFactory =
    Arc<dyn Fn(&str, &str, Duration) -> BoxFuture<'static, ()> + Send + Sync>;

pub type ReconcileHook = Arc<dyn Fn() + Send + Sync>;
pub type ReconcileErrorHook = Arc<dyn Fn(&SchedulerError) + Send + Sync>;
pub type GroupHook = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type EvaluationErrorHook = Arc<dyn Fn(&str, &str, &EvalError, u32) + Send + Sync>;

/// Optional synchronous callbacks into scheduler lifecycle events.
///
/// All hooks are invoked without the registry lock held.
/// `on_evaluator_will_start` fires before the worker task is spawned so a
/// test harness can pre-install its trigger channel.
#[derive(Clone, Default)]
pub struct SchedulerHooks {
    pub on_reconcile_complete: Option<ReconcileHook>,
    pub on_reconcile_error: Option<ReconcileErrorHook>,
    pub on_evaluation_complete: Option<GroupHook>,
    pub on_evaluation_error: Option<EvaluationErrorHook>,
    pub on_evaluator_will_start: Option<GroupHook>,
    pub on_evaluator_started: Option<GroupHook>,
    pub on_evaluator_stopped: Option<GroupHook>,
}

// ── Worker registry ─────────────────────────────────────────────────

pub(crate) struct WorkerHandle {
    pub(crate) project: String,
    pub(crate) group: String,
    pub(crate) interval: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

pub(crate) fn registry_key(project: &str, group: &str) -> String {
    format!("{project}/{group}")
}

pub(crate) struct SchedulerCore {
    pub(crate) source: Arc<dyn ConfigSource>,
    pub(crate) queryable: Arc<dyn Queryable>,
    pub(crate) store: Arc<dyn AlertStateStore>,
    pub(crate) sink: Arc<dyn TransitionSink>,
    pub(crate) clock: Clock,
    pub(crate) config: SchedulerConfig,
    pub(crate) hooks: SchedulerHooks,
    pub(crate) reconcile_trigger: ReconcileTriggerFactory,
    pub(crate) group_trigger: GroupTriggerFactory,
    /// Live workers keyed by "project/group". The lock is held only while
    /// mutating the map, never across awaits.
    pub(crate) registry: Mutex<HashMap<String, WorkerHandle>>,
    pub(crate) gate: ReconcileGate,
    cancel_root: OnceLock<CancellationToken>,
}

impl SchedulerCore {
    /// The token worker cancellations derive from. Adopted from the context
    /// handed to [`Scheduler::start`]; standalone reconciles get a detached
    /// root (their workers are still stopped individually).
    pub(crate) fn run_token(&self) -> CancellationToken {
        self.cancel_root.get_or_init(CancellationToken::new).clone()
    }
}

// ── Facade ──────────────────────────────────────────────────────────

/// Public entry point owning the worker registry.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    pub fn builder(
        source: Arc<dyn ConfigSource>,
        queryable: Arc<dyn Queryable>,
        store: Arc<dyn AlertStateStore>,
        sink: Arc<dyn TransitionSink>,
    ) -> SchedulerBuilder {
        SchedulerBuilder::new(source, queryable, store, sink)
    }

    /// Run until `cancel` fires: reconcile immediately, then alternate
    /// waiting on the reconcile trigger and reconciling. Reconcile failures
    /// are reported through hooks and logging; they never end the loop.
    pub async fn start(&self, cancel: CancellationToken) {
        let _ = self.core.cancel_root.set(cancel.clone());

        info!(
            reconcile_every = ?self.core.config.reconcile_every,
            "alert scheduler started"
        );
        let _ = reconcile::run(&self.core, &cancel).await;

        loop {
            let trigger = (self.core.reconcile_trigger)();
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop_all().await;
                    info!("alert scheduler stopped");
                    return;
                }
                _ = trigger => {
                    let _ = reconcile::run(&self.core, &cancel).await;
                }
            }
        }
    }

    /// Reconcile now. Concurrent calls (including the periodic reconcile)
    /// collapse into one pass; every caller observes that pass's outcome.
    pub async fn trigger_reconcile(&self) -> Result<(), SchedulerError> {
        let cancel = self.core.run_token();
        reconcile::run(&self.core, &cancel).await
    }

    /// Keys ("project/group") of currently registered workers, sorted.
    pub fn worker_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .core
            .registry
            .lock()
            .expect("worker registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn worker_count(&self) -> usize {
        self.core
            .registry
            .lock()
            .expect("worker registry lock poisoned")
            .len()
    }

    /// Cancel every worker and wait for each to drain, bounded by the
    /// configured shutdown budget. The registry is empty afterwards.
    async fn stop_all(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut registry = self
                .core
                .registry
                .lock()
                .expect("worker registry lock poisoned");
            registry.drain().map(|(_, handle)| handle).collect()
        };
        if handles.is_empty() {
            return;
        }

        info!(workers = handles.len(), "draining group workers");
        for handle in &handles {
            handle.cancel.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.core.config.shutdown_timeout;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle.join).await.is_err() {
                warn!(
                    worker = %registry_key(&handle.project, &handle.group),
                    "worker did not drain within the shutdown budget; aborting"
                );
                handle.join.abort();
            }
            if let Some(hook) = &self.core.hooks.on_evaluator_stopped {
                hook(&handle.project, &handle.group);
            }
        }
    }
}

// ── Builder ─────────────────────────────────────────────────────────

/// Fluent configuration for a [`Scheduler`].
pub struct SchedulerBuilder {
    source: Arc<dyn ConfigSource>,
    queryable: Arc<dyn Queryable>,
    store: Arc<dyn AlertStateStore>,
    sink: Arc<dyn TransitionSink>,
    config: SchedulerConfig,
    hooks: SchedulerHooks,
    clock: Clock,
    reconcile_trigger: Option<ReconcileTriggerFactory>,
    group_trigger: Option<GroupTriggerFactory>,
}

impl SchedulerBuilder {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        queryable: Arc<dyn Queryable>,
        store: Arc<dyn AlertStateStore>,
        sink: Arc<dyn TransitionSink>,
    ) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        Self {
            source,
            queryable,
            store,
            sink,
            config: SchedulerConfig::default(),
            hooks: SchedulerHooks::default(),
            clock,
            reconcile_trigger: None,
            group_trigger: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hooks(mut self, hooks: SchedulerHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default interval sleep between reconciles.
    pub fn reconcile_trigger(mut self, factory: ReconcileTriggerFactory) -> Self {
        self.reconcile_trigger = Some(factory);
        self
    }

    /// Replace the default per-group interval sleep.
    pub fn group_trigger(mut self, factory: GroupTriggerFactory) -> Self {
        self.group_trigger = Some(factory);
        self
    }

    pub fn build(self) -> Scheduler {
        let reconcile_every = self.config.reconcile_every;
        let reconcile_trigger = self
            .reconcile_trigger
            .unwrap_or_else(|| Arc::new(move || Box::pin(tokio::time::sleep(reconcile_every))));
        let group_trigger = self.group_trigger.unwrap_or_else(|| {
            Arc::new(|_: &str, _: &str, interval: Duration| Box::pin(tokio::time::sleep(interval)))
        });

        Scheduler {
            core: Arc::new(SchedulerCore {
                source: self.source,
                queryable: self.queryable,
                store: self.store,
                sink: self.sink,
                clock: self.clock,
                config: self.config,
                hooks: self.hooks,
                reconcile_trigger,
                group_trigger,
                registry: Mutex::new(HashMap::new()),
                gate: ReconcileGate::new(),
                cancel_root: OnceLock::new(),
            }),
        }
    }
}
