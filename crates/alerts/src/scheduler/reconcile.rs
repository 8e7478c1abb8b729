//! Registry reconciliation.
//!
//! One pass discovers every configured (project, group, interval) triple,
//! stops workers whose group vanished or changed interval, and spawns workers
//! for groups that have none. Interval changes are stop-then-start; there is
//! no in-place retuning. Concurrent passes collapse through [`ReconcileGate`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::loader::{ConfigSource, CONFIG_PAGE_LIMIT};

use super::{registry_key, worker, SchedulerCore, WorkerHandle};

/// A configured group the registry should have a worker for.
#[derive(Debug, Clone)]
pub(crate) struct GroupTarget {
    pub(crate) project: String,
    pub(crate) group: String,
    pub(crate) interval: Duration,
}

/// Run one reconcile pass through the single-flight gate.
pub(crate) async fn run(
    core: &Arc<SchedulerCore>,
    cancel: &CancellationToken,
) -> Result<(), SchedulerError> {
    core.gate.run(|| reconcile_once(core, cancel)).await
}

async fn reconcile_once(
    core: &Arc<SchedulerCore>,
    cancel: &CancellationToken,
) -> Result<(), SchedulerError> {
    let discovered = match discover(core.source.as_ref()).await {
        Ok(discovered) => discovered,
        Err(e) => {
            // The live registry is deliberately left untouched.
            warn!(error = %e, "config discovery failed; keeping current workers");
            if let Some(hook) = &core.hooks.on_reconcile_error {
                hook(&e);
            }
            return Err(e);
        }
    };
    debug!(groups = discovered.len(), "reconciling worker registry");

    // Pull stale workers out of the registry, then drain them without the
    // lock held.
    let stale: Vec<(WorkerHandle, &'static str)> = {
        let mut registry = core.registry.lock().expect("worker registry lock poisoned");
        let stale_keys: Vec<(String, &'static str)> = registry
            .iter()
            .filter_map(|(key, handle)| match discovered.get(key) {
                None => Some((key.clone(), "deleted")),
                Some(target) if target.interval != handle.interval => {
                    Some((key.clone(), "interval changed"))
                }
                Some(_) => None,
            })
            .collect();
        stale_keys
            .into_iter()
            .filter_map(|(key, reason)| registry.remove(&key).map(|handle| (handle, reason)))
            .collect()
    };

    for (mut handle, reason) in stale {
        let key = registry_key(&handle.project, &handle.group);
        debug!(worker = %key, reason, "stopping group worker");
        handle.cancel.cancel();
        tokio::select! {
            _ = &mut handle.join => {}
            _ = cancel.cancelled() => {
                // Abandon the wait; the worker's own cancellation still
                // propagates and shutdown will collect it.
                debug!(worker = %key, "shutdown requested while draining worker");
            }
        }
        if let Some(hook) = &core.hooks.on_evaluator_stopped {
            hook(&handle.project, &handle.group);
        }
    }

    let missing: Vec<GroupTarget> = {
        let registry = core.registry.lock().expect("worker registry lock poisoned");
        discovered
            .iter()
            .filter(|(key, _)| !registry.contains_key(*key))
            .map(|(_, target)| target.clone())
            .collect()
    };

    for target in missing {
        if let Some(hook) = &core.hooks.on_evaluator_will_start {
            hook(&target.project, &target.group);
        }
        let handle = worker::spawn(core.clone(), &target);
        debug!(
            worker = %registry_key(&target.project, &target.group),
            interval = ?target.interval,
            "started group worker"
        );
        core.registry
            .lock()
            .expect("worker registry lock poisoned")
            .insert(registry_key(&target.project, &target.group), handle);
        if let Some(hook) = &core.hooks.on_evaluator_started {
            hook(&target.project, &target.group);
        }
    }

    if let Some(hook) = &core.hooks.on_reconcile_complete {
        hook();
    }
    Ok(())
}

/// Enumerate every configured group, draining pagination cursors.
async fn discover(
    source: &dyn ConfigSource,
) -> Result<BTreeMap<String, GroupTarget>, SchedulerError> {
    let mut discovered = BTreeMap::new();

    let mut cursor: Option<String> = None;
    loop {
        let projects = source
            .list_projects(cursor.as_deref(), CONFIG_PAGE_LIMIT)
            .await?;

        for project in &projects.items {
            let mut group_cursor: Option<String> = None;
            loop {
                let groups = source
                    .list_alert_groups(&project.name, group_cursor.as_deref(), CONFIG_PAGE_LIMIT)
                    .await?;

                for group in &groups.items {
                    discovered.insert(
                        registry_key(&project.name, &group.name),
                        GroupTarget {
                            project: project.name.clone(),
                            group: group.name.clone(),
                            interval: group.effective_interval(),
                        },
                    );
                }

                group_cursor = groups.next_cursor;
                if group_cursor.is_none() {
                    break;
                }
            }
        }

        cursor = projects.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    Ok(discovered)
}

// ── Single-flight gate ──────────────────────────────────────────────

/// Collapses concurrent reconcile requests into one in-flight pass.
///
/// A mutex-guarded generation counter claims the pass; coalescing callers
/// watch for their target generation to complete and then read its outcome.
pub(crate) struct ReconcileGate {
    state: Mutex<GateState>,
    completed: watch::Sender<u64>,
}

struct GateState {
    next_generation: u64,
    inflight: Option<u64>,
    last: Option<(u64, Result<(), SchedulerError>)>,
}

impl ReconcileGate {
    pub(crate) fn new() -> Self {
        let (completed, _) = watch::channel(0);
        Self {
            state: Mutex::new(GateState {
                next_generation: 1,
                inflight: None,
                last: None,
            }),
            completed,
        }
    }

    /// Run `pass` unless one is already in flight; otherwise wait for the
    /// in-flight pass and return its outcome.
    pub(crate) async fn run<F, Fut>(&self, pass: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SchedulerError>>,
    {
        // Subscribe before claiming so a completion between the claim check
        // and the wait below is never missed.
        let mut rx = self.completed.subscribe();

        let claimed = {
            let mut state = self.state.lock().expect("reconcile gate lock poisoned");
            match state.inflight {
                Some(generation) => Err(generation),
                None => {
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    state.inflight = Some(generation);
                    Ok(generation)
                }
            }
        };

        match claimed {
            Ok(generation) => {
                let outcome = pass().await;
                {
                    let mut state = self.state.lock().expect("reconcile gate lock poisoned");
                    state.inflight = None;
                    state.last = Some((generation, outcome.clone()));
                }
                self.completed.send_replace(generation);
                outcome
            }
            Err(generation) => loop {
                {
                    let state = self.state.lock().expect("reconcile gate lock poisoned");
                    if let Some((done, outcome)) = &state.last {
                        if *done >= generation {
                            return outcome.clone();
                        }
                    }
                }
                if rx.changed().await.is_err() {
                    return Ok(());
                }
            },
        }
    }
}
