//! The per-group worker task.
//!
//! One worker owns one alert group: it waits on the injected trigger, runs
//! the evaluator, and repeats until its cancellation token fires. Lookup of
//! the project and group is fresh on every tick so configuration edits take
//! effect without restarting the worker; only an interval change needs a
//! restart (handled by the reconciler).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EvalError;
use crate::evaluator::Evaluator;

use super::reconcile::GroupTarget;
use super::{SchedulerCore, WorkerHandle};

pub(crate) fn spawn(core: Arc<SchedulerCore>, target: &GroupTarget) -> WorkerHandle {
    let cancel = core.run_token().child_token();
    let join = tokio::spawn(run_loop(
        core,
        cancel.clone(),
        target.project.clone(),
        target.group.clone(),
        target.interval,
    ));
    WorkerHandle {
        project: target.project.clone(),
        group: target.group.clone(),
        interval: target.interval,
        cancel,
        join,
    }
}

async fn run_loop(
    core: Arc<SchedulerCore>,
    cancel: CancellationToken,
    project: String,
    group: String,
    interval: Duration,
) {
    debug!(project = %project, group = %group, interval = ?interval, "group worker started");
    let mut error_count: u32 = 0;

    loop {
        let trigger = (core.group_trigger)(&project, &group, interval);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = trigger => {}
        }

        tokio::select! {
            // Cancellation during evaluation discards the partial tick; any
            // persistence either completed or did not happen.
            _ = cancel.cancelled() => break,
            outcome = evaluate_group(&core, &project, &group) => {
                match outcome {
                    Ok(()) => {
                        error_count = 0;
                    }
                    Err(e) => {
                        error_count += 1;
                        warn!(
                            project = %project,
                            group = %group,
                            error = %e,
                            failures = error_count,
                            "group evaluation failed"
                        );
                        if let Some(hook) = &core.hooks.on_evaluation_error {
                            hook(&project, &group, &e, error_count);
                        }
                    }
                }
                if let Some(hook) = &core.hooks.on_evaluation_complete {
                    hook(&project, &group);
                }
            }
        }
    }

    debug!(project = %project, group = %group, "group worker stopped");
}

async fn evaluate_group(
    core: &SchedulerCore,
    project_name: &str,
    group_name: &str,
) -> Result<(), EvalError> {
    // Fresh lookups each tick so user edits take effect on the next run.
    let project = core.source.get_project(project_name).await?;
    let group = core.source.get_alert_group(&project.name, group_name).await?;

    let now = (core.clock)();
    Evaluator::new(
        core.queryable.as_ref(),
        core.store.as_ref(),
        core.sink.as_ref(),
        now,
    )
    .evaluate(&project, &group)
    .await
}
