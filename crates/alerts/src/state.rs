//! Rule status and the pure state machine that advances it.
//!
//! [`advance`] consumes one evaluation contribution (one result row, or the
//! implicit all-clear of an empty result) and produces the next status plus
//! at most one [`Transition`]. It performs no I/O and never reads the wall
//! clock; callers pass `now` explicitly, which keeps the dwell arithmetic
//! deterministic under test.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use lantern_query::{QueryMetrics, Scalar};

use crate::schema::RuleSpec;

/// Label values extracted from a result row, keyed by column name.
pub type Labels = IndexMap<String, Scalar>;

/// The four observable states of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    /// Never evaluated since the status was created.
    Unknown,
    /// Condition not active.
    Ok,
    /// Condition active but the `for` dwell has not elapsed.
    Pending,
    /// Condition active past any required dwell.
    Firing,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleState::Unknown => "unknown",
            RuleState::Ok => "ok",
            RuleState::Pending => "pending",
            RuleState::Firing => "firing",
        };
        f.write_str(s)
    }
}

/// Runtime status of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub state: RuleState,
    /// When the state last changed.
    pub transitioned_at: Option<DateTime<Utc>>,
    /// When a row last tested true, independent of state.
    pub last_firing_at: Option<DateTime<Utc>>,
    /// When the last evaluation completed.
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Metrics from the last successful query, kept for UIs.
    pub last_evaluation_metrics: Option<QueryMetrics>,
    /// Last evaluation error; cleared on success.
    pub error: Option<String>,
}

impl Default for RuleStatus {
    fn default() -> Self {
        Self {
            state: RuleState::Unknown,
            transitioned_at: None,
            last_firing_at: None,
            last_evaluated_at: None,
            last_evaluation_metrics: None,
            error: None,
        }
    }
}

/// One row's verdict: the boolean in column 0 plus the remaining columns as
/// labels. An empty result contributes a single all-clear with no labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub firing: bool,
    pub labels: Option<Labels>,
}

impl Contribution {
    pub fn clear(labels: Option<Labels>) -> Self {
        Self {
            firing: false,
            labels,
        }
    }

    pub fn firing(labels: Option<Labels>) -> Self {
        Self {
            firing: true,
            labels,
        }
    }
}

/// A state change produced by [`advance`], carrying the labels of the
/// contribution that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: RuleState,
    pub to: RuleState,
    pub labels: Option<Labels>,
}

/// Advance one rule's status by one contribution.
///
/// Dwell semantics:
/// - a true row moves Unknown/Ok to Firing immediately when the rule has no
///   `for`, otherwise to Pending;
/// - Pending becomes Firing once `now - transitioned_at >= for`;
/// - a false row drops Firing back to Ok unless `keep_firing_for` still
///   covers the gap since the last true row.
///
/// Every true contribution stamps `last_firing_at = now`; every transition
/// stamps `transitioned_at = now`.
pub fn advance(
    status: &RuleStatus,
    spec: &RuleSpec,
    now: DateTime<Utc>,
    contribution: &Contribution,
) -> (RuleStatus, Option<Transition>) {
    let mut next = status.clone();
    if contribution.firing {
        next.last_firing_at = Some(now);
    }

    let target = match (status.state, contribution.firing) {
        (RuleState::Unknown, false) => Some(RuleState::Ok),
        (RuleState::Ok, false) => None,
        (RuleState::Pending, false) => Some(RuleState::Ok),
        (RuleState::Firing, false) => match spec.firing_grace() {
            None => Some(RuleState::Ok),
            Some(grace) => {
                let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
                let covered = status
                    .last_firing_at
                    .map(|last| now.signed_duration_since(last) < grace)
                    .unwrap_or(false);
                if covered {
                    None
                } else {
                    Some(RuleState::Ok)
                }
            }
        },
        (RuleState::Unknown | RuleState::Ok, true) => Some(match spec.pending_dwell() {
            None => RuleState::Firing,
            Some(_) => RuleState::Pending,
        }),
        (RuleState::Pending, true) => match spec.pending_dwell() {
            None => Some(RuleState::Firing),
            Some(dwell) => {
                let dwell = chrono::Duration::from_std(dwell).unwrap_or(chrono::Duration::zero());
                let dwelled = status
                    .transitioned_at
                    .map(|since| now.signed_duration_since(since) >= dwell)
                    .unwrap_or(true);
                if dwelled {
                    Some(RuleState::Firing)
                } else {
                    None
                }
            }
        },
        (RuleState::Firing, true) => None,
    };

    match target {
        Some(to) if to != status.state => {
            next.state = to;
            next.transitioned_at = Some(now);
            let transition = Transition {
                from: status.state,
                to,
                labels: contribution.labels.clone(),
            };
            (next, Some(transition))
        }
        _ => (next, None),
    }
}
