//! User-authored alert configuration model.
//!
//! A [`Project`] namespaces [`AlertGroup`]s; a group bundles rules that are
//! evaluated together on one interval. Groups are authored as YAML documents
//! (see [`crate::loader`]) and deserialized into these types.

pub mod duration;

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use lantern_query::Expr;

/// Interval applied when a group declares none (or declares zero).
pub const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(60);

/// A named namespace owning alert groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A named bundle of rules evaluated together at one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub name: String,
    /// Evaluation interval; `None` (or zero) falls back to
    /// [`DEFAULT_GROUP_INTERVAL`].
    #[serde(default, with = "duration::opt", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub rules: Vec<NamedRuleSpec>,
}

impl AlertGroup {
    /// The interval this group actually runs on.
    pub fn effective_interval(&self) -> Duration {
        match self.interval {
            Some(d) if !d.is_zero() => d,
            _ => DEFAULT_GROUP_INTERVAL,
        }
    }

    /// Reject groups a scheduler cannot run: empty or duplicate rule ids.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if rule.id.is_empty() {
                return Err(format!(
                    "group '{}' contains a rule with an empty id",
                    self.name
                ));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(format!(
                    "group '{}' declares rule id '{}' more than once",
                    self.name, rule.id
                ));
            }
        }
        Ok(())
    }
}

/// A rule plus its group-unique identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRuleSpec {
    pub id: String,
    #[serde(flatten)]
    pub spec: RuleSpec,
}

/// The user-authored body of one alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Human label shown in UIs and notifications.
    pub name: String,
    /// The query whose first result column decides whether the rule fires.
    pub expr: Expr,
    /// How long the condition must hold before the rule transitions from
    /// Pending to Firing. Absent means fire immediately.
    #[serde(
        rename = "for",
        default,
        with = "duration::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub pending_for: Option<Duration>,
    /// Grace period during which the rule stays Firing after the condition
    /// clears.
    #[serde(default, with = "duration::opt", skip_serializing_if = "Option::is_none")]
    pub keep_firing_for: Option<Duration>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub labels: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, serde_json::Value>,
}

impl RuleSpec {
    /// `for` with zero normalized to unset: a zero dwell never holds a rule
    /// in Pending.
    pub fn pending_dwell(&self) -> Option<Duration> {
        self.pending_for.filter(|d| !d.is_zero())
    }

    /// `keep_firing_for` with zero normalized to unset.
    pub fn firing_grace(&self) -> Option<Duration> {
        self.keep_firing_for.filter(|d| !d.is_zero())
    }
}
