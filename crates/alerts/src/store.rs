//! Alert-state persistence contract and the in-memory reference store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::state::RuleStatus;

/// Persistence for per-rule statuses, namespaced by
/// (project-name, group-name, rule-id).
///
/// All three operations are total and idempotent under retry. Callers
/// serialize access per (project, group) — one evaluator owns a group at a
/// time — so implementations only need internal thread safety, not
/// transactional composition.
#[async_trait]
pub trait AlertStateStore: Send + Sync {
    /// Fetch the status for a rule, creating the initial
    /// ([`RuleStatus::default`]) record if none exists.
    async fn get_or_create(
        &self,
        project: &str,
        group: &str,
        rule_id: &str,
    ) -> Result<RuleStatus, StoreError>;

    /// Overwrite the status for a rule.
    async fn update_state(
        &self,
        project: &str,
        group: &str,
        rule_id: &str,
        status: &RuleStatus,
    ) -> Result<(), StoreError>;

    /// Remove every rule-id under (project, group) not present in `keep`.
    /// An empty `keep` removes all statuses for the group.
    async fn delete_state_not_in_list(
        &self,
        project: &str,
        group: &str,
        keep: &[String],
    ) -> Result<(), StoreError>;
}

type StatusKey = (String, String, String);

/// In-memory [`AlertStateStore`] for tests and embedders without a storage
/// engine.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<HashMap<StatusKey, RuleStatus>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a status without creating it. Test/introspection helper.
    pub fn get(&self, project: &str, group: &str, rule_id: &str) -> Option<RuleStatus> {
        self.inner
            .read()
            .expect("state store lock poisoned")
            .get(&key(project, group, rule_id))
            .cloned()
    }

    /// All rule-ids currently stored under (project, group), sorted.
    pub fn rule_ids(&self, project: &str, group: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .expect("state store lock poisoned")
            .keys()
            .filter(|(p, g, _)| p == project && g == group)
            .map(|(_, _, r)| r.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("state store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key(project: &str, group: &str, rule_id: &str) -> StatusKey {
    (project.to_string(), group.to_string(), rule_id.to_string())
}

#[async_trait]
impl AlertStateStore for MemoryStateStore {
    async fn get_or_create(
        &self,
        project: &str,
        group: &str,
        rule_id: &str,
    ) -> Result<RuleStatus, StoreError> {
        let mut map = self.inner.write().expect("state store lock poisoned");
        Ok(map
            .entry(key(project, group, rule_id))
            .or_default()
            .clone())
    }

    async fn update_state(
        &self,
        project: &str,
        group: &str,
        rule_id: &str,
        status: &RuleStatus,
    ) -> Result<(), StoreError> {
        let mut map = self.inner.write().expect("state store lock poisoned");
        map.insert(key(project, group, rule_id), status.clone());
        Ok(())
    }

    async fn delete_state_not_in_list(
        &self,
        project: &str,
        group: &str,
        keep: &[String],
    ) -> Result<(), StoreError> {
        let mut map = self.inner.write().expect("state store lock poisoned");
        map.retain(|(p, g, r), _| p != project || g != group || keep.contains(r));
        Ok(())
    }
}
