//! Per-group rule evaluation.
//!
//! One [`Evaluator`] run is one tick for one alert group: every rule's query
//! is executed, the result rows are folded through the state machine, the
//! resulting status is persisted, and state changes are handed to the
//! [`TransitionSink`]. Rules are evaluated in declared order; a failing query
//! poisons only its own rule, never the siblings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use lantern_query::table::RowShapeError;
use lantern_query::{ColumnKind, Data, Queryable, Scalar, Table};

use crate::error::EvalError;
use crate::schema::{AlertGroup, NamedRuleSpec, Project, RuleSpec};
use crate::state::{advance, Contribution, Labels, RuleState, RuleStatus};
use crate::store::AlertStateStore;

/// Row limit for alert queries. Alerting reads one page; a rule matching more
/// series than this is folded over the first page only.
pub const ALERT_QUERY_LIMIT: u64 = 100;

/// A state change ready for delivery.
#[derive(Debug, Clone)]
pub struct TransitionEvent<'a> {
    pub project: &'a str,
    pub group: &'a str,
    pub rule_id: &'a str,
    pub rule: &'a RuleSpec,
    /// The rule's persisted status after this evaluation.
    pub status: &'a RuleStatus,
    pub from: RuleState,
    pub to: RuleState,
    /// Labels of the row that triggered the change; `None` for the implicit
    /// all-clear of an empty result.
    pub labels: Option<&'a Labels>,
}

/// Receives state-change events. Delivery targets (notification channels,
/// UIs, event logs) are injected by the embedder.
///
/// The status has already been persisted when `deliver` is called; an error
/// aborts the remainder of the tick and the next transition retries.
#[async_trait]
pub trait TransitionSink: Send + Sync {
    async fn deliver(&self, event: TransitionEvent<'_>) -> anyhow::Result<()>;
}

/// A query result that cannot be interpreted as rule contributions.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("result is not tabular")]
    NotTabular,

    #[error("table declares no columns")]
    NoColumns,

    #[error("first column '{0}' is not boolean")]
    FirstColumnNotBool(String),

    #[error(transparent)]
    Row(#[from] RowShapeError),
}

/// Evaluates all rules of one group at a single instant.
pub struct Evaluator<'a> {
    queryable: &'a dyn Queryable,
    store: &'a dyn AlertStateStore,
    sink: &'a dyn TransitionSink,
    now: DateTime<Utc>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        queryable: &'a dyn Queryable,
        store: &'a dyn AlertStateStore,
        sink: &'a dyn TransitionSink,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            queryable,
            store,
            sink,
            now,
        }
    }

    /// Run one tick for the group, then purge statuses of rules that are no
    /// longer configured.
    pub async fn evaluate(&self, project: &Project, group: &AlertGroup) -> Result<(), EvalError> {
        for rule in &group.rules {
            self.evaluate_rule(project, group, rule).await?;
        }

        let keep: Vec<String> = group.rules.iter().map(|r| r.id.clone()).collect();
        self.store
            .delete_state_not_in_list(&project.name, &group.name, &keep)
            .await?;
        Ok(())
    }

    async fn evaluate_rule(
        &self,
        project: &Project,
        group: &AlertGroup,
        rule: &NamedRuleSpec,
    ) -> Result<(), EvalError> {
        let mut status = self
            .store
            .get_or_create(&project.name, &group.name, &rule.id)
            .await?;
        status.last_evaluated_at = Some(self.now);

        let contributions = match self
            .queryable
            .query(&rule.spec.expr, None, ALERT_QUERY_LIMIT)
            .await
        {
            Err(e) => {
                debug!(
                    project = %project.name,
                    group = %group.name,
                    rule = %rule.id,
                    error = %e,
                    "rule query failed"
                );
                status.error = Some(e.to_string());
                self.store
                    .update_state(&project.name, &group.name, &rule.id, &status)
                    .await?;
                return Ok(());
            }
            Ok(response) => {
                status.last_evaluation_metrics = Some(response.metrics);
                match contributions(&response.data) {
                    Err(shape) => {
                        debug!(
                            project = %project.name,
                            group = %group.name,
                            rule = %rule.id,
                            error = %shape,
                            "rule result has unusable shape"
                        );
                        status.error = Some(shape.to_string());
                        self.store
                            .update_state(&project.name, &group.name, &rule.id, &status)
                            .await?;
                        return Ok(());
                    }
                    Ok(contributions) => {
                        status.error = None;
                        contributions
                    }
                }
            }
        };

        // Fold every row through the state machine. The last contribution
        // wins for the persisted state; each transition is delivered.
        let mut transitions = Vec::new();
        for contribution in &contributions {
            let (next, transition) = advance(&status, &rule.spec, self.now, contribution);
            status = next;
            if let Some(transition) = transition {
                transitions.push(transition);
            }
        }

        self.store
            .update_state(&project.name, &group.name, &rule.id, &status)
            .await?;

        for transition in transitions {
            debug!(
                project = %project.name,
                group = %group.name,
                rule = %rule.id,
                from = %transition.from,
                to = %transition.to,
                "rule transitioned"
            );
            let event = TransitionEvent {
                project: &project.name,
                group: &group.name,
                rule_id: &rule.id,
                rule: &rule.spec,
                status: &status,
                from: transition.from,
                to: transition.to,
                labels: transition.labels.as_ref(),
            };
            self.sink
                .deliver(event)
                .await
                .map_err(|e| EvalError::TransitionDelivery {
                    rule: rule.id.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

/// Interpret a query result as per-row contributions.
///
/// Column 0 must be boolean; the remaining columns become the row's labels.
/// An empty table contributes a single all-clear.
fn contributions(data: &Data) -> Result<Vec<Contribution>, ShapeError> {
    let table = data.as_table().ok_or(ShapeError::NotTabular)?;
    let first = table.columns.first().ok_or(ShapeError::NoColumns)?;
    if first.kind != ColumnKind::Bool {
        return Err(ShapeError::FirstColumnNotBool(first.name.clone()));
    }

    if table.rows.is_empty() {
        return Ok(vec![Contribution::clear(None)]);
    }

    let mut out = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        table.check_row(row)?;
        let firing = match row.first().and_then(Scalar::as_bool) {
            Some(b) => b,
            None => return Err(ShapeError::FirstColumnNotBool(first.name.clone())),
        };
        let labels = row_labels(table, row);
        out.push(Contribution { firing, labels });
    }
    Ok(out)
}

fn row_labels(table: &Table, row: &[Scalar]) -> Option<Labels> {
    if table.columns.len() <= 1 {
        return None;
    }
    Some(
        table
            .columns
            .iter()
            .skip(1)
            .zip(row.iter().skip(1))
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::error::StoreError;
    use crate::state::RuleState;
    use crate::store::MemoryStateStore;
    use indexmap::IndexMap;
    use lantern_query::{Column, Expr, QueryError, QueryMetrics, QueryResponse};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-07-18T17:08:41Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn rule(id: &str, pending_for: Option<Duration>) -> NamedRuleSpec {
        NamedRuleSpec {
            id: id.to_string(),
            spec: RuleSpec {
                name: format!("Rule {id}"),
                expr: Expr::new(format!("query:{id}")),
                pending_for,
                keep_firing_for: None,
                labels: IndexMap::new(),
                annotations: IndexMap::new(),
            },
        }
    }

    fn group(rules: Vec<NamedRuleSpec>) -> (Project, AlertGroup) {
        (
            Project::new("p1"),
            AlertGroup {
                name: "g1".to_string(),
                interval: None,
                rules,
            },
        )
    }

    fn bool_table(rows: Vec<Vec<Scalar>>) -> Data {
        Data::Table(Table {
            columns: vec![
                Column::new("firing", ColumnKind::Bool),
                Column::new("service", ColumnKind::Str),
            ],
            rows,
        })
    }

    /// Queryable answering from a fixed expr → result map.
    #[derive(Default)]
    struct FixtureQueryable {
        results: HashMap<String, Result<Data, String>>,
    }

    impl FixtureQueryable {
        fn with(mut self, expr: &str, result: Result<Data, String>) -> Self {
            self.results.insert(expr.to_string(), result);
            self
        }
    }

    #[async_trait]
    impl Queryable for FixtureQueryable {
        async fn query(
            &self,
            expr: &Expr,
            _cursor: Option<&str>,
            _limit: u64,
        ) -> Result<QueryResponse, QueryError> {
            match self.results.get(expr.as_str()) {
                Some(Ok(data)) => Ok(QueryResponse {
                    data: data.clone(),
                    next_cursor: None,
                    metrics: QueryMetrics {
                        rows_scanned: 10,
                        rows_returned: 1,
                        total_latency: Duration::from_millis(3),
                    },
                }),
                Some(Err(message)) => Err(QueryError::Execution(message.clone())),
                None => Err(QueryError::Parse(format!("unknown expr '{expr}'"))),
            }
        }
    }

    /// Sink recording every delivered event; optionally failing.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, RuleState, RuleState, Option<Labels>)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl TransitionSink for RecordingSink {
        async fn deliver(&self, event: TransitionEvent<'_>) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("delivery channel down");
            }
            self.events
                .lock()
                .expect("events lock poisoned")
                .push((
                    event.rule_id.to_string(),
                    event.from,
                    event.to,
                    event.labels.cloned(),
                ));
            Ok(())
        }
    }

    /// Store that can be told to reject updates.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStateStore,
        fail_updates: AtomicBool,
    }

    #[async_trait]
    impl AlertStateStore for FlakyStore {
        async fn get_or_create(
            &self,
            project: &str,
            group: &str,
            rule_id: &str,
        ) -> Result<RuleStatus, StoreError> {
            self.inner.get_or_create(project, group, rule_id).await
        }

        async fn update_state(
            &self,
            project: &str,
            group: &str,
            rule_id: &str,
            status: &RuleStatus,
        ) -> Result<(), StoreError> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(StoreError::Persist("disk full".to_string()));
            }
            self.inner.update_state(project, group, rule_id, status).await
        }

        async fn delete_state_not_in_list(
            &self,
            project: &str,
            group: &str,
            keep: &[String],
        ) -> Result<(), StoreError> {
            self.inner.delete_state_not_in_list(project, group, keep).await
        }
    }

    #[tokio::test]
    async fn empty_result_settles_rule_to_ok() {
        let queryable = FixtureQueryable::default().with("query:r1", Ok(bool_table(vec![])));
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        let status = store.get("p1", "g1", "r1").unwrap();
        assert_eq!(status.state, RuleState::Ok);
        assert_eq!(status.transitioned_at, Some(t0()));
        assert_eq!(status.last_evaluated_at, Some(t0()));
        assert!(status.error.is_none());
        assert!(status.last_evaluation_metrics.is_some());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, RuleState::Unknown);
        assert_eq!(events[0].2, RuleState::Ok);
        assert_eq!(events[0].3, None);
    }

    #[tokio::test]
    async fn true_row_fires_with_row_labels() {
        let queryable = FixtureQueryable::default().with(
            "query:r1",
            Ok(bool_table(vec![vec![Scalar::Bool(true), Scalar::from("api")]])),
        );
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        let status = store.get("p1", "g1", "r1").unwrap();
        assert_eq!(status.state, RuleState::Firing);
        assert_eq!(status.last_firing_at, Some(t0()));

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (_, from, to, labels) = &events[0];
        assert_eq!(*from, RuleState::Unknown);
        assert_eq!(*to, RuleState::Firing);
        assert_eq!(labels.as_ref().unwrap()["service"], Scalar::from("api"));
    }

    #[tokio::test]
    async fn query_failure_poisons_only_its_own_rule() {
        let queryable = FixtureQueryable::default()
            .with("query:bad", Err("shard offline".to_string()))
            .with("query:good", Ok(bool_table(vec![])));
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("bad", None), rule("good", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        let bad = store.get("p1", "g1", "bad").unwrap();
        assert_eq!(bad.state, RuleState::Unknown);
        assert!(bad.error.as_deref().unwrap().contains("shard offline"));
        assert_eq!(bad.last_evaluated_at, Some(t0()));

        let good = store.get("p1", "g1", "good").unwrap();
        assert_eq!(good.state, RuleState::Ok);
        assert!(good.error.is_none());
    }

    #[tokio::test]
    async fn error_clears_on_subsequent_success() {
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        let failing = FixtureQueryable::default().with("query:r1", Err("boom".to_string()));
        Evaluator::new(&failing, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();
        assert!(store.get("p1", "g1", "r1").unwrap().error.is_some());

        let healthy = FixtureQueryable::default().with("query:r1", Ok(bool_table(vec![])));
        Evaluator::new(&healthy, &store, &sink, t0() + chrono::Duration::seconds(60))
            .evaluate(&project, &group)
            .await
            .unwrap();
        let status = store.get("p1", "g1", "r1").unwrap();
        assert!(status.error.is_none());
        assert_eq!(status.state, RuleState::Ok);
    }

    #[tokio::test]
    async fn non_tabular_result_is_a_shape_error() {
        let queryable =
            FixtureQueryable::default().with("query:r1", Ok(Data::Scalar(Scalar::Int(3))));
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        let status = store.get("p1", "g1", "r1").unwrap();
        assert!(status.error.as_deref().unwrap().contains("not tabular"));
        assert_eq!(status.state, RuleState::Unknown);
    }

    #[tokio::test]
    async fn non_boolean_first_column_is_a_shape_error() {
        let data = Data::Table(Table {
            columns: vec![Column::new("count", ColumnKind::Int)],
            rows: vec![vec![Scalar::Int(5)]],
        });
        let queryable = FixtureQueryable::default().with("query:r1", Ok(data));
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        let status = store.get("p1", "g1", "r1").unwrap();
        assert!(status.error.as_deref().unwrap().contains("not boolean"));
    }

    #[tokio::test]
    async fn short_row_is_a_shape_error() {
        let data = Data::Table(Table {
            columns: vec![
                Column::new("firing", ColumnKind::Bool),
                Column::new("service", ColumnKind::Str),
            ],
            rows: vec![vec![Scalar::Bool(true)]],
        });
        let queryable = FixtureQueryable::default().with("query:r1", Ok(data));
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        assert!(store.get("p1", "g1", "r1").unwrap().error.is_some());
    }

    #[tokio::test]
    async fn rows_fold_in_order_and_last_contribution_wins() {
        // true then false: the rule fires, then immediately clears; both
        // transitions are delivered, the persisted state is the final one.
        let queryable = FixtureQueryable::default().with(
            "query:r1",
            Ok(bool_table(vec![
                vec![Scalar::Bool(true), Scalar::from("api")],
                vec![Scalar::Bool(false), Scalar::from("db")],
            ])),
        );
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        assert_eq!(store.get("p1", "g1", "r1").unwrap().state, RuleState::Ok);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].2, RuleState::Firing);
        assert_eq!(
            events[0].3.as_ref().unwrap()["service"],
            Scalar::from("api")
        );
        assert_eq!(events[1].2, RuleState::Ok);
        assert_eq!(events[1].3.as_ref().unwrap()["service"], Scalar::from("db"));
    }

    #[tokio::test]
    async fn stale_statuses_are_purged_after_the_tick() {
        let store = MemoryStateStore::new();
        store.get_or_create("p1", "g1", "removed").await.unwrap();

        let queryable = FixtureQueryable::default().with("query:r1", Ok(bool_table(vec![])));
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();

        assert_eq!(store.rule_ids("p1", "g1"), vec!["r1"]);
    }

    #[tokio::test]
    async fn persist_failure_aborts_the_tick() {
        let queryable = FixtureQueryable::default().with("query:r1", Ok(bool_table(vec![])));
        let store = FlakyStore::default();
        store.fail_updates.store(true, Ordering::SeqCst);
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        let err = Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::StatePersist(_)));
    }

    #[tokio::test]
    async fn sink_failure_surfaces_after_status_is_persisted() {
        let queryable = FixtureQueryable::default().with(
            "query:r1",
            Ok(bool_table(vec![vec![Scalar::Bool(true), Scalar::from("api")]])),
        );
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        sink.fail.store(true, Ordering::SeqCst);
        let (project, group) = group(vec![rule("r1", None)]);

        let err = Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::TransitionDelivery { .. }));

        // The state change itself was not lost.
        assert_eq!(
            store.get("p1", "g1", "r1").unwrap().state,
            RuleState::Firing
        );
    }

    #[tokio::test]
    async fn last_evaluated_at_advances_with_the_clock() {
        let queryable = FixtureQueryable::default().with("query:r1", Ok(bool_table(vec![])));
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", None)]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();
        let first = store.get("p1", "g1", "r1").unwrap().last_evaluated_at;

        let later = t0() + chrono::Duration::seconds(30);
        Evaluator::new(&queryable, &store, &sink, later)
            .evaluate(&project, &group)
            .await
            .unwrap();
        let second = store.get("p1", "g1", "r1").unwrap().last_evaluated_at;

        assert!(second > first);
    }

    #[tokio::test]
    async fn dwell_sequence_pending_then_firing() {
        let queryable = FixtureQueryable::default().with(
            "query:r1",
            Ok(bool_table(vec![vec![Scalar::Bool(true), Scalar::from("api")]])),
        );
        let store = MemoryStateStore::new();
        let sink = RecordingSink::default();
        let (project, group) = group(vec![rule("r1", Some(Duration::from_secs(2)))]);

        Evaluator::new(&queryable, &store, &sink, t0())
            .evaluate(&project, &group)
            .await
            .unwrap();
        assert_eq!(
            store.get("p1", "g1", "r1").unwrap().state,
            RuleState::Pending
        );

        Evaluator::new(&queryable, &store, &sink, t0() + chrono::Duration::seconds(2))
            .evaluate(&project, &group)
            .await
            .unwrap();
        assert_eq!(
            store.get("p1", "g1", "r1").unwrap().state,
            RuleState::Firing
        );
    }
}
