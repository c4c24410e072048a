//! Shared test doubles: an in-memory recording backend with failure
//! injection, and a recording operational channel.

#![allow(dead_code)] // not every helper is used by every test binary

use async_trait::async_trait;
use chrono::NaiveDate;
use icds_aggregation::{
    AggregationBackend, AggregationConfig, AggregationError, AggregationRunner,
    InMemoryLockStore, OpsChannel, ResolvedTableMapping, Result, StageInvocation, StateId,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub seq: u64,
    pub name: String,
    pub state: Option<String>,
    pub month: Option<NaiveDate>,
    pub kind: EventKind,
}

/// How a keyed operation should fail when the backend reaches it.
#[derive(Debug, Clone)]
enum FailurePlan {
    FailTimes(u32),
    AlwaysFail,
    Integrity,
}

#[derive(Default)]
struct Inner {
    seq: u64,
    events: Vec<RecordedEvent>,
    /// (stage name, state scope, month) -> version of the source data the
    /// table was last rebuilt from.
    tables: HashMap<(String, Option<String>, NaiveDate), u64>,
    failures: HashMap<String, FailurePlan>,
    mapping_rows: Vec<ResolvedTableMapping>,
    source_version: u64,
    stage_delay: Duration,
}

pub struct RecordingBackend {
    inner: Mutex<Inner>,
    state_ids: Vec<StateId>,
}

impl RecordingBackend {
    pub fn with_states(states: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                source_version: 1,
                ..Inner::default()
            }),
            state_ids: states.iter().map(|s| StateId::from(*s)).collect(),
        })
    }

    pub fn stage_key(name: &str, state: Option<&str>, month: NaiveDate) -> String {
        format!("{}:{}:{}", name, state.unwrap_or("-"), month)
    }

    pub fn fail_times(&self, key: impl Into<String>, times: u32) {
        self.inner
            .lock()
            .failures
            .insert(key.into(), FailurePlan::FailTimes(times));
    }

    pub fn always_fail(&self, key: impl Into<String>) {
        self.inner
            .lock()
            .failures
            .insert(key.into(), FailurePlan::AlwaysFail);
    }

    pub fn integrity_failure(&self, key: impl Into<String>) {
        self.inner
            .lock()
            .failures
            .insert(key.into(), FailurePlan::Integrity);
    }

    /// Delay applied inside every stage execution; used to hold a run open
    /// while a competing run tries to start.
    pub fn set_stage_delay(&self, delay: Duration) {
        self.inner.lock().stage_delay = delay;
    }

    pub fn set_source_version(&self, version: u64) {
        self.inner.lock().source_version = version;
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.inner.lock().events.clone()
    }

    pub fn tables(&self) -> HashMap<(String, Option<String>, NaiveDate), u64> {
        self.inner.lock().tables.clone()
    }

    pub fn mapping_rows(&self) -> Vec<ResolvedTableMapping> {
        self.inner.lock().mapping_rows.clone()
    }

    pub fn events_named(&self, name: &str) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.name == name).collect()
    }

    pub fn count(&self, name: &str, kind: EventKind) -> usize {
        self.events_named(name)
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn first_seq(&self, name: &str, kind: EventKind) -> Option<u64> {
        self.events_named(name)
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.seq)
    }

    pub fn last_seq(&self, name: &str, kind: EventKind) -> Option<u64> {
        self.events_named(name)
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .map(|e| e.seq)
    }

    fn record(
        &self,
        name: &str,
        state: Option<String>,
        month: Option<NaiveDate>,
        kind: EventKind,
    ) -> u64 {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        inner.events.push(RecordedEvent {
            seq,
            name: name.to_owned(),
            state,
            month,
            kind,
        });
        seq
    }

    fn take_failure(&self, key: &str) -> Option<AggregationError> {
        let mut inner = self.inner.lock();
        match inner.failures.get_mut(key) {
            Some(FailurePlan::FailTimes(remaining)) => {
                if *remaining == 0 {
                    None
                } else {
                    *remaining -= 1;
                    Some(AggregationError::data_layer(format!("injected: {key}")))
                }
            }
            Some(FailurePlan::AlwaysFail) => {
                Some(AggregationError::data_layer(format!("injected: {key}")))
            }
            Some(FailurePlan::Integrity) => {
                Some(AggregationError::integrity(format!("injected: {key}")))
            }
            None => None,
        }
    }

    async fn run_op(&self, name: &'static str) -> Result<()> {
        self.record(name, None, None, EventKind::Started);
        if let Some(err) = self.take_failure(name) {
            self.record(name, None, None, EventKind::Failed);
            return Err(err);
        }
        self.record(name, None, None, EventKind::Completed);
        Ok(())
    }
}

#[async_trait]
impl AggregationBackend for RecordingBackend {
    async fn install_aggregation_functions(&self) -> Result<()> {
        self.run_op("install_functions").await
    }

    async fn aggregate_locations(&self) -> Result<()> {
        self.run_op("aggregate_locations").await
    }

    async fn state_ids(&self) -> Result<Vec<StateId>> {
        Ok(self.state_ids.clone())
    }

    async fn refresh_table_mapping(&self, rows: &[ResolvedTableMapping]) -> Result<()> {
        self.inner.lock().mapping_rows = rows.to_vec();
        self.record("refresh_table_mapping", None, None, EventKind::Completed);
        Ok(())
    }

    async fn execute_stage(&self, invocation: &StageInvocation) -> Result<()> {
        let name = invocation.stage_name();
        let state = invocation.state_id().map(|s| s.as_str().to_owned());
        let month = invocation.month();
        let key = Self::stage_key(name, state.as_deref(), month);

        self.record(name, state.clone(), Some(month), EventKind::Started);

        let delay = self.inner.lock().stage_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.take_failure(&key) {
            self.record(name, state, Some(month), EventKind::Failed);
            return Err(err);
        }

        // the transactional rebuild: the month's table now reflects the
        // current source data, whatever it held before
        let mut inner = self.inner.lock();
        let version = inner.source_version;
        inner
            .tables
            .insert((name.to_owned(), state.clone(), month), version);
        drop(inner);

        self.record(name, state, Some(month), EventKind::Completed);
        Ok(())
    }

    async fn create_monthly_bulk_tables(
        &self,
        state_id: &StateId,
        month: NaiveDate,
    ) -> Result<()> {
        self.record(
            "create_mbt",
            Some(state_id.as_str().to_owned()),
            Some(month),
            EventKind::Completed,
        );
        Ok(())
    }

    async fn invalidate_dashboard_cache(&self) -> Result<()> {
        self.record("invalidate_cache", None, None, EventKind::Completed);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingOps {
    pub alerts: Mutex<Vec<(String, Value)>>,
    pub completions: Mutex<Vec<NaiveDate>>,
    pub validations: Mutex<Vec<NaiveDate>>,
}

impl RecordingOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn alert_messages(&self) -> Vec<String> {
        self.alerts.lock().iter().map(|(m, _)| m.clone()).collect()
    }
}

#[async_trait]
impl OpsChannel for RecordingOps {
    async fn alert(&self, message: &str, context: Value) {
        self.alerts.lock().push((message.to_owned(), context));
    }

    async fn aggregation_completed(&self, as_of: NaiveDate) {
        self.completions.lock().push(as_of);
    }

    async fn schedule_data_validation(&self, as_of: NaiveDate) {
        self.validations.lock().push(as_of);
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn test_runner(backend: Arc<RecordingBackend>, ops: Arc<RecordingOps>) -> AggregationRunner {
    AggregationRunner::new(
        backend,
        ops,
        Arc::new(InMemoryLockStore::default()),
        AggregationConfig::for_testing(),
    )
}
