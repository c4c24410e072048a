//! # Month Orchestrator
//!
//! Drives one month through the aggregation state machine. Within the month:
//!
//! 1. The per-state form fan-out and the global months-metadata stage start
//!    together and join at a strict barrier; the daily-attendance stage runs
//!    concurrently with them.
//! 2. The child-health chain (monthly table, then rollup) and the CCS-record
//!    chain run concurrently, each internally sequential.
//! 3. The AWC chain runs last: the AWC rollup, then the supervisor-level
//!    fan-out, then the LS rollup.
//!
//! A permanently-failed fan-out member does not abort the month: it was
//! already alerted and retried by the executor, its partition simply keeps its
//! previous contents until a re-run, and the barrier still accounts for it
//! before anything downstream starts. A failed chain link does abort the
//! month, because the next link consumes its committed table.

use crate::dispatch::{BarrierOutcome, FanoutGroup, JobDispatcher, JobHandle};
use crate::error::Result;
use crate::executor::StageExecutor;
use crate::stage::{MonthlyStage, StageInvocation, StateId, StateStage};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct MonthOrchestrator {
    executor: Arc<StageExecutor>,
    dispatcher: Arc<JobDispatcher>,
}

impl MonthOrchestrator {
    pub fn new(executor: Arc<StageExecutor>, dispatcher: Arc<JobDispatcher>) -> Self {
        Self {
            executor,
            dispatcher,
        }
    }

    #[instrument(skip(self, state_ids), fields(month = %month, states = state_ids.len()))]
    pub async fn aggregate_month(&self, month: NaiveDate, state_ids: &[StateId]) -> Result<()> {
        // independent of the form fan-out, runs concurrently with it
        let daily = self.dispatcher.spawn_stage(
            &self.executor,
            StageInvocation::global(MonthlyStage::DailyAttendance, month),
        );

        let mut forms = FanoutGroup::new();
        for stage in StateStage::FORM_STAGES {
            for state_id in state_ids {
                forms.push(self.dispatcher.spawn_stage(
                    &self.executor,
                    StageInvocation::per_state(stage, state_id.clone(), month),
                ));
            }
        }
        forms.push(self.dispatcher.spawn_stage(
            &self.executor,
            StageInvocation::global(MonthlyStage::UpdateMonthsTable, month),
        ));

        info!(members = forms.len(), "Dispatched form fan-out");
        let outcome = forms.join_all().await;
        self.log_partial_failures("form fan-out", &outcome);

        // two independent chains, concurrent with each other
        let child_chain = self.spawn_chain(
            "child-health-chain",
            month,
            [MonthlyStage::ChildHealthMonthly, MonthlyStage::AggChildHealth],
        );
        let ccs_chain = self.spawn_chain(
            "ccs-record-chain",
            month,
            [MonthlyStage::CcsRecordMonthly, MonthlyStage::AggCcsRecord],
        );

        daily.join().await?;
        ccs_chain.join().await?;
        child_chain.join().await?;

        self.awc_chain(month, state_ids.to_vec()).join().await
    }

    /// A two-link dependency chain: the second stage is dispatched only after
    /// the first one's commit is observed complete.
    fn spawn_chain(
        &self,
        label: &str,
        month: NaiveDate,
        stages: [MonthlyStage; 2],
    ) -> JobHandle {
        let executor = Arc::clone(&self.executor);
        self.dispatcher.spawn(label.to_owned(), async move {
            for stage in stages {
                executor
                    .execute(StageInvocation::global(stage, month))
                    .await?;
            }
            Ok(())
        })
    }

    /// The AWC chain whose middle link is itself a fan-out group: AWC rollup,
    /// then the supervisor-level per-state stages, then the LS rollup.
    fn awc_chain(&self, month: NaiveDate, state_ids: Vec<StateId>) -> JobHandle {
        let executor = Arc::clone(&self.executor);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.dispatcher.spawn("awc-chain".to_owned(), async move {
            executor
                .execute(StageInvocation::global(MonthlyStage::AggAwc, month))
                .await?;

            let mut supervisors = FanoutGroup::new();
            for stage in StateStage::LS_STAGES {
                for state_id in &state_ids {
                    supervisors.push(dispatcher.spawn_stage(
                        &executor,
                        StageInvocation::per_state(stage, state_id.clone(), month),
                    ));
                }
            }
            let outcome = supervisors.join_all().await;
            if !outcome.fully_succeeded() {
                warn!(
                    failed = outcome.failures.len(),
                    succeeded = outcome.succeeded(),
                    "Supervisor fan-out finished with failed members"
                );
            }

            executor
                .execute(StageInvocation::global(MonthlyStage::AggLs, month))
                .await
        })
    }

    fn log_partial_failures(&self, group: &str, outcome: &BarrierOutcome) {
        if !outcome.fully_succeeded() {
            warn!(
                group,
                failed = outcome.failures.len(),
                succeeded = outcome.succeeded(),
                "Fan-out finished with failed members; their partitions keep \
                 previous data until a re-run"
            );
        }
    }
}
