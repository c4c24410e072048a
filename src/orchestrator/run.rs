//! # Run-Level Orchestrator
//!
//! One aggregation run covers a sliding window of months (the run date plus
//! the last day of each prior month in the window, oldest first, so
//! late-arriving data is absorbed). Months are strictly sequential: a month
//! is fully awaited before the next begins.
//!
//! The run is wrapped by the serialization guard, so a second invocation while
//! one is active is a silent no-op. Trailing work — per-state MBT extraction,
//! the weekly AWC variant, and the artifacts chain (daily AWC rollup, cache
//! invalidation, completion notice and validation trigger) — is dispatched
//! fire-and-forget: run success does not depend on it, and its failures reach
//! the operational channel on their own.

use crate::backend::AggregationBackend;
use crate::config::AggregationConfig;
use crate::dispatch::JobDispatcher;
use crate::error::{AggregationError, Result};
use crate::executor::StageExecutor;
use crate::lock::{LockStore, RunGuard};
use crate::mapping::mapping_rows;
use crate::ops::OpsChannel;
use crate::orchestrator::MonthOrchestrator;
use crate::stage::{MonthlyStage, StageInvocation};
use crate::window::{first_of_month, monthly_window};
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct AggregationRunner {
    backend: Arc<dyn AggregationBackend>,
    ops: Arc<dyn OpsChannel>,
    executor: Arc<StageExecutor>,
    dispatcher: Arc<JobDispatcher>,
    guard: RunGuard,
    config: AggregationConfig,
}

impl AggregationRunner {
    pub fn new(
        backend: Arc<dyn AggregationBackend>,
        ops: Arc<dyn OpsChannel>,
        lock_store: Arc<dyn LockStore>,
        config: AggregationConfig,
    ) -> Self {
        let executor = Arc::new(StageExecutor::new(
            Arc::clone(&backend),
            Arc::clone(&ops),
            config.retry.clone(),
        ));
        let dispatcher = Arc::new(JobDispatcher::new(Arc::clone(&ops)));
        let guard = RunGuard::new(lock_store, &config.lock);
        Self {
            backend,
            ops,
            executor,
            dispatcher,
            guard,
            config,
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Daily scheduled entry point: today's date, configured window size.
    pub async fn run_scheduled(&self) -> Result<bool> {
        self.run(Utc::now().date_naive(), self.config.schedule.window_intervals)
            .await
    }

    /// Ad hoc entry point for manual re-runs with an explicit date and window.
    ///
    /// Returns whether this invocation actually ran; `false` means another run
    /// held the lock and this one was skipped.
    #[instrument(skip(self))]
    pub async fn run(&self, as_of: NaiveDate, intervals: u32) -> Result<bool> {
        if intervals == 0 {
            return Err(AggregationError::Configuration(
                "aggregation window must cover at least one month".into(),
            ));
        }
        // resolve schedule config before taking the lock so a bad weekday
        // fails fast instead of mid-run
        let weekly_day = self.config.schedule.weekly_day()?;

        self.guard
            .run_exclusive(|| self.run_locked(as_of, intervals, weekly_day))
            .await
            .map(|outcome| outcome.is_some())
    }

    async fn run_locked(
        &self,
        as_of: NaiveDate,
        intervals: u32,
        weekly_day: Weekday,
    ) -> Result<()> {
        self.backend
            .refresh_table_mapping(&mapping_rows(&self.config.dashboard_domain))
            .await?;

        if let Err(err) = self.backend.install_aggregation_functions().await {
            // likely a routine change in this repo; nothing downstream can run
            self.ops
                .alert(
                    "Unexpected error while installing aggregation functions",
                    json!({ "error": err.to_string() }),
                )
                .await;
            return Err(err);
        }

        if let Err(err) = self.backend.aggregate_locations().await {
            let message = match &err {
                AggregationError::Integrity { .. } => {
                    // concurrent location upload; rebuild the source table and
                    // re-run manually
                    "Error occurred while aggregating locations"
                }
                _ => "Unexpected error while aggregating locations",
            };
            self.ops.alert(message, json!({ "error": err.to_string() })).await;
            return Err(err);
        }

        let state_ids = self.backend.state_ids().await?;
        let months = monthly_window(as_of, intervals);
        info!(?months, states = state_ids.len(), "Starting aggregation run");

        let month_orchestrator =
            MonthOrchestrator::new(Arc::clone(&self.executor), Arc::clone(&self.dispatcher));
        for month in months {
            month_orchestrator.aggregate_month(month, &state_ids).await?;

            // MBT extraction trails off; the run does not wait for it
            let extract_month = first_of_month(month);
            for state_id in &state_ids {
                let backend = Arc::clone(&self.backend);
                let state_id = state_id.clone();
                self.dispatcher.fire_and_forget(
                    format!("create_mbt {state_id} {extract_month}"),
                    async move {
                        backend
                            .create_monthly_bulk_tables(&state_id, extract_month)
                            .await
                    },
                );
            }
        }

        if as_of.weekday() == weekly_day {
            let executor = Arc::clone(&self.executor);
            self.dispatcher.fire_and_forget(
                format!("agg_awc_weekly {as_of}"),
                async move {
                    executor
                        .execute(StageInvocation::global(MonthlyStage::AggAwcWeekly, as_of))
                        .await
                },
            );
        }

        // artifacts chain: daily AWC rollup, cache bust, completion notice and
        // validation trigger, in order, unawaited by the run
        let executor = Arc::clone(&self.executor);
        let backend = Arc::clone(&self.backend);
        let ops = Arc::clone(&self.ops);
        self.dispatcher.fire_and_forget(
            format!("aggregation_artifacts {as_of}"),
            async move {
                executor
                    .execute(StageInvocation::global(MonthlyStage::AggAwcDaily, as_of))
                    .await?;
                backend.invalidate_dashboard_cache().await?;
                ops.aggregation_completed(as_of).await;
                ops.schedule_data_validation(as_of).await;
                Ok(())
            },
        );

        Ok(())
    }

    /// Await any fire-and-forget work still in flight. Shutdown paths and
    /// tests call this; a run never waits on it itself.
    pub async fn drain_background(&self) {
        self.dispatcher.drain().await;
    }
}
