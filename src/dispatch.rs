//! # Job Dispatch
//!
//! Thin layer between the orchestrators and the worker pool. Jobs are
//! dispatched onto the async runtime and observed through [`JobHandle`]s; the
//! orchestrator parks on those handles rather than polling. Fan-out groups
//! join at a strict barrier: every member reaches a terminal state before any
//! downstream consumer proceeds, and one member's failure never cancels its
//! siblings.
//!
//! Fire-and-forget jobs (weekly AWC variant, artifacts chain, MBT extraction)
//! are tracked so their failures reach the operational channel and so a
//! shutdown path can drain them, but the orchestrator's own success never
//! depends on them.

use crate::error::{AggregationError, Result};
use crate::executor::StageExecutor;
use crate::ops::OpsChannel;
use crate::stage::StageInvocation;
use parking_lot::Mutex;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Handle to one dispatched job.
pub struct JobHandle {
    label: String,
    inner: JoinHandle<Result<()>>,
}

impl JobHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Block until the job reaches a terminal state.
    pub async fn join(self) -> Result<()> {
        match self.inner.await {
            Ok(result) => result,
            Err(join_err) => Err(AggregationError::JobPanicked(format!(
                "{}: {join_err}",
                self.label
            ))),
        }
    }
}

/// Result of a barrier join: how many members ran and which of them failed
/// permanently. The barrier itself always completes.
#[derive(Debug)]
pub struct BarrierOutcome {
    pub total: usize,
    pub failures: Vec<(String, AggregationError)>,
}

impl BarrierOutcome {
    pub fn succeeded(&self) -> usize {
        self.total - self.failures.len()
    }

    pub fn fully_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A set of same-shaped jobs joined at a strict all-or-wait barrier.
#[derive(Default)]
pub struct FanoutGroup {
    handles: Vec<JobHandle>,
}

impl FanoutGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: JobHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every member to reach a terminal state, then report. Member
    /// failures are isolated: they are collected, not propagated mid-barrier.
    pub async fn join_all(self) -> BarrierOutcome {
        let total = self.handles.len();
        let labels: Vec<String> = self.handles.iter().map(|h| h.label.clone()).collect();
        let results =
            futures::future::join_all(self.handles.into_iter().map(JobHandle::join)).await;

        let failures: Vec<(String, AggregationError)> = labels
            .into_iter()
            .zip(results)
            .filter_map(|(label, result)| result.err().map(|err| (label, err)))
            .collect();

        if failures.is_empty() {
            info!(members = total, "Fan-out group completed");
        } else {
            warn!(
                members = total,
                failed = failures.len(),
                "Fan-out group completed with permanent member failures"
            );
        }
        BarrierOutcome { total, failures }
    }
}

/// Dispatches jobs onto the worker pool and tracks the unawaited ones.
pub struct JobDispatcher {
    ops: Arc<dyn OpsChannel>,
    background: Mutex<Vec<JobHandle>>,
}

impl JobDispatcher {
    pub fn new(ops: Arc<dyn OpsChannel>) -> Self {
        Self {
            ops,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Dispatch an arbitrary unit of work and hand back its handle.
    pub fn spawn<F>(&self, label: impl Into<String>, job: F) -> JobHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        JobHandle {
            label: label.into(),
            inner: tokio::spawn(job),
        }
    }

    /// Dispatch one stage invocation through the retrying executor.
    pub fn spawn_stage(
        &self,
        executor: &Arc<StageExecutor>,
        invocation: StageInvocation,
    ) -> JobHandle {
        let label = invocation.to_string();
        let executor = Arc::clone(executor);
        self.spawn(label, async move { executor.execute(invocation).await })
    }

    /// Submit a job the orchestrator will not wait for. A failure is surfaced
    /// through the operational channel; [`JobDispatcher::drain`] awaits any
    /// still in flight.
    pub fn fire_and_forget<F>(&self, label: impl Into<String>, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let ops = Arc::clone(&self.ops);
        let job_label = label.clone();
        let inner = tokio::spawn(async move {
            // the job runs as its own task so a panic resolves here as a
            // JoinError instead of killing the supervising wrapper
            let outcome = match tokio::spawn(job).await {
                Ok(result) => result,
                Err(join_err) => Err(AggregationError::JobPanicked(format!(
                    "{job_label}: {join_err}"
                ))),
            };
            if let Err(err) = outcome {
                error!(job = %job_label, error = %err, "Background job failed");
                ops.alert(
                    &format!("Background job {job_label} failed"),
                    json!({ "job": job_label, "error": err.to_string() }),
                )
                .await;
            }
            Ok(())
        });
        self.background.lock().push(JobHandle { label, inner });
    }

    /// Await every tracked background job. Used by shutdown paths and tests;
    /// the orchestrator itself never calls this mid-run.
    pub async fn drain(&self) {
        loop {
            let handles = std::mem::take(&mut *self.background.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                // failures were already alerted inside the job wrapper
                let _ = handle.join().await;
            }
        }
    }
}
