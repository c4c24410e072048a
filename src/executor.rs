//! # Stage Executor
//!
//! Bounded-retry execution of one stage invocation. The executor is the only
//! place retry policy lives: a transient data-layer failure is logged with
//! full context, alerted to the operational channel, and the whole invocation
//! is re-run after a fixed backoff. Re-running from scratch is safe because
//! every stage follows the idempotent table-swap protocol. Non-data-layer
//! errors are not retried here and propagate as fatal.

use crate::backend::AggregationBackend;
use crate::config::RetryConfig;
use crate::error::{AggregationError, Result};
use crate::ops::OpsChannel;
use crate::stage::StageInvocation;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument};

pub struct StageExecutor {
    backend: Arc<dyn AggregationBackend>,
    ops: Arc<dyn OpsChannel>,
    retry: RetryConfig,
}

impl StageExecutor {
    pub fn new(
        backend: Arc<dyn AggregationBackend>,
        ops: Arc<dyn OpsChannel>,
        retry: RetryConfig,
    ) -> Self {
        Self { backend, ops, retry }
    }

    /// Execute the invocation to a terminal state: success, fatal error, or
    /// retry exhaustion.
    #[instrument(
        skip(self),
        fields(stage = invocation.stage_name(), month = %invocation.month())
    )]
    pub async fn execute(&self, invocation: StageInvocation) -> Result<()> {
        let mut attempt = 1u32;
        loop {
            info!(attempt, invocation = %invocation, "Starting aggregation stage");
            match self.backend.execute_stage(&invocation).await {
                Ok(()) => {
                    info!(attempt, invocation = %invocation, "Ended aggregation stage");
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    error!(
                        attempt,
                        invocation = %invocation,
                        error = %err,
                        "Aggregation stage failed"
                    );
                    self.alert_failure(&invocation, &err).await;
                    if attempt >= self.retry.max_attempts {
                        return Err(AggregationError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    tokio::time::sleep(self.retry.retry_delay()).await;
                    attempt += 1;
                }
                // integrity, configuration and programming errors are fatal at
                // this tier
                Err(err) => return Err(err),
            }
        }
    }

    async fn alert_failure(&self, invocation: &StageInvocation, err: &AggregationError) {
        let delay = self.retry.retry_delay();
        self.ops
            .alert(
                &format!(
                    "{} aggregation failed for {}. This stage will be retried in {}s",
                    invocation.stage_name(),
                    invocation.month(),
                    delay.as_secs()
                ),
                json!({
                    "stage": invocation.stage_name(),
                    "month": invocation.month(),
                    "state_id": invocation.state_id().map(|s| s.as_str().to_owned()),
                    "error": err.to_string(),
                }),
            )
            .await;
    }
}
