//! # Operational Channel
//!
//! The notification boundary. Failures inside the pipeline never block the
//! barrier or chain mechanics; operators learn about them through this channel
//! instead. The same channel carries the run-completion notice to the team
//! alias and schedules the downstream data-validation job.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::{error, info};

/// Alerting and notification sink for the aggregation pipeline.
#[async_trait]
pub trait OpsChannel: Send + Sync + 'static {
    /// Raise an operational alert with structured context. Alerts are
    /// fire-and-forget; delivery problems must not fail the pipeline.
    async fn alert(&self, message: &str, context: Value);

    /// Announce run completion to the team alias.
    async fn aggregation_completed(&self, as_of: NaiveDate);

    /// Schedule the downstream data-validation job for the run date.
    async fn schedule_data_validation(&self, as_of: NaiveDate);
}

/// Default channel that records alerts and notices in the structured log.
/// Deployments hook a mail or paging integration in behind the same trait.
#[derive(Debug, Clone)]
pub struct LoggingOpsChannel {
    team_alias: String,
}

impl LoggingOpsChannel {
    pub fn new(team_alias: impl Into<String>) -> Self {
        Self {
            team_alias: team_alias.into(),
        }
    }
}

#[async_trait]
impl OpsChannel for LoggingOpsChannel {
    async fn alert(&self, message: &str, context: Value) {
        error!(
            recipient = %self.team_alias,
            context = %context,
            "🚨 OPERATIONAL ALERT: {message}"
        );
    }

    async fn aggregation_completed(&self, as_of: NaiveDate) {
        info!(
            recipient = %self.team_alias,
            as_of = %as_of,
            "Aggregation has completed"
        );
    }

    async fn schedule_data_validation(&self, as_of: NaiveDate) {
        info!(as_of = %as_of, "Scheduled dashboard data validation");
    }
}
