//! # Error Types
//!
//! Structured error handling for the aggregation orchestration core.
//!
//! The taxonomy mirrors how failures are handled operationally:
//! - [`AggregationError::DataLayer`] is the transient channel: constraint
//!   violations, lock timeouts and connection loss raised by a stage body.
//!   These are alerted and retried by the stage executor.
//! - [`AggregationError::Integrity`] is raised by location aggregation when the
//!   location hierarchy is mid-edit. It is alerted and propagated without
//!   retry; recovery requires an operator rebuild and a manual re-run.
//! - Everything else is fatal at the tier where it occurs.

use thiserror::Error;

/// Errors surfaced by the aggregation orchestration core.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// Transient data-layer failure raised while a stage body was executing.
    /// Eligible for bounded retry; the table-swap protocol makes a full re-run
    /// of the stage safe.
    #[error("data layer error: {message}")]
    DataLayer { message: String },

    /// Integrity violation during location aggregation, usually a concurrent
    /// location upload. Not retried at this tier.
    #[error("integrity error: {message}")]
    Integrity { message: String },

    /// Invalid configuration (zero-month window, unparsable weekday, missing
    /// connection settings). Fails fast, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A dispatched job panicked or was cancelled before reaching a terminal
    /// state, so its outcome cannot be observed.
    #[error("job did not resolve: {0}")]
    JobPanicked(String),

    /// The bounded retry budget for a stage invocation was exhausted.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AggregationError>,
    },

    /// The shared lock store failed while acquiring or releasing the run lock.
    #[error("lock store error: {0}")]
    LockStore(String),
}

impl AggregationError {
    /// Build a transient data-layer error from any displayable cause.
    pub fn data_layer(message: impl Into<String>) -> Self {
        Self::DataLayer {
            message: message.into(),
        }
    }

    /// Build an integrity error from any displayable cause.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Whether the stage executor may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DataLayer { .. })
    }
}

pub type Result<T> = std::result::Result<T, AggregationError>;
