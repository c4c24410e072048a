//! # Aggregation Backend
//!
//! The seam between the orchestration core and the data layer. Each stage
//! body is an opaque, retryable, idempotent "compute and upsert" operation
//! against exactly one reporting table; the orchestrator depends only on its
//! completion, never on a return value.
//!
//! [`postgres::PgAggregationBackend`] is the production implementation; tests
//! substitute an in-memory recording backend.

pub mod postgres;

use crate::error::Result;
use crate::mapping::ResolvedTableMapping;
use crate::stage::{StageInvocation, StateId};
use async_trait::async_trait;
use chrono::NaiveDate;

pub use postgres::PgAggregationBackend;

#[async_trait]
pub trait AggregationBackend: Send + Sync + 'static {
    /// (Re)install the SQL routines the monthly rebuild protocol relies on.
    /// Run at the start of every run so routine changes roll out with the
    /// pipeline. A failure here is fatal for the whole run.
    async fn install_aggregation_functions(&self) -> Result<()>;

    /// Rebuild the location hierarchy aggregate. May fail with an integrity
    /// error while a location upload is in flight; that aborts the run.
    async fn aggregate_locations(&self) -> Result<()>;

    /// Distinct state identifiers the per-state stages fan out over.
    async fn state_ids(&self) -> Result<Vec<StateId>>;

    /// Idempotent upsert of the logical-type to physical-table mapping.
    async fn refresh_table_mapping(&self, rows: &[ResolvedTableMapping]) -> Result<()>;

    /// Execute one stage invocation: the transactional replace-this-month's
    /// data operation for its reporting table. Must be safe to re-run.
    async fn execute_stage(&self, invocation: &StageInvocation) -> Result<()>;

    /// Extract the per-state monthly bulk tables (MBT artifacts) for the
    /// month starting at `month`.
    async fn create_monthly_bulk_tables(&self, state_id: &StateId, month: NaiveDate)
        -> Result<()>;

    /// Drop cached dashboard reach data so readers repopulate from the fresh
    /// aggregates.
    async fn invalidate_dashboard_cache(&self) -> Result<()>;
}
