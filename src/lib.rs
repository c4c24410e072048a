//! # ICDS Aggregation Core
//!
//! Orchestration core for the ICDS dashboard's monthly aggregation pipeline:
//! recomputing large denormalized reporting tables from raw form and case
//! data across a sharded set of states, with staged parallelism, bounded
//! retries and idempotent replace-the-month table rebuilds.
//!
//! ## Architecture
//!
//! - **Stage registry** ([`stage`]): a closed enum of aggregation stages with
//!   typed parameters, so dispatch is exhaustive and an unknown stage cannot
//!   exist at runtime.
//! - **Stage executor** ([`executor`]): bounded retry with a fixed backoff
//!   around each stage invocation; transient data-layer failures are alerted
//!   and re-run, relying on the idempotent table-swap protocol.
//! - **Dispatch layer** ([`dispatch`]): fan-out groups joined at strict
//!   barriers, dependency chains, and tracked fire-and-forget jobs.
//! - **Orchestrators** ([`orchestrator`]): the per-month state machine and
//!   the run-level driver over the sliding month window, serialized by a
//!   distributed run lock ([`lock`]).
//! - **Backend seam** ([`backend`]): the data layer as an opaque collaborator;
//!   the Postgres implementation performs the per-month table swaps and
//!   invokes the aggregation routines by name.
//!
//! ## Concurrency model
//!
//! The orchestrator dispatches units of work to the runtime's worker pool and
//! blocks on their handles. Within a chain, strict sequencing; within a
//! fan-out group, no ordering but a total barrier at the group boundary;
//! across independent chains and groups, no ordering at all. Per-state
//! fan-out members write disjoint state-scoped partitions of a shared table,
//! which is the invariant that makes the unordered fan-out safe.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod lock;
pub mod logging;
pub mod mapping;
pub mod ops;
pub mod orchestrator;
pub mod stage;
pub mod window;

pub use backend::{AggregationBackend, PgAggregationBackend};
pub use config::{AggregationConfig, LockConfig, RetryConfig, ScheduleConfig};
pub use dispatch::{BarrierOutcome, FanoutGroup, JobDispatcher, JobHandle};
pub use error::{AggregationError, Result};
pub use executor::StageExecutor;
pub use lock::{InMemoryLockStore, LockStore, RunGuard};
pub use mapping::{mapping_rows, ResolvedTableMapping, TableMapping, TABLE_NAME_MAPPINGS};
pub use ops::{LoggingOpsChannel, OpsChannel};
pub use orchestrator::{AggregationRunner, MonthOrchestrator};
pub use stage::{MonthlyStage, StageInvocation, StateId, StateStage};
pub use window::{first_of_month, monthly_window};
