//! # Orchestration
//!
//! Two tiers drive one aggregation run:
//!
//! - [`MonthOrchestrator`] sequences one month through the staged state
//!   machine: form fan-out (barrier-joined, with the months-metadata stage and
//!   the daily-attendance stage alongside), the child-health and CCS-record
//!   chains, then the AWC chain with its embedded supervisor fan-out.
//! - [`AggregationRunner`] wraps that in the run-level concerns: the
//!   serialization guard, the sliding month window, bootstrap of SQL routines
//!   and locations, and the trailing fire-and-forget artifacts.
//!
//! The orchestrator deliberately blocks on its dispatched work (parked on
//! handles, not spinning) so the staged ordering stays observable and simple,
//! at the cost of occupying one worker slot for the duration of the run.

pub mod month;
pub mod run;

pub use month::MonthOrchestrator;
pub use run::AggregationRunner;
