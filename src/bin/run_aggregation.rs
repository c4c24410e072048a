//! Drives one aggregation run from the command line.
//!
//! With no arguments this is the daily entry point (today's date, configured
//! window). For manual re-runs pass an explicit date and optionally an
//! interval count: `run_aggregation 2020-03-15 3`.

use anyhow::Context;
use chrono::NaiveDate;
use icds_aggregation::{
    AggregationConfig, AggregationRunner, InMemoryLockStore, LoggingOpsChannel,
    PgAggregationBackend,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    icds_aggregation::logging::init_structured_logging();

    let config = AggregationConfig::load()?;
    let default_intervals = config.schedule.window_intervals;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("failed to connect to the reporting database")?;

    let backend = Arc::new(PgAggregationBackend::new(pool));
    let ops = Arc::new(LoggingOpsChannel::new(config.team_alias.clone()));
    let lock_store = Arc::new(InMemoryLockStore::default());
    let runner = AggregationRunner::new(backend, ops, lock_store, config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let ran = match args.as_slice() {
        [] => runner.run_scheduled().await?,
        [date] => {
            let as_of: NaiveDate = date.parse().context("invalid as-of date")?;
            runner.run(as_of, default_intervals).await?
        }
        [date, intervals, ..] => {
            let as_of: NaiveDate = date.parse().context("invalid as-of date")?;
            let intervals: u32 = intervals.parse().context("invalid interval count")?;
            runner.run(as_of, intervals).await?
        }
    };

    if ran {
        runner.drain_background().await;
    } else {
        info!("Another aggregation run is already in progress, nothing to do");
    }
    Ok(())
}
