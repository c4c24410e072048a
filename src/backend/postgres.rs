//! # Postgres Backend
//!
//! Production implementation of [`AggregationBackend`] over the dashboard's
//! reporting database. Every monthly stage follows the same protocol: create
//! the month's physical child table (so the month can be rebuilt or dropped
//! in isolation), run the stage's SQL routine to populate it, and commit in
//! one transaction. Readers never observe a partially-written month; a failed
//! attempt leaves the previous state in place, which is what makes whole-stage
//! retries safe.
//!
//! The SQL routine bodies themselves are owned by the reporting schema and
//! treated as opaque here; this module only knows their names and argument
//! shapes, both derived from the closed stage registry.

use crate::backend::AggregationBackend;
use crate::error::{AggregationError, Result};
use crate::mapping::ResolvedTableMapping;
use crate::stage::{MonthlyStage, StageInvocation, StateId, StateStage};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::{debug, info, instrument};

/// Routine sources reinstalled at the start of every run, so changes to the
/// rebuild protocol roll out with the pipeline.
const AGGREGATION_FUNCTION_SOURCES: [&str; 3] = [
    include_str!("../../migrations/database_functions/update_months_table.sql"),
    include_str!("../../migrations/database_functions/create_new_table_for_month.sql"),
    include_str!("../../migrations/database_functions/create_new_agg_table_for_month.sql"),
];

/// Base tables extracted per state into monthly bulk tables.
const MBT_BASE_TABLES: [&str; 3] = ["child_health_monthly", "ccs_record_monthly", "agg_awc"];

const CHILD_HEALTH_STAGING_TABLE: &str = "child_health_monthly_staging";

/// A per-month table swap preceding a stage's populate routine.
struct TableSwap {
    create_routine: &'static str,
    table: &'static str,
}

impl TableSwap {
    fn plain(table: &'static str) -> Self {
        Self {
            create_routine: "create_new_table_for_month",
            table,
        }
    }

    fn aggregate(table: &'static str) -> Self {
        Self {
            create_routine: "create_new_aggregate_table_for_month",
            table,
        }
    }
}

pub struct PgAggregationBackend {
    pool: PgPool,
}

impl PgAggregationBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One transaction: optional per-month table swap, then the populate
    /// routine. Either the whole month commits or the previous state stays.
    async fn rebuild_month(
        &self,
        swap: Option<TableSwap>,
        routine: &'static str,
        month: NaiveDate,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(data_layer_error)?;
        if let Some(swap) = swap {
            sqlx::query(&format!("SELECT {}($1, $2)", swap.create_routine))
                .bind(swap.table)
                .bind(month)
                .execute(&mut *tx)
                .await
                .map_err(data_layer_error)?;
        }
        sqlx::query(&format!("SELECT {routine}($1)"))
            .bind(month)
            .execute(&mut *tx)
            .await
            .map_err(data_layer_error)?;
        tx.commit().await.map_err(data_layer_error)?;
        Ok(())
    }

    /// One state's partition of a shared form-aggregate table. Concurrent
    /// invocations for different states write disjoint state-scoped rows.
    async fn rebuild_state_partition(
        &self,
        stage: StateStage,
        state_id: &StateId,
        month: NaiveDate,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(data_layer_error)?;
        sqlx::query(&format!("SELECT {}($1, $2)", stage.name()))
            .bind(state_id.as_str())
            .bind(month)
            .execute(&mut *tx)
            .await
            .map_err(data_layer_error)?;
        tx.commit().await.map_err(data_layer_error)?;
        Ok(())
    }

    /// Child-health monthly rebuild. Pre-aggregation is staged into a
    /// temporary table by one writer per state before the transactional
    /// insert into the month's table; the staging table never outlives the
    /// stage.
    #[instrument(skip(self))]
    async fn child_health_monthly(&self, month: NaiveDate) -> Result<()> {
        info!("Creating child health staging table");
        self.drop_child_health_staging().await?;
        sqlx::query(&format!(
            "CREATE TABLE {CHILD_HEALTH_STAGING_TABLE} (LIKE child_health_monthly INCLUDING DEFAULTS)"
        ))
        .execute(&self.pool)
        .await
        .map_err(data_layer_error)?;

        let states = self.state_ids().await?;
        debug!(writers = states.len(), "Running pre-aggregation writers");
        let writers = states.into_iter().map(|state| {
            let pool = self.pool.clone();
            async move {
                sqlx::query("SELECT child_health_monthly_staging_fill($1, $2)")
                    .bind(state.0)
                    .bind(month)
                    .execute(&pool)
                    .await
                    .map(|_| ())
            }
        });
        for result in futures::future::join_all(writers).await {
            result.map_err(data_layer_error)?;
        }

        info!("Inserting into child_health_monthly");
        self.rebuild_month(
            Some(TableSwap::plain("child_health_monthly")),
            "child_health_monthly",
            month,
        )
        .await?;

        info!("Dropping child health staging table");
        self.drop_child_health_staging().await
    }

    async fn drop_child_health_staging(&self) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {CHILD_HEALTH_STAGING_TABLE}"))
            .execute(&self.pool)
            .await
            .map_err(data_layer_error)?;
        Ok(())
    }
}

#[async_trait]
impl AggregationBackend for PgAggregationBackend {
    async fn install_aggregation_functions(&self) -> Result<()> {
        info!("Starting aggregation function install");
        for source in AGGREGATION_FUNCTION_SOURCES {
            sqlx::query(source)
                .execute(&self.pool)
                .await
                .map_err(data_layer_error)?;
        }
        info!("Ended aggregation function install");
        Ok(())
    }

    async fn aggregate_locations(&self) -> Result<()> {
        info!("Starting location hierarchy aggregation");
        let mut tx = self.pool.begin().await.map_err(data_layer_error)?;
        sqlx::query("SELECT awc_location_aggregate()")
            .execute(&mut *tx)
            .await
            .map_err(location_error)?;
        tx.commit().await.map_err(location_error)?;
        info!("Ended location hierarchy aggregation");
        Ok(())
    }

    async fn state_ids(&self) -> Result<Vec<StateId>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT state_id FROM awc_location WHERE aggregation_level = 1")
                .fetch_all(&self.pool)
                .await
                .map_err(data_layer_error)?;
        Ok(ids.into_iter().map(StateId).collect())
    }

    async fn refresh_table_mapping(&self, rows: &[ResolvedTableMapping]) -> Result<()> {
        info!(rows = rows.len(), "Refreshing table name mapping");
        for row in rows {
            sqlx::query(
                "INSERT INTO ucr_table_name_mapping (table_type, table_name) \
                 VALUES ($1, $2) \
                 ON CONFLICT (table_type) DO UPDATE SET table_name = EXCLUDED.table_name",
            )
            .bind(&row.table_type)
            .bind(&row.table_name)
            .execute(&self.pool)
            .await
            .map_err(data_layer_error)?;
        }
        Ok(())
    }

    async fn execute_stage(&self, invocation: &StageInvocation) -> Result<()> {
        match invocation {
            StageInvocation::PerState {
                stage,
                state_id,
                month,
            } => self.rebuild_state_partition(*stage, state_id, *month).await,
            StageInvocation::Global { stage, month } => match stage {
                MonthlyStage::UpdateMonthsTable => {
                    self.rebuild_month(None, "update_months_table", *month).await
                }
                MonthlyStage::DailyAttendance => {
                    self.rebuild_month(None, "daily_attendance", *month).await
                }
                MonthlyStage::ChildHealthMonthly => self.child_health_monthly(*month).await,
                MonthlyStage::AggChildHealth => {
                    self.rebuild_month(
                        Some(TableSwap::aggregate("agg_child_health")),
                        "agg_child_health",
                        *month,
                    )
                    .await
                }
                MonthlyStage::CcsRecordMonthly => {
                    self.rebuild_month(
                        Some(TableSwap::plain("ccs_record_monthly")),
                        "ccs_record_monthly",
                        *month,
                    )
                    .await
                }
                MonthlyStage::AggCcsRecord => {
                    self.rebuild_month(
                        Some(TableSwap::aggregate("agg_ccs_record")),
                        "agg_ccs_record",
                        *month,
                    )
                    .await
                }
                MonthlyStage::AggAwc => {
                    self.rebuild_month(Some(TableSwap::aggregate("agg_awc")), "agg_awc", *month)
                        .await
                }
                MonthlyStage::AggLs => self.rebuild_month(None, "agg_ls", *month).await,
                MonthlyStage::AggAwcWeekly => {
                    self.rebuild_month(None, "agg_awc_weekly", *month).await
                }
                MonthlyStage::AggAwcDaily => {
                    self.rebuild_month(None, "agg_awc_daily", *month).await
                }
            },
        }
    }

    async fn create_monthly_bulk_tables(
        &self,
        state_id: &StateId,
        month: NaiveDate,
    ) -> Result<()> {
        for base_table in MBT_BASE_TABLES {
            debug!(base_table, state = %state_id, %month, "Extracting monthly bulk table");
            sqlx::query("SELECT create_mbt_for_month($1, $2, $3)")
                .bind(base_table)
                .bind(state_id.as_str())
                .bind(month)
                .execute(&self.pool)
                .await
                .map_err(data_layer_error)?;
        }
        Ok(())
    }

    async fn invalidate_dashboard_cache(&self) -> Result<()> {
        info!("Dropping cached dashboard reach data");
        sqlx::query("DELETE FROM dashboard_cache WHERE cache_key LIKE '%cas_reach_data%'")
            .execute(&self.pool)
            .await
            .map_err(data_layer_error)?;
        Ok(())
    }
}

fn data_layer_error(err: sqlx::Error) -> AggregationError {
    AggregationError::data_layer(err.to_string())
}

/// Location aggregation distinguishes integrity violations (SQLSTATE class
/// 23) from other data-layer failures; they require operator intervention
/// rather than a retry.
fn location_error(err: sqlx::Error) -> AggregationError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().is_some_and(|code| code.starts_with("23")) {
            return AggregationError::integrity(db_err.to_string());
        }
    }
    data_layer_error(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_state_stage_maps_to_a_callable_routine() {
        for stage in StateStage::ALL {
            let sql = format!("SELECT {}($1, $2)", stage.name());
            assert!(sql.chars().all(|c| c.is_ascii()));
            assert!(!stage.name().contains(char::is_whitespace));
        }
    }

    #[test]
    fn non_database_errors_stay_on_the_transient_channel() {
        let err = location_error(sqlx::Error::RowNotFound);
        assert!(err.is_transient());
    }
}
