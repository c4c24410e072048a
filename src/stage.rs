//! # Aggregation Stages
//!
//! The closed registry of aggregation stages. Every unit of work the
//! orchestrator can dispatch is a variant of [`StateStage`] or
//! [`MonthlyStage`], carried with its typed parameters in a
//! [`StageInvocation`]. Dispatch matches these enums exhaustively, so an
//! unknown stage is unrepresentable rather than a runtime lookup failure.
//!
//! Stage names are stable identifiers used for logging, alert context and the
//! names of the SQL routines the Postgres backend invokes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one state partition of the location hierarchy. Per-state
/// stages write disjoint state-scoped rows of a shared table, which is what
/// makes the unordered fan-out safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Stages scoped to a single state. Each rebuilds that state's partition of
/// one form-aggregate table for the target month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateStage {
    GrowthMonitoringForms,
    DailyFeedingForms,
    ComplementaryFeedingForms,
    CcsComplementaryFeedingForms,
    ChildHealthThrForms,
    CcsRecordThrForms,
    ChildHealthPncForms,
    CcsRecordPncForms,
    DeliveryForms,
    BirthPreparednessForms,
    AwcInfrastructureForms,
    LsAwcManagementForms,
    LsVhndForms,
    BeneficiaryForms,
}

impl StateStage {
    /// The form stages dispatched in the first fan-out of every month.
    pub const FORM_STAGES: [StateStage; 11] = [
        StateStage::GrowthMonitoringForms,
        StateStage::DailyFeedingForms,
        StateStage::ComplementaryFeedingForms,
        StateStage::CcsComplementaryFeedingForms,
        StateStage::ChildHealthThrForms,
        StateStage::CcsRecordThrForms,
        StateStage::ChildHealthPncForms,
        StateStage::CcsRecordPncForms,
        StateStage::DeliveryForms,
        StateStage::BirthPreparednessForms,
        StateStage::AwcInfrastructureForms,
    ];

    /// The supervisor-level stages fanned out inside the AWC chain, between
    /// the AWC rollup and the LS rollup.
    pub const LS_STAGES: [StateStage; 3] = [
        StateStage::LsAwcManagementForms,
        StateStage::LsVhndForms,
        StateStage::BeneficiaryForms,
    ];

    pub const ALL: [StateStage; 14] = [
        StateStage::GrowthMonitoringForms,
        StateStage::DailyFeedingForms,
        StateStage::ComplementaryFeedingForms,
        StateStage::CcsComplementaryFeedingForms,
        StateStage::ChildHealthThrForms,
        StateStage::CcsRecordThrForms,
        StateStage::ChildHealthPncForms,
        StateStage::CcsRecordPncForms,
        StateStage::DeliveryForms,
        StateStage::BirthPreparednessForms,
        StateStage::AwcInfrastructureForms,
        StateStage::LsAwcManagementForms,
        StateStage::LsVhndForms,
        StateStage::BeneficiaryForms,
    ];

    /// Stable stage name, also the name of the backing SQL routine.
    pub fn name(self) -> &'static str {
        match self {
            StateStage::GrowthMonitoringForms => "aggregate_gm_forms",
            StateStage::DailyFeedingForms => "aggregate_df_forms",
            StateStage::ComplementaryFeedingForms => "aggregate_cf_forms",
            StateStage::CcsComplementaryFeedingForms => "aggregate_ccs_cf_forms",
            StateStage::ChildHealthThrForms => "aggregate_child_health_thr_forms",
            StateStage::CcsRecordThrForms => "aggregate_ccs_record_thr_forms",
            StateStage::ChildHealthPncForms => "aggregate_child_health_pnc_forms",
            StateStage::CcsRecordPncForms => "aggregate_ccs_record_pnc_forms",
            StateStage::DeliveryForms => "aggregate_delivery_forms",
            StateStage::BirthPreparednessForms => "aggregate_bp_forms",
            StateStage::AwcInfrastructureForms => "aggregate_awc_infra_forms",
            StateStage::LsAwcManagementForms => "agg_ls_awc_mgt_form",
            StateStage::LsVhndForms => "agg_ls_vhnd_form",
            StateStage::BeneficiaryForms => "agg_beneficiary_form",
        }
    }
}

/// Stages that rebuild a whole monthly table in one invocation, without a
/// state scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonthlyStage {
    UpdateMonthsTable,
    DailyAttendance,
    ChildHealthMonthly,
    AggChildHealth,
    CcsRecordMonthly,
    AggCcsRecord,
    AggAwc,
    AggLs,
    AggAwcWeekly,
    AggAwcDaily,
}

impl MonthlyStage {
    pub const ALL: [MonthlyStage; 10] = [
        MonthlyStage::UpdateMonthsTable,
        MonthlyStage::DailyAttendance,
        MonthlyStage::ChildHealthMonthly,
        MonthlyStage::AggChildHealth,
        MonthlyStage::CcsRecordMonthly,
        MonthlyStage::AggCcsRecord,
        MonthlyStage::AggAwc,
        MonthlyStage::AggLs,
        MonthlyStage::AggAwcWeekly,
        MonthlyStage::AggAwcDaily,
    ];

    /// Stable stage name, also the name of the backing SQL routine.
    pub fn name(self) -> &'static str {
        match self {
            MonthlyStage::UpdateMonthsTable => "update_months_table",
            MonthlyStage::DailyAttendance => "daily_attendance",
            MonthlyStage::ChildHealthMonthly => "child_health_monthly",
            MonthlyStage::AggChildHealth => "agg_child_health",
            MonthlyStage::CcsRecordMonthly => "ccs_record_monthly",
            MonthlyStage::AggCcsRecord => "agg_ccs_record",
            MonthlyStage::AggAwc => "agg_awc",
            MonthlyStage::AggLs => "agg_ls",
            MonthlyStage::AggAwcWeekly => "agg_awc_weekly",
            MonthlyStage::AggAwcDaily => "agg_awc_daily",
        }
    }
}

/// One schedulable unit of work: a stage plus its typed parameters.
///
/// An invocation is created when scheduled and is terminal on success or after
/// retry exhaustion; it carries no result value, downstream stages depend only
/// on its completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageInvocation {
    /// A state-scoped stage writing one state's partition of a shared table.
    PerState {
        stage: StateStage,
        state_id: StateId,
        month: NaiveDate,
    },
    /// A global stage rebuilding a whole monthly table.
    Global { stage: MonthlyStage, month: NaiveDate },
}

impl StageInvocation {
    pub fn per_state(stage: StateStage, state_id: StateId, month: NaiveDate) -> Self {
        Self::PerState {
            stage,
            state_id,
            month,
        }
    }

    pub fn global(stage: MonthlyStage, month: NaiveDate) -> Self {
        Self::Global { stage, month }
    }

    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::PerState { stage, .. } => stage.name(),
            Self::Global { stage, .. } => stage.name(),
        }
    }

    pub fn month(&self) -> NaiveDate {
        match self {
            Self::PerState { month, .. } | Self::Global { month, .. } => *month,
        }
    }

    pub fn state_id(&self) -> Option<&StateId> {
        match self {
            Self::PerState { state_id, .. } => Some(state_id),
            Self::Global { .. } => None,
        }
    }
}

impl fmt::Display for StageInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerState {
                stage,
                state_id,
                month,
            } => write!(f, "{} {} {}", stage.name(), state_id, month),
            Self::Global { stage, month } => write!(f, "{} {}", stage.name(), month),
        }
    }
}
