//! # Configuration
//!
//! Configuration for the aggregation runner: retry policy, run lock, schedule
//! window and the dashboard identifiers the backend and notification boundary
//! need. Values load from an optional `config/aggregation` file merged with
//! `ICDS_AGG_*` environment overrides on top of the defaults below.

use crate::error::{AggregationError, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Retry policy for one stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Fixed backoff between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            // 15 minutes between attempts
            retry_delay_ms: 15 * 60 * 1000,
        }
    }
}

/// Run-level serialization lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Logical name of the run; at most one holder at a time system-wide.
    pub key: String,
    /// Ceiling after which a holder is considered abandoned, in seconds.
    pub ttl_secs: u64,
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: "move-ucr-data-into-aggregate-tables".to_owned(),
            ttl_secs: 36 * 60 * 60,
        }
    }
}

/// Schedule shape of a run: how many months the sliding window covers and on
/// which weekday the extra weekly AWC stage fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Window size: the run date plus the last day of each of the prior
    /// `window_intervals - 1` months.
    pub window_intervals: u32,
    /// Weekday name gating the weekly AWC aggregation ("saturday", "mon", ...).
    pub weekly_day: String,
}

impl ScheduleConfig {
    pub fn weekly_day(&self) -> Result<Weekday> {
        Weekday::from_str(&self.weekly_day).map_err(|_| {
            AggregationError::Configuration(format!("unparsable weekday '{}'", self.weekly_day))
        })
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            window_intervals: 2,
            weekly_day: "saturday".to_owned(),
        }
    }
}

/// Top-level configuration for the aggregation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub retry: RetryConfig,
    pub lock: LockConfig,
    pub schedule: ScheduleConfig,
    /// Dashboard domain used to resolve data-source table names.
    pub dashboard_domain: String,
    /// Operational alias that receives alerts and the completion notice.
    pub team_alias: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lock: LockConfig::default(),
            schedule: ScheduleConfig::default(),
            dashboard_domain: "icds-cas".to_owned(),
            team_alias: "dashboard-aggregation-script@dimagi.com".to_owned(),
        }
    }
}

impl AggregationConfig {
    /// Load configuration from `config/aggregation.{toml,yaml,json}` (if
    /// present) and `ICDS_AGG_*` environment variables, over the defaults.
    pub fn load() -> Result<Self> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| AggregationError::Configuration(e.to_string()))?;
        config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name("config/aggregation").required(false))
            .add_source(config::Environment::with_prefix("ICDS_AGG").separator("__"))
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| AggregationError::Configuration(e.to_string()))
    }

    /// Configuration with short delays for tests.
    pub fn for_testing() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 2,
                retry_delay_ms: 0,
            },
            lock: LockConfig {
                key: "test-aggregation-run".to_owned(),
                ttl_secs: 60,
            },
            schedule: ScheduleConfig::default(),
            dashboard_domain: "icds-test".to_owned(),
            team_alias: "dashboard-aggregation-script@example.com".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_production_policy() {
        let config = AggregationConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.retry_delay(), Duration::from_secs(15 * 60));
        assert_eq!(config.lock.ttl(), Duration::from_secs(36 * 60 * 60));
        assert_eq!(config.schedule.window_intervals, 2);
        assert_eq!(config.schedule.weekly_day().unwrap(), Weekday::Sat);
    }

    #[test]
    fn weekday_abbreviations_parse() {
        let schedule = ScheduleConfig {
            window_intervals: 2,
            weekly_day: "tue".to_owned(),
        };
        assert_eq!(schedule.weekly_day().unwrap(), Weekday::Tue);
    }

    #[test]
    fn unparsable_weekday_is_a_configuration_error() {
        let schedule = ScheduleConfig {
            window_intervals: 2,
            weekly_day: "someday".to_owned(),
        };
        assert!(matches!(
            schedule.weekly_day(),
            Err(AggregationError::Configuration(_))
        ));
    }

    #[test]
    fn testing_profile_disables_the_backoff() {
        let config = AggregationConfig::for_testing();
        assert_eq!(config.retry.retry_delay(), Duration::ZERO);
        assert_eq!(config.retry.max_attempts, 2);
    }
}
