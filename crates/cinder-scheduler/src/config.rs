//! Scheduler configuration.
//!
//! Values come from built-in defaults, an optional YAML file and
//! `CINDER_`-prefixed environment variables, in increasing precedence.
//! Nested keys use a double underscore, e.g. `CINDER_LEASE_TTL_SECS`.

use cinder_core::{Error, Result};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "CINDER";

/// Sweep once a minute, on the minute.
pub const DEFAULT_SCHEDULE: &str = "0 * * * * *";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cron expression (with seconds) driving the sweep.
    pub schedule: String,
    /// How long a sweep lease is held before another worker may take it over.
    pub lease_ttl_secs: u64,
    /// Pending jobs not picked up by a runner within this window are dropped.
    pub pending_timeout_secs: u64,
    /// Timeout for jobs whose config does not set one.
    pub default_job_timeout_secs: u64,
    /// Order runner candidates by the number of running jobs per project.
    pub fair_scheduling: bool,
    /// Maximum jobs in one pipeline. Zero disables the check.
    pub max_jobs_per_pipeline: usize,
    /// Maximum active jobs per project. Zero disables the check.
    pub max_active_jobs_per_project: u64,
    /// PostgreSQL URL. The in-memory store is used when absent.
    pub database_url: Option<String>,
    /// NATS URL, or comma-separated cluster URLs. The in-process bus is used
    /// when absent.
    pub nats_url: Option<String>,
    pub log_format: LogFormat,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_string(),
            lease_ttl_secs: 120,
            pending_timeout_secs: 24 * 60 * 60,
            default_job_timeout_secs: cinder_core::job::DEFAULT_TIMEOUT_SECS,
            fair_scheduling: true,
            max_jobs_per_pipeline: 500,
            max_active_jobs_per_project: 0,
            database_url: None,
            nats_url: None,
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl SchedulerConfig {
    /// Load configuration from an optional file and the environment.
    ///
    /// A `.env` file in the working directory is read first, if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SchedulerConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.cron_schedule()?;
        if self.lease_ttl_secs == 0 {
            return Err(Error::Configuration(
                "lease_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.default_job_timeout_secs == 0 {
            return Err(Error::Configuration(
                "default_job_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cron_schedule(&self) -> Result<Schedule> {
        Schedule::from_str(&self.schedule)
            .map_err(|e| Error::InvalidSchedule(format!("{}: {}", self.schedule, e)))
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_timeout_secs.min(i64::MAX as u64) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SchedulerConfig::default();
        config.validate().unwrap();
        assert!(config.fair_scheduling);
        assert_eq!(config.lease_ttl(), Duration::from_secs(120));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_schedule() {
        let config = SchedulerConfig {
            schedule: "every minute".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidSchedule(_))));
    }

    #[test]
    fn test_zero_lease_ttl_rejected() {
        let config = SchedulerConfig {
            lease_ttl_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SchedulerConfig =
            serde_yaml::from_str("schedule: \"*/30 * * * * *\"\nlog_format: json\n").unwrap();
        assert_eq!(config.schedule, "*/30 * * * * *");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.max_jobs_per_pipeline, 500);
        config.validate().unwrap();
    }
}
