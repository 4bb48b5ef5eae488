use crate::domains::patrol::TrackerSettings;
use crate::domains::resilience::{BreakerConfig, RetryPolicy};
use crate::domains::sync::SyncSettings;
use crate::errors::{DomainResult, ServiceError, ServiceResult};
use crate::validation::{common, Validate, ValidationBuilder};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Every tunable of the core. Durations are whole seconds or milliseconds
/// as their names say.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_url: String,
    pub api_base_url: String,
    pub device_id: String,
    pub photo_dir: String,

    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    pub batch_size: u32,
    pub retry_cap: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout_secs: u64,
    pub connectivity_debounce_ms: u64,
    /// Zero disables the periodic pass.
    pub sync_interval_secs: u64,

    pub proximity_threshold_feet: f64,
    pub max_fix_age_secs: u64,
    pub breadcrumb_interval_secs: u64,

    pub retention_days: u32,
    pub retention_sweep_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://patrol.db?mode=rwc".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            device_id: "unknown-device".to_string(),
            photo_dir: "photos".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            batch_size: 50,
            retry_cap: 10,
            max_retries: 3,
            retry_base_delay_ms: 500,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_secs: 60,
            connectivity_debounce_ms: 3_000,
            sync_interval_secs: 300,
            proximity_threshold_feet: 100.0,
            max_fix_age_secs: 120,
            breadcrumb_interval_secs: 30,
            retention_days: 30,
            retention_sweep_interval_secs: 3_600,
        }
    }
}

impl CoreConfig {
    /// Defaults, overridden by `PATROL_*` variables from the environment or
    /// a `.env` file.
    pub fn from_env() -> ServiceResult<Self> {
        if let Err(e) = dotenv::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> ServiceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PATROL_DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = lookup("PATROL_API_BASE_URL") {
            config.api_base_url = v;
        }
        if let Some(v) = lookup("PATROL_DEVICE_ID") {
            config.device_id = v;
        }
        if let Some(v) = lookup("PATROL_PHOTO_DIR") {
            config.photo_dir = v;
        }

        override_parsed(&lookup, "PATROL_REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        override_parsed(&lookup, "PATROL_CONNECT_TIMEOUT_SECS", &mut config.connect_timeout_secs)?;
        override_parsed(&lookup, "PATROL_BATCH_SIZE", &mut config.batch_size)?;
        override_parsed(&lookup, "PATROL_RETRY_CAP", &mut config.retry_cap)?;
        override_parsed(&lookup, "PATROL_MAX_RETRIES", &mut config.max_retries)?;
        override_parsed(&lookup, "PATROL_RETRY_BASE_DELAY_MS", &mut config.retry_base_delay_ms)?;
        override_parsed(&lookup, "PATROL_BREAKER_FAILURE_THRESHOLD", &mut config.breaker_failure_threshold)?;
        override_parsed(&lookup, "PATROL_BREAKER_RESET_TIMEOUT_SECS", &mut config.breaker_reset_timeout_secs)?;
        override_parsed(&lookup, "PATROL_CONNECTIVITY_DEBOUNCE_MS", &mut config.connectivity_debounce_ms)?;
        override_parsed(&lookup, "PATROL_SYNC_INTERVAL_SECS", &mut config.sync_interval_secs)?;
        override_parsed(&lookup, "PATROL_PROXIMITY_THRESHOLD_FEET", &mut config.proximity_threshold_feet)?;
        override_parsed(&lookup, "PATROL_MAX_FIX_AGE_SECS", &mut config.max_fix_age_secs)?;
        override_parsed(&lookup, "PATROL_BREADCRUMB_INTERVAL_SECS", &mut config.breadcrumb_interval_secs)?;
        override_parsed(&lookup, "PATROL_RETENTION_DAYS", &mut config.retention_days)?;
        override_parsed(&lookup, "PATROL_RETENTION_SWEEP_INTERVAL_SECS", &mut config.retention_sweep_interval_secs)?;

        config
            .validate()
            .map_err(|e| ServiceError::Configuration(e.to_string()))?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 3_600)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms))
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            reset_timeout: Duration::from_secs(self.breaker_reset_timeout_secs),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            batch_size: self.batch_size,
            retry_cap: self.retry_cap,
            debounce: Duration::from_millis(self.connectivity_debounce_ms),
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            max_fix_age: Duration::from_secs(self.max_fix_age_secs),
            breadcrumb_interval: Duration::from_secs(self.breadcrumb_interval_secs),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> ServiceResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ServiceError::Configuration(format!("{} has an invalid value: {}", key, raw)))?;
    }
    Ok(())
}

impl Validate for CoreConfig {
    fn validate(&self) -> DomainResult<()> {
        ValidationBuilder::new("database_url", Some(self.database_url.clone()))
            .not_blank()
            .validate()?;
        ValidationBuilder::new("api_base_url", Some(self.api_base_url.clone()))
            .not_blank()
            .validate()?;
        common::validate_identifier("device_id", &self.device_id)?;
        ValidationBuilder::new("photo_dir", Some(self.photo_dir.clone()))
            .not_blank()
            .validate()?;
        ValidationBuilder::new("batch_size", Some(self.batch_size))
            .range(1, 1_000)
            .validate()?;
        ValidationBuilder::new("retry_cap", Some(self.retry_cap))
            .min(1)
            .validate()?;
        ValidationBuilder::new("max_retries", Some(self.max_retries))
            .range(0, 10)
            .validate()?;
        ValidationBuilder::new("breaker_failure_threshold", Some(self.breaker_failure_threshold))
            .min(1)
            .validate()?;
        ValidationBuilder::new("request_timeout_secs", Some(self.request_timeout_secs))
            .min(1)
            .validate()?;
        ValidationBuilder::new("proximity_threshold_feet", Some(self.proximity_threshold_feet))
            .range(1.0, 5_280.0)
            .validate()?;
        ValidationBuilder::new("breadcrumb_interval_secs", Some(self.breadcrumb_interval_secs))
            .min(1)
            .validate()?;
        ValidationBuilder::new("breaker_reset_timeout_secs", Some(self.breaker_reset_timeout_secs))
            .range(1, 86_400)
            .validate()?;
        ValidationBuilder::new("max_fix_age_secs", Some(self.max_fix_age_secs))
            .range(1, 86_400)
            .validate()?;
        ValidationBuilder::new("retention_days", Some(self.retention_days))
            .range(1, 3_650)
            .validate()?;
        ValidationBuilder::new("retention_sweep_interval_secs", Some(self.retention_sweep_interval_secs))
            .min(60)
            .validate()
    }
}
