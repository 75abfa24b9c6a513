//! Config - スケジューラ設定の読み込み
//!
//! 優先順位（後勝ち）:
//! 1. 構造体のデフォルト値（`#[serde(default)]`）
//! 2. `config/schedq.toml`（任意）
//! 3. 環境変数 `SCHEDQ__*`（例: `SCHEDQ__GRANULARITY_MS=500`,
//!    `SCHEDQ__BACKOFF__MAX_DELAY_MS=30000`）

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::id_generator::MAX_SHARD;
use crate::queue::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "config/schedq";
pub const ENV_PREFIX: &str = "SCHEDQ";

/// Millisecond settings are added to epoch-millis `i64` timestamps.
const MAX_DURATION_MS: u64 = i64::MAX as u64 / 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Backoff applied by the promoter loop after failed ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bucket width and promoter tick interval.
    pub granularity_ms: u64,

    /// How far ahead of now the future index holds tasks.
    pub horizon_ms: u64,

    /// Tolerated lateness of `execute_time` on submission.
    pub grace_ms: u64,

    /// Tasks due within this window of now skip the index.
    pub immediate_threshold_ms: u64,

    pub max_payload_bytes: usize,

    /// Snowflake shard, 10 bits.
    pub shard_id: u16,

    /// Promotion lease TTL; two granularities when unset.
    pub lease_ttl_ms: Option<u64>,

    pub backoff: BackoffConfig,

    /// Consecutive failed ticks before the promoter logs at `error`.
    pub failure_escalation_threshold: u32,

    /// Journal file for `FileTaskStore`; in-memory store when unset.
    pub store_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            granularity_ms: 1_000,
            horizon_ms: 300_000,
            grace_ms: 1_000,
            immediate_threshold_ms: 0,
            max_payload_bytes: 64 * 1024,
            shard_id: 0,
            lease_ttl_ms: None,
            backoff: BackoffConfig::default(),
            failure_escalation_threshold: 5,
            store_path: None,
        }
    }
}

impl SchedulerConfig {
    /// Load from `config/schedq.*` and `SCHEDQ__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Same as [`load`](Self::load) with a different base file name
    /// (extension optional, the file itself is optional).
    pub fn load_from(base: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(base).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.granularity_ms == 0 {
            return Err(ConfigError::Invalid("granularity_ms must be > 0".into()));
        }
        if self.horizon_ms < self.granularity_ms {
            return Err(ConfigError::Invalid(format!(
                "horizon_ms ({}) must be >= granularity_ms ({})",
                self.horizon_ms, self.granularity_ms
            )));
        }
        let durations = [
            ("horizon_ms", Some(self.horizon_ms)),
            ("grace_ms", Some(self.grace_ms)),
            ("immediate_threshold_ms", Some(self.immediate_threshold_ms)),
            ("lease_ttl_ms", self.lease_ttl_ms),
        ];
        for (name, value) in durations {
            if value.is_some_and(|ms| ms > MAX_DURATION_MS) {
                return Err(ConfigError::Invalid(format!(
                    "{name} is out of range (max {MAX_DURATION_MS})"
                )));
            }
        }
        if self.shard_id > MAX_SHARD {
            return Err(ConfigError::Invalid(format!(
                "shard_id {} exceeds {MAX_SHARD}",
                self.shard_id
            )));
        }
        if self.lease_ttl_ms == Some(0) {
            return Err(ConfigError::Invalid("lease_ttl_ms must be > 0".into()));
        }
        if !(self.backoff.multiplier >= 1.0 && self.backoff.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be a finite value >= 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ConfigError::Invalid(
                "backoff.max_delay_ms must be >= backoff.base_delay_ms".into(),
            ));
        }
        if self.failure_escalation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_escalation_threshold must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn granularity(&self) -> Duration {
        Duration::from_millis(self.granularity_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(
            self.lease_ttl_ms
                .unwrap_or_else(|| self.granularity_ms.saturating_mul(2)),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(
            Duration::from_millis(self.backoff.base_delay_ms),
            self.backoff.multiplier,
            Duration::from_millis(self.backoff.max_delay_ms),
        );
        if self.backoff.jitter {
            policy
        } else {
            policy.without_jitter()
        }
    }
}
