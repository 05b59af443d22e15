//! streamheal-engine configuration
//!
//! All tunables have built-in defaults; a TOML file only needs the keys it
//! overrides. Durations are milliseconds.
//!
//! ```toml
//! [stall]
//! confirm_ms = 1500
//!
//! [backoff]
//! base_ms = 2000
//! max_ms = 30000
//!
//! [logging]
//! level = "debug"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use streamheal_common::config::{load_toml_or_default, resolve_config_path, CONFIG_ENV_VAR};

use crate::error::{Error, Result};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HealerConfig {
    pub stall: StallConfig,
    pub backoff: BackoffConfig,
    pub lock: LockConfig,
    pub candidate: CandidateConfig,
    pub heal: HealConfig,
    pub logging: LoggingConfig,
}

/// Stall confirmation and healing timeouts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StallConfig {
    /// Base window without position advance before a stall is confirmed
    pub confirm_ms: u64,
    /// Added to the window while the buffer is not exhausted
    pub not_exhausted_extension_ms: u64,
    /// After an ad/trigger signal the extension is skipped for this long
    pub trigger_window_ms: u64,
    /// Healing without progress for this long falls back to Stalled
    pub heal_timeout_ms: u64,
    /// Failed heals before a never-progressing source is declared dead
    pub max_heal_failures: u32,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            confirm_ms: 1500,
            not_exhausted_extension_ms: 1500,
            trigger_window_ms: 10_000,
            heal_timeout_ms: 5000,
            max_heal_failures: 5,
        }
    }
}

/// "No heal point" backoff
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    /// Minimum spacing of info-level backoff log lines per source
    pub log_interval_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2000,
            max_ms: 30_000,
            log_interval_ms: 5000,
        }
    }
}

/// Recovery lock
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock held longer than this is force-reset by the next acquirer
    pub stale_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_timeout_ms: 10_000,
        }
    }
}

/// Candidate scoring, trust and switching
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    /// Progress older than this makes a candidate stale
    pub staleness_ms: u64,
    /// Continuous progress needed before a candidate is eligible
    pub min_progress_streak_ms: u64,
    /// Switch suppression window after a switch
    pub probation_window_ms: u64,
    /// Enable automatic failover to a trusted candidate; off means the
    /// selector only reports its preferred candidate
    pub failover: bool,
    /// Score margin the failover target must beat the active candidate by
    pub switch_margin: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            staleness_ms: 3500,
            min_progress_streak_ms: 500,
            probation_window_ms: 5000,
            failover: false,
            switch_margin: 1.0,
        }
    }
}

/// Heal pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    /// Wait before the single retry after an abort-class failure
    pub retry_delay_ms: u64,
    /// Signal messages longer than this are truncated before logging
    pub message_truncate_len: usize,
    /// Evaluation cycle period used by drivers (scenario replay)
    pub evaluation_interval_ms: u64,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 150,
            message_truncate_len: 200,
            evaluation_interval_ms: 250,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl HealerConfig {
    /// Resolve and load the config file (CLI path, then env var, then platform default)
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        let config: HealerConfig = load_toml_or_default(path.as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (validated)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HealerConfig = streamheal_common::config::parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backoff.base_ms == 0 {
            return Err(Error::Config("backoff.base_ms must be > 0".to_string()));
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(Error::Config(format!(
                "backoff.max_ms ({}) must be >= backoff.base_ms ({})",
                self.backoff.max_ms, self.backoff.base_ms
            )));
        }
        if self.candidate.probation_window_ms == 0 {
            return Err(Error::Config("candidate.probation_window_ms must be > 0".to_string()));
        }
        if self.lock.stale_timeout_ms == 0 {
            return Err(Error::Config("lock.stale_timeout_ms must be > 0".to_string()));
        }
        if self.heal.evaluation_interval_ms == 0 {
            return Err(Error::Config("heal.evaluation_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.heal.retry_delay_ms)
    }

    pub fn stale_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock.stale_timeout_ms)
    }
}
