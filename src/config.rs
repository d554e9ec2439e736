//! Healing configuration.
//!
//! Loaded from a TOML file, from the `app_settings` table, or built in code,
//! then overridden by `SELFHEAL_*` environment variables and validated.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::repos::settings;
use crate::db::DbPool;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Master switch. When off, `heal()` returns a failed result immediately.
    pub enabled: bool,
    /// Allow the second, exploratory locate strategy after `normal` fails.
    pub enable_deep_think: bool,
    /// Confidence (0–100) at or above which a healed location is applied without asking.
    pub auto_accept_threshold: u8,
    /// Fingerprints not updated within this window are removed by `cleanup()`.
    pub fingerprint_retention_days: u32,
    /// History cap; oldest entries are evicted first.
    pub max_history_entries: usize,
    pub locate_timeout_ms: u64,
    pub deep_think_timeout_ms: u64,
    pub describe_timeout_ms: u64,
    /// Displacement still considered "in place" by the distance score.
    pub distance_tolerance_px: f64,
    /// Displacement at which the distance score reaches zero.
    pub max_distance_px: f64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_deep_think: true,
            auto_accept_threshold: 85,
            fingerprint_retention_days: 30,
            max_history_entries: 1000,
            locate_timeout_ms: 30_000,
            deep_think_timeout_ms: 60_000,
            describe_timeout_ms: 15_000,
            distance_tolerance_px: 10.0,
            max_distance_px: 300.0,
        }
    }
}

impl HealingConfig {
    /// Parse from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let config: HealingConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: HealingConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded healing config");
        Ok(config)
    }

    /// Load the persisted config from the settings table, falling back to defaults
    /// when nothing has been saved yet.
    pub fn load_from_db(pool: &DbPool) -> Result<Self, AppError> {
        let config = settings::get_json::<HealingConfig>(pool, settings::HEALING_CONFIG_KEY)?
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_db(&self, pool: &DbPool) -> Result<(), AppError> {
        self.validate()?;
        settings::set_json(pool, settings::HEALING_CONFIG_KEY, self)
    }

    /// Override fields from `SELFHEAL_*` environment variables. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<bool>("SELFHEAL_ENABLED") {
            self.enabled = v;
        }
        if let Some(v) = env_parse::<bool>("SELFHEAL_ENABLE_DEEP_THINK") {
            self.enable_deep_think = v;
        }
        if let Some(v) = env_parse::<u8>("SELFHEAL_AUTO_ACCEPT_THRESHOLD") {
            self.auto_accept_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("SELFHEAL_RETENTION_DAYS") {
            self.fingerprint_retention_days = v;
        }
        if let Some(v) = env_parse::<usize>("SELFHEAL_MAX_HISTORY") {
            self.max_history_entries = v;
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.auto_accept_threshold > 100 {
            return Err(AppError::Validation(format!(
                "auto_accept_threshold must be within 0..=100, got {}",
                self.auto_accept_threshold
            )));
        }
        if self.max_history_entries == 0 {
            return Err(AppError::Validation(
                "max_history_entries must be at least 1".into(),
            ));
        }
        if self.locate_timeout_ms == 0
            || self.deep_think_timeout_ms == 0
            || self.describe_timeout_ms == 0
        {
            return Err(AppError::Validation("timeouts must be non-zero".into()));
        }
        if !(self.distance_tolerance_px.is_finite() && self.distance_tolerance_px > 0.0) {
            return Err(AppError::Validation(
                "distance_tolerance_px must be a positive number".into(),
            ));
        }
        if !(self.max_distance_px.is_finite() && self.max_distance_px > self.distance_tolerance_px)
        {
            return Err(AppError::Validation(
                "max_distance_px must exceed distance_tolerance_px".into(),
            ));
        }
        Ok(())
    }

    pub fn locate_timeout(&self) -> Duration {
        Duration::from_millis(self.locate_timeout_ms)
    }

    pub fn deep_think_timeout(&self) -> Duration {
        Duration::from_millis(self.deep_think_timeout_ms)
    }

    pub fn describe_timeout(&self) -> Duration {
        Duration::from_millis(self.describe_timeout_ms)
    }
}

pub(crate) fn retention_days_to_ms(days: u32) -> i64 {
    i64::from(days) * 24 * 60 * 60 * 1000
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
