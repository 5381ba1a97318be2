//! Runtime configuration for the session manager and the watchdog.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, loadable from a JSON file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Idle timeout in hours. Overridden by the persisted `sessionTimeoutHours`.
    #[serde(default = "default_timeout_hours")]
    pub timeout_hours: f64,
    /// How long before expiry the warning is shown.
    #[serde(default = "default_warning_lead_mins")]
    pub warning_lead_mins: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_baseline_ms")]
    pub baseline_interval_ms: u64,
    #[serde(default = "default_accelerated_ms")]
    pub accelerated_interval_ms: u64,
    #[serde(default = "default_post_operation_ms")]
    pub post_operation_delay_ms: u64,
    #[serde(default = "default_post_operation_confirm_ms")]
    pub post_operation_confirm_ms: u64,
    #[serde(default = "default_insertion_ms")]
    pub insertion_delay_ms: u64,
    #[serde(default = "default_reclear_ms")]
    pub emergency_reclear_ms: u64,
    #[serde(default = "default_auto_emergency_ms")]
    pub auto_emergency_delay_ms: u64,
    /// Offsets from startup of the repair passes run after a logout.
    #[serde(default = "default_post_logout_passes")]
    pub post_logout_passes_ms: Vec<u64>,
}

fn default_timeout_hours() -> f64 { 3.0 }
fn default_warning_lead_mins() -> f64 { 30.0 }
fn default_baseline_ms() -> u64 { 3000 }
fn default_accelerated_ms() -> u64 { 500 }
fn default_post_operation_ms() -> u64 { 100 }
fn default_post_operation_confirm_ms() -> u64 { 1000 }
fn default_insertion_ms() -> u64 { 100 }
fn default_reclear_ms() -> u64 { 1000 }
fn default_auto_emergency_ms() -> u64 { 250 }
fn default_post_logout_passes() -> Vec<u64> { vec![100, 300, 800, 1500, 3000] }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_hours: default_timeout_hours(),
            warning_lead_mins: default_warning_lead_mins(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            baseline_interval_ms: default_baseline_ms(),
            accelerated_interval_ms: default_accelerated_ms(),
            post_operation_delay_ms: default_post_operation_ms(),
            post_operation_confirm_ms: default_post_operation_confirm_ms(),
            insertion_delay_ms: default_insertion_ms(),
            emergency_reclear_ms: default_reclear_ms(),
            auto_emergency_delay_ms: default_auto_emergency_ms(),
            post_logout_passes_ms: default_post_logout_passes(),
        }
    }
}

impl SessionConfig {
    /// Build a config from an explicit timeout, keeping the default warning lead.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout_hours: timeout.as_secs_f64() / 3600.0,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        hours(self.timeout_hours).unwrap_or_else(|| Duration::from_secs(3 * 3600))
    }

    pub fn warning_lead(&self) -> Duration {
        hours(self.warning_lead_mins / 60.0).unwrap_or(Duration::ZERO)
    }
}

impl WatchdogConfig {
    pub fn baseline_interval(&self) -> Duration {
        Duration::from_millis(self.baseline_interval_ms)
    }

    pub fn accelerated_interval(&self) -> Duration {
        Duration::from_millis(self.accelerated_interval_ms)
    }

    pub fn post_operation_delay(&self) -> Duration {
        Duration::from_millis(self.post_operation_delay_ms)
    }

    pub fn post_operation_confirm(&self) -> Duration {
        Duration::from_millis(self.post_operation_confirm_ms)
    }

    pub fn insertion_delay(&self) -> Duration {
        Duration::from_millis(self.insertion_delay_ms)
    }

    pub fn emergency_reclear(&self) -> Duration {
        Duration::from_millis(self.emergency_reclear_ms)
    }

    pub fn auto_emergency_delay(&self) -> Duration {
        Duration::from_millis(self.auto_emergency_delay_ms)
    }
}

impl WardenConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: WardenConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if hours(self.session.timeout_hours).is_none() {
            return Err(ConfigError::Invalid(format!(
                "session.timeout_hours must be a positive number, got {}",
                self.session.timeout_hours
            )));
        }
        let w = &self.watchdog;
        if w.baseline_interval_ms == 0 || w.accelerated_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "watchdog intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Convert a positive, finite number of hours into a whole-millisecond duration.
pub fn hours(value: f64) -> Option<Duration> {
    if value.is_finite() && value > 0.0 && value < 1e9 {
        Some(Duration::from_millis((value * 3_600_000.0).round() as u64))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = WardenConfig::default();
        assert_eq!(config.session.timeout(), Duration::from_secs(3 * 3600));
        assert_eq!(config.session.warning_lead(), Duration::from_secs(30 * 60));
        assert_eq!(config.watchdog.baseline_interval(), Duration::from_secs(3));
        assert_eq!(config.watchdog.accelerated_interval(), Duration::from_millis(500));
        assert_eq!(config.watchdog.post_logout_passes_ms.len(), 5);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"session": {{"timeout_hours": 1.5}}}}"#).unwrap();

        let config = WardenConfig::load(file.path()).unwrap();
        assert_eq!(config.session.timeout(), Duration::from_secs(5400));
        assert_eq!(config.watchdog.baseline_interval_ms, 3000);
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"session": {{"timeout_hours": 0}}}}"#).unwrap();

        assert!(matches!(
            WardenConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn hours_rejects_nan_and_negative() {
        assert!(hours(f64::NAN).is_none());
        assert!(hours(-1.0).is_none());
        assert_eq!(hours(0.5), Some(Duration::from_secs(1800)));
        let scaled = SessionConfig::with_timeout(Duration::from_millis(10));
        assert_eq!(scaled.timeout(), Duration::from_millis(10));
    }
}
