//! Manager configuration
//!
//! Loaded from a TOML file (by convention `/etc/domctl.toml`); every field
//! has a sensible default so an empty file is valid.

use std::path::{Path, PathBuf};

use std::time::Duration;

use serde::Deserialize;

use crate::domain::PollPolicy;
use crate::Result;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/domctl.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Monitor firmware image installed onto each supervised core.
    pub monitor_image: PathBuf,

    /// Generic Timer frequency the monitors are seeded with, in Hz.
    pub timer_frequency_hz: u32,

    /// Where `dump_core` places core files when no explicit path is given.
    pub coredump_dir: PathBuf,

    /// Optional poll timing overrides; slow interconnects may need more.
    pub poll: Option<PollOverrides>,
}

/// `[poll]` table: all values in milliseconds, each one optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollOverrides {
    pub startup_timeout_ms: Option<u64>,
    pub startup_interval_ms: Option<u64>,
    pub payload_start_timeout_ms: Option<u64>,
    pub payload_start_interval_ms: Option<u64>,
}

impl PollOverrides {
    fn apply(timeout_ms: Option<u64>, interval_ms: Option<u64>, base: PollPolicy) -> PollPolicy {
        PollPolicy {
            timeout: timeout_ms.map_or(base.timeout, Duration::from_millis),
            interval: interval_ms.map_or(base.interval, Duration::from_millis),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            monitor_image: PathBuf::from("/lib/firmware/domctl-monitor.bin"),
            timer_frequency_hz: 100_000_000,
            coredump_dir: PathBuf::from("/var/lib/domctl"),
            poll: None,
        }
    }
}

impl ManagerConfig {
    /// Startup poll policy with any configured overrides applied.
    pub fn startup_policy(&self) -> PollPolicy {
        match &self.poll {
            Some(p) => PollOverrides::apply(
                p.startup_timeout_ms,
                p.startup_interval_ms,
                PollPolicy::STARTUP,
            ),
            None => PollPolicy::STARTUP,
        }
    }

    /// Payload-start poll policy with any configured overrides applied.
    pub fn payload_start_policy(&self) -> PollPolicy {
        match &self.poll {
            Some(p) => PollOverrides::apply(
                p.payload_start_timeout_ms,
                p.payload_start_interval_ms,
                PollPolicy::PAYLOAD_START,
            ),
            None => PollPolicy::PAYLOAD_START,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load the default config file, or fall back to defaults when it does
    /// not exist. Any other error still surfaces.
    pub fn load_default() -> Result<Self> {
        match std::fs::read_to_string(DEFAULT_CONFIG_PATH) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: ManagerConfig = toml::from_str("").unwrap();
        assert_eq!(config.timer_frequency_hz, 100_000_000);
        assert_eq!(
            config.monitor_image,
            PathBuf::from("/lib/firmware/domctl-monitor.bin")
        );
    }

    #[test]
    fn fields_override_defaults() {
        let config: ManagerConfig = toml::from_str(
            r#"
            monitor_image = "/opt/fw/monitor.bin"
            timer_frequency_hz = 50000000
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor_image, PathBuf::from("/opt/fw/monitor.bin"));
        assert_eq!(config.timer_frequency_hz, 50_000_000);
        assert_eq!(config.coredump_dir, PathBuf::from("/var/lib/domctl"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: std::result::Result<ManagerConfig, _> = toml::from_str("no_such_field = 1");
        assert!(result.is_err());
    }

    #[test]
    fn poll_overrides_are_partial() {
        let config: ManagerConfig = toml::from_str(
            r#"
            [poll]
            payload_start_timeout_ms = 5000
            "#,
        )
        .unwrap();

        let policy = config.payload_start_policy();
        assert_eq!(policy.timeout, Duration::from_millis(5000));
        assert_eq!(policy.interval, PollPolicy::PAYLOAD_START.interval);
        assert_eq!(config.startup_policy(), PollPolicy::STARTUP);
    }
}
