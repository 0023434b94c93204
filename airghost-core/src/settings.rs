//! Runtime settings
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! (or no file at all) yields a working configuration.

use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do with processes that are already running when a later step
/// of an attack fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Leave earlier processes running and report the failure
    #[default]
    LeaveRunning,
    /// Stop everything the failed start brought up
    TearDown,
}

/// AirGhost settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory receiving generated daemon configuration
    pub config_dir: PathBuf,
    /// Gateway address assigned to AP interfaces, in CIDR notation
    pub gateway: String,
    pub dhcp_range_start: Ipv4Addr,
    pub dhcp_range_end: Ipv4Addr,
    pub dhcp_lease: String,
    /// Resolver for queries the captive DNS does not answer itself
    pub upstream_dns: Ipv4Addr,
    /// Local port the captive portal web server listens on
    pub portal_port: u16,
    pub ap_driver: String,
    pub hw_mode: String,
    /// Wait after launch before declaring a daemon alive
    pub grace_period_ms: u64,
    /// Wait after SIGTERM before escalating to SIGKILL
    pub stop_timeout_ms: u64,
    /// Upper bound for one-shot commands (ip, iw, iptables)
    pub command_timeout_ms: u64,
    pub rollback: RollbackPolicy,
    /// Run `airmon-ng check kill` before changing interface mode
    pub kill_conflicting: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/opt/airghost/config"),
            gateway: "192.168.1.1/24".to_string(),
            dhcp_range_start: Ipv4Addr::new(192, 168, 1, 2),
            dhcp_range_end: Ipv4Addr::new(192, 168, 1, 100),
            dhcp_lease: "12h".to_string(),
            upstream_dns: Ipv4Addr::new(8, 8, 8, 8),
            portal_port: 8080,
            ap_driver: "nl80211".to_string(),
            hw_mode: "g".to_string(),
            grace_period_ms: 2000,
            stop_timeout_ms: 5000,
            command_timeout_ms: 10_000,
            rollback: RollbackPolicy::LeaveRunning,
            kill_conflicting: true,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Settings(format!("failed to read {}: {}", path.display(), e))
        })?;

        let settings: Settings = toml::from_str(&content).map_err(|e| {
            Error::Settings(format!("failed to parse {}: {}", path.display(), e))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Settings(e.to_string()))
    }

    /// Check that derived values parse
    pub fn validate(&self) -> Result<()> {
        let gateway = self.gateway()?;
        for (name, addr) in [
            ("dhcp_range_start", self.dhcp_range_start),
            ("dhcp_range_end", self.dhcp_range_end),
        ] {
            if !gateway.contains(addr) {
                return Err(Error::Settings(format!(
                    "{} {} is outside gateway network {}",
                    name, addr, self.gateway
                )));
            }
        }
        if u32::from(self.dhcp_range_start) > u32::from(self.dhcp_range_end) {
            return Err(Error::Settings("dhcp range start is after its end".to_string()));
        }
        Ok(())
    }

    /// Gateway address and prefix
    pub fn gateway(&self) -> Result<Ipv4Network> {
        self.gateway
            .parse()
            .map_err(|e| Error::Settings(format!("invalid gateway '{}': {}", self.gateway, e)))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_lab_network() {
        let settings = Settings::default();
        let gateway = settings.gateway().unwrap();
        assert_eq!(gateway.ip(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(gateway.mask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(settings.grace_period(), Duration::from_secs(2));
        assert_eq!(settings.stop_timeout(), Duration::from_secs(5));
        assert_eq!(settings.rollback, RollbackPolicy::LeaveRunning);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "portal_port = 9090").unwrap();
        writeln!(file, "rollback = \"tear_down\"").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.portal_port, 9090);
        assert_eq!(settings.rollback, RollbackPolicy::TearDown);
        assert_eq!(settings.upstream_dns, Ipv4Addr::new(8, 8, 8, 8));
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = Settings::default();
        let parsed: Settings = toml::from_str(&settings.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_rejects_range_outside_gateway() {
        let settings = Settings {
            dhcp_range_end: Ipv4Addr::new(10, 0, 0, 9),
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Settings(_))));
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Settings::load("/nonexistent/airghost.toml").is_err());
        assert!(Settings::load_or_default(None).is_ok());
    }
}
