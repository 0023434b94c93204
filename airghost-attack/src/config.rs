//! Daemon configuration rendering
//!
//! Each daemon role has one fixed file under the configuration directory.
//! Starting the same kind twice rewrites the same file, which is one more
//! reason only a single instance per kind may run.

use airghost_core::{AttackParameters, Error, Result, Settings};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Daemon whose configuration is generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonRole {
    /// hostapd serving the rogue AP
    AccessPoint,
    /// dnsmasq serving DHCP and captive DNS
    DhcpDns,
}

impl DaemonRole {
    /// Fixed filename of this role's configuration
    pub fn filename(&self) -> &'static str {
        match self {
            DaemonRole::AccessPoint => "hostapd_evil_twin.conf",
            DaemonRole::DhcpDns => "dnsmasq_captive.conf",
        }
    }
}

/// Renders and writes daemon configuration files
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    settings: Settings,
}

impl ConfigMaterializer {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Directory receiving generated files
    pub fn config_dir(&self) -> &Path {
        &self.settings.config_dir
    }

    /// Deterministic path for a role
    pub fn path_for(&self, role: DaemonRole) -> PathBuf {
        self.settings.config_dir.join(role.filename())
    }

    /// Render the configuration text for `role`
    pub fn render(&self, role: DaemonRole, params: &AttackParameters) -> Result<String> {
        match role {
            DaemonRole::AccessPoint => self.render_hostapd(params),
            DaemonRole::DhcpDns => self.render_dnsmasq(params),
        }
    }

    /// Render and write the configuration for `role`, returning its path
    pub fn materialize(&self, role: DaemonRole, params: &AttackParameters) -> Result<PathBuf> {
        let content = self.render(role, params)?;
        let path = self.path_for(role);
        write_file(&path, &content)?;
        debug!(role = ?role, path = %path.display(), "Wrote daemon configuration");
        Ok(path)
    }

    fn render_hostapd(&self, params: &AttackParameters) -> Result<String> {
        let interface = params.interface()?;
        let ssid = params.ssid()?;

        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = writeln!(out, "interface={}", interface);
        let _ = writeln!(out, "driver={}", self.settings.ap_driver);
        let _ = writeln!(out, "ssid={}", ssid);
        let _ = writeln!(out, "hw_mode={}", self.settings.hw_mode);
        let _ = writeln!(out, "channel={}", params.channel);
        out.push_str("macaddr_acl=0\n");
        out.push_str("ignore_broadcast_ssid=0\n");

        match params.psk() {
            Some(psk) => {
                out.push_str("auth_algs=1\n");
                out.push_str("wpa=2\n");
                let _ = writeln!(out, "wpa_passphrase={}", psk);
                out.push_str("wpa_key_mgmt=WPA-PSK\n");
                out.push_str("wpa_pairwise=TKIP\n");
                out.push_str("rsn_pairwise=CCMP\n");
            }
            None if params.security => {
                warn!(
                    ssid = %ssid,
                    "Pre-shared key shorter than 8 characters, AP will be open"
                );
            }
            None => {}
        }

        Ok(out)
    }

    fn render_dnsmasq(&self, params: &AttackParameters) -> Result<String> {
        let interface = params.interface()?;
        let gateway = self.settings.gateway()?;
        let gw = gateway.ip();

        let mut out = String::new();
        let _ = writeln!(out, "interface={}", interface);
        let _ = writeln!(
            out,
            "dhcp-range={},{},{},{}",
            self.settings.dhcp_range_start,
            self.settings.dhcp_range_end,
            gateway.mask(),
            self.settings.dhcp_lease
        );
        let _ = writeln!(out, "dhcp-option=3,{}", gw);
        let _ = writeln!(out, "dhcp-option=6,{}", gw);
        // Every name resolves to the portal
        let _ = writeln!(out, "address=/#/{}", gw);
        let _ = writeln!(out, "server={}", self.settings.upstream_dns);
        out.push_str("log-queries\n");
        out.push_str("log-dhcp\n");
        out.push_str("no-resolv\n");
        out.push_str("no-hosts\n");

        Ok(out)
    }
}

/// Write via a sibling temp file and rename, so a daemon never reads a
/// half-written config
fn write_file(path: &Path, content: &str) -> Result<()> {
    let wrap = |source| Error::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(wrap)?;
    }
    let tmp = path.with_extension("conf.tmp");
    fs::write(&tmp, content).map_err(wrap)?;
    fs::rename(&tmp, path).map_err(wrap)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn materializer(dir: &TempDir) -> ConfigMaterializer {
        ConfigMaterializer::new(Settings {
            config_dir: dir.path().to_path_buf(),
            ..Settings::default()
        })
    }

    fn ap_params() -> AttackParameters {
        AttackParameters::new()
            .with_interface("wlan0")
            .with_ssid("Free_WiFi")
            .with_channel("6")
    }

    #[test]
    fn test_open_hostapd_config() {
        let dir = TempDir::new().unwrap();
        let m = materializer(&dir);

        let path = m.materialize(DaemonRole::AccessPoint, &ap_params()).unwrap();
        assert_eq!(path, dir.path().join("hostapd_evil_twin.conf"));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "interface=wlan0\n\
             driver=nl80211\n\
             ssid=Free_WiFi\n\
             hw_mode=g\n\
             channel=6\n\
             macaddr_acl=0\n\
             ignore_broadcast_ssid=0\n"
        );
    }

    #[test]
    fn test_short_psk_falls_back_to_open() {
        let dir = TempDir::new().unwrap();
        let m = materializer(&dir);

        let params = ap_params().with_security("1234567");
        let path = m.materialize(DaemonRole::AccessPoint, &params).unwrap();
        let content = fs::read_to_string(path).unwrap();

        assert!(!content.contains("wpa"));
        assert!(!content.contains("1234567"));
    }

    #[test]
    fn test_wpa2_psk_config() {
        let dir = TempDir::new().unwrap();
        let m = materializer(&dir);

        let params = ap_params().with_security("correcthorse");
        let content = m.render(DaemonRole::AccessPoint, &params).unwrap();

        for line in [
            "auth_algs=1",
            "wpa=2",
            "wpa_passphrase=correcthorse",
            "wpa_key_mgmt=WPA-PSK",
            "rsn_pairwise=CCMP",
        ] {
            assert!(content.lines().any(|l| l == line), "missing {}", line);
        }
    }

    #[test]
    fn test_dnsmasq_redirects_everything_to_gateway() {
        let dir = TempDir::new().unwrap();
        let m = materializer(&dir);

        let path = m.materialize(DaemonRole::DhcpDns, &ap_params()).unwrap();
        assert_eq!(path, dir.path().join("dnsmasq_captive.conf"));

        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines.contains(&"interface=wlan0"));
        assert!(lines.contains(&"dhcp-range=192.168.1.2,192.168.1.100,255.255.255.0,12h"));
        assert!(lines.contains(&"dhcp-option=3,192.168.1.1"));
        assert!(lines.contains(&"address=/#/192.168.1.1"));
        assert!(lines.contains(&"server=8.8.8.8"));
        assert!(lines.contains(&"no-resolv"));
    }

    #[test]
    fn test_rewrite_replaces_previous_file() {
        let dir = TempDir::new().unwrap();
        let m = materializer(&dir);

        m.materialize(DaemonRole::AccessPoint, &ap_params()).unwrap();
        let path = m
            .materialize(DaemonRole::AccessPoint, &ap_params().with_ssid("Other"))
            .unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("ssid=Other\n"));
        assert!(!content.contains("Free_WiFi"));
        assert!(!dir.path().join("hostapd_evil_twin.conf.tmp").exists());
    }

    #[test]
    fn test_unwritable_dir_is_config_write_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let m = ConfigMaterializer::new(Settings {
            config_dir: blocker,
            ..Settings::default()
        });
        let result = m.materialize(DaemonRole::AccessPoint, &ap_params());
        assert!(matches!(result, Err(Error::ConfigWrite { .. })));
    }
}
