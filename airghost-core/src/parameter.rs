//! Attack parameters

use crate::{AttackKind, Error, MacAddr, Result};
use std::collections::HashMap;
use tracing::warn;

/// Channel used when none is given
pub const DEFAULT_CHANNEL: &str = "1";

/// Minimum pre-shared key length accepted by WPA2-PSK
pub const MIN_PSK_LEN: usize = 8;

/// Longest SSID an 802.11 beacon can carry, in bytes
pub const MAX_SSID_LEN: usize = 32;

/// Parameters for launching an attack
///
/// A single value type serves every kind; which fields are required
/// depends on the kind and is checked by [`AttackParameters::validate_for`]
/// before any side effect happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackParameters {
    /// Wireless interface the attack runs on
    pub interface: Option<String>,
    /// Network name to advertise
    pub ssid: Option<String>,
    /// Radio channel
    pub channel: String,
    /// Enable WPA2-PSK on the rogue AP
    pub security: bool,
    /// Pre-shared key for a secured AP
    pub password: Option<String>,
    /// Target access point
    pub bssid: Option<MacAddr>,
    /// Restrict deauthentication to one client
    pub client: Option<MacAddr>,
    /// Deauthentication frames to send (0 = continuous)
    pub count: u32,
    /// Also flood the target BSSID with deauthentication frames
    pub deauth: bool,
    /// Monitor interface for a linked deauthentication flood
    pub deauth_interface: Option<String>,
    /// Captive portal page template
    pub template: Option<String>,
}

impl Default for AttackParameters {
    fn default() -> Self {
        Self {
            interface: None,
            ssid: None,
            channel: DEFAULT_CHANNEL.to_string(),
            security: false,
            password: None,
            bssid: None,
            client: None,
            count: 0,
            deauth: false,
            deauth_interface: None,
            template: None,
        }
    }
}

impl AttackParameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface<S: Into<String>>(mut self, interface: S) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_ssid<S: Into<String>>(mut self, ssid: S) -> Self {
        self.ssid = Some(ssid.into());
        self
    }

    pub fn with_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.channel = channel.into();
        self
    }

    /// Enable WPA2 with the given key
    pub fn with_security<S: Into<String>>(mut self, password: S) -> Self {
        self.security = true;
        self.password = Some(password.into());
        self
    }

    pub fn with_bssid(mut self, bssid: MacAddr) -> Self {
        self.bssid = Some(bssid);
        self
    }

    pub fn with_client(mut self, client: MacAddr) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_deauth(mut self, deauth: bool) -> Self {
        self.deauth = deauth;
        self
    }

    pub fn with_deauth_interface<S: Into<String>>(mut self, interface: S) -> Self {
        self.deauth_interface = Some(interface.into());
        self
    }

    pub fn with_template<S: Into<String>>(mut self, template: S) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Build parameters from `key=value` style pairs
    ///
    /// Unknown keys are ignored with a warning. Empty values are treated
    /// as absent.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::default();

        for (key, value) in pairs {
            let key = key.as_ref().trim().to_ascii_lowercase();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                "interface" | "iface" => params.interface = Some(value.to_string()),
                "ssid" => params.ssid = Some(value.to_string()),
                "channel" => params.channel = value.to_string(),
                "security" => params.security = parse_bool(&key, value)?,
                "password" | "psk" => params.password = Some(value.to_string()),
                "bssid" => params.bssid = Some(parse_mac(&key, value)?),
                "client" => params.client = Some(parse_mac(&key, value)?),
                "count" => {
                    params.count = value.parse().map_err(|_| {
                        Error::invalid_parameter(key.as_str(), "expected a frame count")
                    })?
                }
                "deauth" => params.deauth = parse_bool(&key, value)?,
                "deauth_interface" => params.deauth_interface = Some(value.to_string()),
                "template" => params.template = Some(value.to_string()),
                other => warn!(key = %other, "Ignoring unknown attack parameter"),
            }
        }

        Ok(params)
    }

    /// Parse `key=value` strings as given on the command line
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self> {
        let mut map = HashMap::new();
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (key, value) = assignment.split_once('=').ok_or_else(|| {
                Error::invalid_parameter(assignment, "expected KEY=VALUE")
            })?;
            map.insert(key.to_string(), value.to_string());
        }
        Self::from_pairs(map)
    }

    /// Interface name, or `MissingParameter`
    pub fn interface(&self) -> Result<&str> {
        non_empty(self.interface.as_deref()).ok_or_else(|| Error::missing("interface"))
    }

    /// SSID, or `MissingParameter`
    pub fn ssid(&self) -> Result<&str> {
        non_empty(self.ssid.as_deref()).ok_or_else(|| Error::missing("ssid"))
    }

    /// Target BSSID, or `MissingParameter`
    pub fn bssid(&self) -> Result<MacAddr> {
        self.bssid.ok_or_else(|| Error::missing("bssid"))
    }

    /// Key to configure, if security is requested and the key is long
    /// enough. Shorter keys yield `None`, which means an open network.
    pub fn psk(&self) -> Option<&str> {
        match self.password.as_deref() {
            Some(key) if self.security && key.chars().count() >= MIN_PSK_LEN => Some(key),
            _ => None,
        }
    }

    /// Interface for a deauthentication flood linked to an AP attack
    pub fn linked_deauth_interface(&self) -> Result<String> {
        match non_empty(self.deauth_interface.as_deref()) {
            Some(name) => Ok(name.to_string()),
            None => Ok(format!("{}mon", self.interface()?)),
        }
    }

    /// Check the fields `kind` needs before anything touches the system
    pub fn validate_for(&self, kind: AttackKind) -> Result<()> {
        check_token("interface", self.interface()?)?;

        match kind {
            AttackKind::EvilTwin | AttackKind::CaptivePortal => {
                let ssid = self.ssid()?;
                if ssid.len() > MAX_SSID_LEN {
                    return Err(Error::invalid_parameter(
                        "ssid",
                        format!("longer than {} bytes", MAX_SSID_LEN),
                    ));
                }
                check_line("ssid", ssid)?;
                if self.channel.is_empty() || !self.channel.chars().all(|c| c.is_ascii_digit())
                {
                    return Err(Error::invalid_parameter("channel", "expected a channel number"));
                }
                if let Some(password) = &self.password {
                    check_line("password", password)?;
                }
            }
            AttackKind::Deauth => {
                self.bssid()?;
            }
        }

        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::invalid_parameter(key, "expected a boolean")),
    }
}

fn parse_mac(key: &str, value: &str) -> Result<MacAddr> {
    value
        .parse()
        .map_err(|_| Error::invalid_parameter(key, format!("'{}' is not a MAC address", value)))
}

/// Values written into a line-oriented config must stay on one line
fn check_line(name: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c.is_control()) {
        return Err(Error::invalid_parameter(name, "contains control characters"));
    }
    Ok(())
}

fn check_token(name: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
        return Err(Error::invalid_parameter(name, "not a valid interface name"));
    }
    Ok(())
}
