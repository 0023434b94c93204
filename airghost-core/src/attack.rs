//! Attack kinds and lifecycle states

use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Attack identity
///
/// At most one instance of each kind is active at any time, so the kind
/// doubles as the key of every per-attack registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttackKind {
    /// Rogue access point impersonating a network
    EvilTwin,
    /// Evil twin plus DHCP/DNS capture and HTTP redirection
    CaptivePortal,
    /// Deauthentication frame injection
    Deauth,
}

impl AttackKind {
    /// All kinds, in teardown order (dependents before the AP they use)
    pub const ALL: [AttackKind; 3] = [
        AttackKind::Deauth,
        AttackKind::CaptivePortal,
        AttackKind::EvilTwin,
    ];

    /// Stable identifier used in logs, config filenames and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackKind::EvilTwin => "evil_twin",
            AttackKind::CaptivePortal => "captive_portal",
            AttackKind::Deauth => "deauth",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            AttackKind::EvilTwin => "Evil Twin",
            AttackKind::CaptivePortal => "Captive Portal",
            AttackKind::Deauth => "Deauthentication",
        }
    }

    /// Kinds that run an access point on their interface and therefore
    /// own firewall rules and an interface reset on stop
    pub fn is_ap_family(&self) -> bool {
        matches!(self, AttackKind::EvilTwin | AttackKind::CaptivePortal)
    }

    /// Kinds whose daemon can finish its work; a clean exit is completion,
    /// not a crash
    pub fn runs_to_completion(&self) -> bool {
        matches!(self, AttackKind::Deauth)
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "evil_twin" | "eviltwin" => Ok(AttackKind::EvilTwin),
            "captive_portal" | "captiveportal" | "portal" => Ok(AttackKind::CaptivePortal),
            "deauth" | "deauthentication" => Ok(AttackKind::Deauth),
            _ => Err(Error::invalid_parameter("kind", format!("unknown attack '{}'", s))),
        }
    }
}

/// Lifecycle state of an attack record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttackState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl AttackState {
    /// Whether a new start may claim a record in this state
    pub fn is_startable(&self) -> bool {
        matches!(self, AttackState::Idle | AttackState::Failed)
    }
}

impl fmt::Display for AttackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttackState::Idle => "idle",
            AttackState::Starting => "starting",
            AttackState::Running => "running",
            AttackState::Stopping => "stopping",
            AttackState::Failed => "failed",
        };
        f.write_str(s)
    }
}
