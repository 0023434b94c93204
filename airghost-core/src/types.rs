//! Common types used throughout AirGhost

use std::fmt;
use std::str::FromStr;

/// MAC Address (6 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(|c: char| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(crate::Error::invalid_parameter(
                "mac",
                format!("'{}' is not a MAC address", s),
            ));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(crate::Error::invalid_parameter(
                    "mac",
                    format!("'{}' has a malformed octet", s),
                ));
            }
            bytes[i] = u8::from_str_radix(part, 16).map_err(|_| {
                crate::Error::invalid_parameter("mac", format!("'{}' has a non-hex octet", s))
            })?;
        }

        Ok(MacAddr(bytes))
    }
}

/// Operating mode of a wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterfaceMode {
    /// Station (client) mode
    #[default]
    Managed,
    /// Raw frame capture and injection
    Monitor,
    /// Access point
    Ap,
}

impl InterfaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceMode::Managed => "managed",
            InterfaceMode::Monitor => "monitor",
            InterfaceMode::Ap => "ap",
        }
    }

    /// Parse the `type` value printed by `iw dev <if> info`
    pub fn from_iw_type(value: &str) -> Option<Self> {
        match value.trim() {
            "managed" => Some(InterfaceMode::Managed),
            "monitor" => Some(InterfaceMode::Monitor),
            "AP" | "ap" => Some(InterfaceMode::Ap),
            _ => None,
        }
    }
}

impl fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
