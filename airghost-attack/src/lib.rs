//! Attack orchestration for AirGhost
//!
//! This crate drives the external daemons behind each attack and keeps
//! track of what is running. It includes:
//!
//! - `AttackOrchestrator`: Start/stop protocols for every attack kind
//! - `ProcessSupervisor`: One supervised daemon per attack kind
//! - `InterfaceStateMachine`: Wireless interface mode transitions
//! - `ConfigMaterializer`: hostapd and dnsmasq configuration files
//! - `Firewall`: Captive portal NAT redirects
//! - `CredentialRouter`: Delivery of captured credentials to a sink
//!
//! # Example
//!
//! ```no_run
//! use airghost_attack::AttackOrchestrator;
//! use airghost_core::{AttackKind, AttackParameters, Settings, SystemRunner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::default();
//!     let runner = Arc::new(SystemRunner::new(settings.command_timeout()));
//!     let orchestrator = AttackOrchestrator::new(settings, runner);
//!
//!     let params = AttackParameters::new()
//!         .with_interface("wlan0")
//!         .with_ssid("Free_WiFi")
//!         .with_channel("6");
//!     orchestrator.start(AttackKind::EvilTwin, params).await?;
//!
//!     orchestrator.stop_all().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod firewall;
pub mod interface;
pub mod orchestrator;
pub mod supervisor;

#[cfg(test)]
mod mock;

pub use config::{ConfigMaterializer, DaemonRole};
pub use credentials::{CredentialEvent, CredentialRouter, CredentialSink};
pub use firewall::Firewall;
pub use interface::{InterfaceRecord, InterfaceStateMachine, TransitionReport};
pub use orchestrator::{AttackInfo, AttackOrchestrator, AttackRecord};
pub use supervisor::{ProcessInfo, ProcessSupervisor};
