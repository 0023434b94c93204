//! NAT redirection for the captive portal
//!
//! Only two operations exist: append the portal redirects and flush the
//! whole NAT table. Individual rules are never deleted.

use airghost_core::{CommandRunner, CommandSpec, Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Ports redirected to the portal listener
pub const REDIRECTED_PORTS: [u16; 2] = [80, 443];

/// iptables front-end
pub struct Firewall {
    runner: Arc<dyn CommandRunner>,
}

impl Firewall {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Redirect web traffic arriving on `interface` to `portal_port`
    ///
    /// Both rules are attempted; the first failure is returned.
    pub async fn add_portal_redirects(&self, interface: &str, portal_port: u16) -> Result<()> {
        let mut result = Ok(());
        for port in REDIRECTED_PORTS {
            let cmd = redirect_rule(interface, port, portal_port);
            if let Err(e) = self.exec(&cmd).await {
                warn!(interface = %interface, port, error = %e, "Redirect rule failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if result.is_ok() {
            info!(interface = %interface, portal_port, "Portal redirects installed");
        }
        result
    }

    /// Remove every NAT rule
    pub async fn flush_nat(&self) -> Result<()> {
        self.exec(&CommandSpec::new("iptables").args(["-t", "nat", "-F"]))
            .await?;
        info!("NAT table flushed");
        Ok(())
    }

    async fn exec(&self, cmd: &CommandSpec) -> Result<()> {
        let output = self.runner.run(cmd).await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::process(format!(
                "'{}' exited with {:?}: {}",
                cmd,
                output.code,
                output.stderr.trim()
            )))
        }
    }
}

fn redirect_rule(interface: &str, port: u16, portal_port: u16) -> CommandSpec {
    let port = port.to_string();
    let portal_port = portal_port.to_string();
    CommandSpec::new("iptables").args([
        "-t",
        "nat",
        "-A",
        "PREROUTING",
        "-i",
        interface,
        "-p",
        "tcp",
        "--dport",
        port.as_str(),
        "-j",
        "REDIRECT",
        "--to-port",
        portal_port.as_str(),
    ])
}
