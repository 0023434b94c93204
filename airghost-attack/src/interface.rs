//! Wireless interface mode control
//!
//! Mode changes are sequences of `ip`/`iw` commands applied best-effort:
//! a failing step is logged and the remaining steps still run, because
//! driver commands are flaky and a partially applied change beats a hung
//! attack. Afterwards the mode is read back with `iw dev <if> info`; a
//! readable mismatch is reported as [`Error::InterfaceTransition`], an
//! unreadable mode counts as "commands issued".
//!
//! Transitions on the same interface are serialized, so two attacks never
//! reconfigure one radio at the same time.

use airghost_core::{CommandRunner, CommandSpec, Error, InterfaceMode, MacAddr, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ipnetwork::Ipv4Network;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tracked state of one wireless interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    /// Mode this interface was last put into (or observed in)
    pub mode: InterfaceMode,
    /// Last MAC read from the driver
    pub mac: Option<MacAddr>,
    pub last_transition: Option<DateTime<Utc>>,
}

impl InterfaceRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: InterfaceMode::Managed,
            mac: None,
            last_transition: None,
        }
    }
}

/// Outcome of a best-effort transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub interface: String,
    pub requested: InterfaceMode,
    /// Commands that failed (and were skipped over)
    pub failed_steps: Vec<String>,
    /// Driver-reported type after the transition, if readable
    pub observed: Option<String>,
    /// Nothing had to be done
    pub noop: bool,
}

impl TransitionReport {
    /// Mode was read back and matched
    pub fn verified(&self) -> bool {
        self.observed.is_some()
    }
}

/// Parsed `iw dev <if> info`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct IwInfo {
    type_name: Option<String>,
    mac: Option<MacAddr>,
}

impl IwInfo {
    fn parse(stdout: &str) -> Self {
        let mut info = IwInfo::default();
        for line in stdout.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix("type ") {
                info.type_name = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("addr ") {
                info.mac = value.trim().parse().ok();
            }
        }
        info
    }

    fn mode(&self) -> Option<InterfaceMode> {
        self.type_name.as_deref().and_then(InterfaceMode::from_iw_type)
    }
}

/// Driver type expected right after preparing for `mode`
///
/// AP preparation leaves the radio managed; the AP daemon switches it.
fn expected_type(mode: InterfaceMode) -> InterfaceMode {
    match mode {
        InterfaceMode::Ap => InterfaceMode::Managed,
        other => other,
    }
}

/// Tracks and transitions wireless interface modes
pub struct InterfaceStateMachine {
    runner: Arc<dyn CommandRunner>,
    kill_conflicting: bool,
    interfaces: DashMap<String, Arc<Mutex<InterfaceRecord>>>,
}

impl InterfaceStateMachine {
    pub fn new(runner: Arc<dyn CommandRunner>, kill_conflicting: bool) -> Self {
        Self {
            runner,
            kill_conflicting,
            interfaces: DashMap::new(),
        }
    }

    /// Put `name` into `mode`
    ///
    /// Sequence: kill radio-locking processes, link down, set type, link
    /// up. Preparing monitor mode on an interface the driver already
    /// reports as monitor is a no-op.
    pub async fn prepare(&self, name: &str, mode: InterfaceMode) -> Result<TransitionReport> {
        let slot = self.slot(name);
        let mut record = slot.lock().await;

        let before = self.read_info(name).await;
        if mode == InterfaceMode::Monitor && before.mode() == Some(InterfaceMode::Monitor) {
            debug!(interface = %name, "Interface already in monitor mode");
            record.mode = mode;
            record.mac = before.mac.or(record.mac);
            return Ok(TransitionReport {
                interface: name.to_string(),
                requested: mode,
                failed_steps: Vec::new(),
                observed: before.type_name,
                noop: true,
            });
        }

        let mut steps = Vec::with_capacity(4);
        if self.kill_conflicting {
            steps.push(CommandSpec::new("airmon-ng").args(["check", "kill"]));
        }
        steps.push(link(name, "down"));
        steps.push(match mode {
            InterfaceMode::Monitor => CommandSpec::new("iw").args([name, "set", "monitor", "none"]),
            InterfaceMode::Ap | InterfaceMode::Managed => set_managed(name),
        });
        steps.push(link(name, "up"));

        let report = self.apply(&mut record, mode, steps).await?;
        info!(interface = %name, mode = %mode, "Interface prepared");
        Ok(report)
    }

    /// Return `name` to managed mode: link down, managed type, link up
    pub async fn reset(&self, name: &str) -> Result<TransitionReport> {
        let slot = self.slot(name);
        let mut record = slot.lock().await;

        let steps = vec![link(name, "down"), set_managed(name), link(name, "up")];
        let report = self.apply(&mut record, InterfaceMode::Managed, steps).await?;
        info!(interface = %name, "Interface reset to managed mode");
        Ok(report)
    }

    /// Flush addresses on `name` and assign exactly `cidr`
    pub async fn assign_address(&self, name: &str, cidr: Ipv4Network) -> Result<()> {
        let slot = self.slot(name);
        let _record = slot.lock().await;

        let flush = CommandSpec::new("ip").args(["addr", "flush", "dev", name]);
        if let Some(failure) = self.step(&flush).await {
            warn!(interface = %name, error = %failure, "Address flush failed");
        }

        let address = cidr.to_string();
        let add = CommandSpec::new("ip").args(["addr", "add", address.as_str(), "dev", name]);
        match self.step(&add).await {
            None => {
                info!(interface = %name, address = %cidr, "Address assigned");
                Ok(())
            }
            Some(failure) => Err(Error::InterfaceTransition {
                interface: name.to_string(),
                reason: format!("could not assign {}: {}", cidr, failure),
            }),
        }
    }

    /// Change the MAC of `name` to `mac`, or a random one
    ///
    /// Link down, `macchanger`, link up, then the address is read back
    /// from the driver. An unreadable or mismatched address is an
    /// [`Error::InterfaceTransition`].
    pub async fn set_mac(&self, name: &str, mac: Option<MacAddr>) -> Result<MacAddr> {
        let slot = self.slot(name);
        let mut record = slot.lock().await;

        let change = match mac {
            Some(mac) => CommandSpec::new("macchanger")
                .arg("--mac")
                .arg(mac.to_string())
                .arg(name),
            None => CommandSpec::new("macchanger").args(["--random", name]),
        };
        for step in [link(name, "down"), change, link(name, "up")] {
            if let Some(failure) = self.step(&step).await {
                warn!(interface = %name, command = %step, error = %failure, "MAC change step failed");
            }
        }

        let current = self.read_info(name).await.mac;
        if current.is_some() {
            record.mac = current;
        }
        match (current, mac) {
            (None, _) => Err(Error::InterfaceTransition {
                interface: name.to_string(),
                reason: "MAC address not readable after change".to_string(),
            }),
            (Some(current), Some(wanted)) if current != wanted => Err(Error::InterfaceTransition {
                interface: name.to_string(),
                reason: format!("driver reports MAC {}, expected {}", current, wanted),
            }),
            (Some(current), _) => {
                info!(interface = %name, mac = %current, "MAC address changed");
                Ok(current)
            }
        }
    }

    /// Refresh and return the record for `name` from the driver
    pub async fn status(&self, name: &str) -> InterfaceRecord {
        let slot = self.slot(name);
        let mut record = slot.lock().await;

        let info = self.read_info(name).await;
        if let Some(mode) = info.mode() {
            record.mode = mode;
        }
        if info.mac.is_some() {
            record.mac = info.mac;
        }
        record.clone()
    }

    /// Last known record without touching the system; `None` for unknown
    /// interfaces and while a transition is in flight
    pub fn record(&self, name: &str) -> Option<InterfaceRecord> {
        let slot = self.interfaces.get(name)?.value().clone();
        let record = slot.try_lock().ok()?.clone();
        Some(record)
    }

    fn slot(&self, name: &str) -> Arc<Mutex<InterfaceRecord>> {
        self.interfaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(InterfaceRecord::new(name))))
            .value()
            .clone()
    }

    async fn apply(
        &self,
        record: &mut InterfaceRecord,
        mode: InterfaceMode,
        steps: Vec<CommandSpec>,
    ) -> Result<TransitionReport> {
        let mut failed_steps = Vec::new();
        for step in &steps {
            if let Some(failure) = self.step(step).await {
                warn!(
                    interface = %record.name,
                    command = %step,
                    error = %failure,
                    "Interface step failed, continuing"
                );
                failed_steps.push(step.to_string());
            }
        }

        let after = self.read_info(&record.name).await;
        record.mode = mode;
        record.last_transition = Some(Utc::now());
        if after.mac.is_some() {
            record.mac = after.mac;
        }

        let expected = expected_type(mode);
        if let Some(observed) = &after.type_name {
            if after.mode() != Some(expected) {
                if let Some(actual) = after.mode() {
                    record.mode = actual;
                }
                return Err(Error::InterfaceTransition {
                    interface: record.name.clone(),
                    reason: format!("driver reports type '{}', expected {}", observed, expected),
                });
            }
        }

        Ok(TransitionReport {
            interface: record.name.clone(),
            requested: mode,
            failed_steps,
            observed: after.type_name,
            noop: false,
        })
    }

    /// Run one command; `Some(reason)` on failure
    async fn step(&self, cmd: &CommandSpec) -> Option<String> {
        match self.runner.run(cmd).await {
            Ok(output) if output.success() => None,
            Ok(output) => Some(format!(
                "exit {:?}: {}",
                output.code,
                output.stderr.trim()
            )),
            Err(e) => Some(e.to_string()),
        }
    }

    async fn read_info(&self, name: &str) -> IwInfo {
        let cmd = CommandSpec::new("iw").args(["dev", name, "info"]);
        match self.runner.run(&cmd).await {
            Ok(output) if output.success() => IwInfo::parse(&output.stdout),
            Ok(_) | Err(_) => {
                debug!(interface = %name, "Interface mode not readable");
                IwInfo::default()
            }
        }
    }
}

fn link(name: &str, state: &str) -> CommandSpec {
    CommandSpec::new("ip").args(["link", "set", name, state])
}

fn set_managed(name: &str) -> CommandSpec {
    CommandSpec::new("iw").args([name, "set", "type", "managed"])
}
