//! Command implementations

use airghost_attack::{
    AttackOrchestrator, ConfigMaterializer, CredentialEvent, DaemonRole, InterfaceStateMachine,
};
use airghost_core::{
    AttackKind, AttackParameters, AttackState, InterfaceMode, Settings, SystemRunner,
};
use anyhow::{bail, Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::args::{parse_params, Cli, Commands, InterfaceCommand};

/// How often a running attack is checked for daemons that died
const WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Run the command selected on the command line
pub async fn run_command(cli: Cli) -> Result<()> {
    let settings = Settings::load_or_default(cli.config.as_deref())
        .context("failed to load settings")?;

    match cli.command {
        Commands::Start { kind, params } => start(settings, kind, &params).await,
        Commands::Render {
            kind,
            params,
            output,
        } => render(settings, kind, &params, output),
        Commands::Interface { command } => interface(settings, command).await,
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Commands::Attacks => {
            for kind in [
                AttackKind::EvilTwin,
                AttackKind::CaptivePortal,
                AttackKind::Deauth,
            ] {
                println!("{:<16} {}", kind.as_str(), kind.display_name());
            }
            Ok(())
        }
    }
}

async fn start(settings: Settings, kind: AttackKind, params: &[String]) -> Result<()> {
    let params = parse_params(params)?;
    let runner = Arc::new(SystemRunner::new(settings.command_timeout()));
    let orchestrator = AttackOrchestrator::new(settings, runner);

    orchestrator.set_credential_sink(Arc::new(|event: CredentialEvent| {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to encode credential event"),
        }
    }));

    // Handlers go in before any daemon is spawned
    let signal = shutdown_signal().context("failed to install signal handlers")?;
    run_attack(&orchestrator, kind, params, signal).await
}

/// Start `kind` and keep it running until `shutdown` resolves
///
/// A shutdown while the start is still in flight stops whatever already
/// came up; the in-flight launch kills its own process.
async fn run_attack<F>(
    orchestrator: &AttackOrchestrator,
    kind: AttackKind,
    params: AttackParameters,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut starting = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.start(kind, params).await }
    });

    let started = tokio::select! {
        joined = &mut starting => joined.context("start task failed")?,
        _ = &mut shutdown => {
            info!(kind = %kind, "Shutdown requested during start");
            println!("\nShutting down...");
            orchestrator.shutdown().await;
            match starting.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => info!(kind = %kind, error = %e, "Start interrupted"),
                Err(e) => warn!(kind = %kind, error = %e, "Start task failed"),
            }
            // Clean up what the interrupted start left behind
            orchestrator.stop_all().await;
            return Ok(());
        }
    };

    let started = match started {
        Ok(info) => info,
        Err(e) => {
            // A partial composite start may have left processes behind
            orchestrator.shutdown().await;
            return Err(e).with_context(|| format!("failed to start {}", kind));
        }
    };

    println!(
        "{} running on {} (pid {})",
        kind.display_name(),
        started.interface.as_deref().unwrap_or("-"),
        started
            .pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Press Ctrl+C to stop.");

    let mut watch = tokio::time::interval(WATCH_INTERVAL);
    watch.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = watch.tick() => {
                for attack in orchestrator.status() {
                    if attack.state == AttackState::Failed {
                        warn!(
                            kind = %attack.kind,
                            error = attack.last_error.as_deref().unwrap_or_default(),
                            "Attack is no longer running"
                        );
                    }
                }
            }
        }
    }

    println!("\nShutting down...");
    orchestrator.shutdown().await;
    Ok(())
}

/// Register SIGINT and SIGTERM; the returned future resolves on either
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Signal handling failed, shutting down");
        }
    })
}

fn render(
    mut settings: Settings,
    kind: AttackKind,
    params: &[String],
    output: Option<PathBuf>,
) -> Result<()> {
    let roles: &[DaemonRole] = match kind {
        AttackKind::EvilTwin => &[DaemonRole::AccessPoint],
        AttackKind::CaptivePortal => &[DaemonRole::AccessPoint, DaemonRole::DhcpDns],
        AttackKind::Deauth => bail!("{} has no daemon configuration", kind),
    };

    let mut params = parse_params(params)?;
    if kind == AttackKind::CaptivePortal {
        params.security = false;
    }
    params.validate_for(kind)?;

    if let Some(dir) = output {
        settings.config_dir = dir;
    }
    let materializer = ConfigMaterializer::new(settings);

    for role in roles {
        let path = materializer.materialize(*role, &params)?;
        println!("# {}", path.display());
        print!("{}", materializer.render(*role, &params)?);
    }
    Ok(())
}

async fn interface(settings: Settings, command: InterfaceCommand) -> Result<()> {
    let runner = Arc::new(SystemRunner::new(settings.command_timeout()));
    let machine = InterfaceStateMachine::new(runner, settings.kill_conflicting);

    match command {
        InterfaceCommand::Status { name } => {
            let record = machine.status(&name).await;
            println!(
                "{}: mode {}, mac {}",
                record.name,
                record.mode,
                record
                    .mac
                    .map(|mac| mac.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
        InterfaceCommand::Prepare { name, mode } => {
            let mode = InterfaceMode::from(mode);
            let report = machine.prepare(&name, mode).await?;
            for step in &report.failed_steps {
                warn!(interface = %name, command = %step, "Step failed");
            }
            if report.noop {
                println!("{} already in {} mode", name, mode);
            } else if report.verified() {
                println!("{} now in {} mode", name, mode);
            } else {
                println!("{}: {} mode commands issued", name, mode);
            }
        }
        InterfaceCommand::Reset { name } => {
            machine.reset(&name).await?;
            println!("{} reset to managed mode", name);
        }
        InterfaceCommand::Mac { name, mac } => {
            let mac = machine.set_mac(&name, mac).await?;
            println!("{} now has MAC {}", name, mac);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use airghost_core::{CommandOutput, CommandRunner, CommandSpec, ProcessHandle};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Every command succeeds; processes live until signalled
    #[derive(Default)]
    struct FakeRunner {
        processes: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl FakeRunner {
        fn spawned(&self) -> usize {
            self.processes.lock().unwrap().len()
        }

        fn alive(&self) -> usize {
            self.processes
                .lock()
                .unwrap()
                .iter()
                .filter(|alive| alive.load(Ordering::SeqCst))
                .count()
        }
    }

    struct FakeProcess {
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ProcessHandle for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        fn try_exit(&mut self) -> airghost_core::Result<Option<Option<i32>>> {
            Ok(if self.alive.load(Ordering::SeqCst) {
                None
            } else {
                Some(None)
            })
        }

        async fn stderr_text(&mut self) -> String {
            String::new()
        }

        fn terminate(&mut self) -> airghost_core::Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_for_exit(&mut self, _timeout: Duration) -> airghost_core::Result<bool> {
            Ok(!self.alive.load(Ordering::SeqCst))
        }

        async fn kill(&mut self) -> airghost_core::Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, _cmd: &CommandSpec) -> airghost_core::Result<CommandOutput> {
            Ok(CommandOutput {
                code: Some(0),
                ..CommandOutput::default()
            })
        }

        async fn spawn(&self, _cmd: &CommandSpec) -> airghost_core::Result<Box<dyn ProcessHandle>> {
            let alive = Arc::new(AtomicBool::new(true));
            self.processes.lock().unwrap().push(alive.clone());
            Ok(Box::new(FakeProcess { alive }))
        }
    }

    fn orchestrator(dir: &TempDir, grace_period_ms: u64, runner: &Arc<FakeRunner>) -> AttackOrchestrator {
        let settings = Settings {
            config_dir: dir.path().to_path_buf(),
            grace_period_ms,
            stop_timeout_ms: 50,
            ..Settings::default()
        };
        AttackOrchestrator::new(settings, runner.clone())
    }

    fn evil_twin() -> AttackParameters {
        AttackParameters::new()
            .with_interface("wlan0")
            .with_ssid("Free_WiFi")
            .with_channel("6")
    }

    fn assignments(pairs: &[&str]) -> Vec<String> {
        pairs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_captive_portal_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let params = assignments(&["interface=wlan0", "ssid=Cafe", "security=true", "password=longenough"]);

        render(
            Settings::default(),
            AttackKind::CaptivePortal,
            &params,
            Some(dir.path().to_path_buf()),
        )
        .unwrap();

        let ap = std::fs::read_to_string(dir.path().join("hostapd_evil_twin.conf")).unwrap();
        assert!(ap.contains("ssid=Cafe\n"));
        assert!(!ap.contains("wpa"));
        assert!(dir.path().join("dnsmasq_captive.conf").exists());
    }

    #[test]
    fn test_render_deauth_is_rejected() {
        let dir = TempDir::new().unwrap();
        let params = assignments(&["interface=wlan0mon", "bssid=aa:bb:cc:dd:ee:ff"]);
        assert!(render(
            Settings::default(),
            AttackKind::Deauth,
            &params,
            Some(dir.path().to_path_buf())
        )
        .is_err());
    }

    #[test]
    fn test_render_requires_ssid() {
        let dir = TempDir::new().unwrap();
        let params = assignments(&["interface=wlan0"]);
        assert!(render(
            Settings::default(),
            AttackKind::EvilTwin,
            &params,
            Some(dir.path().to_path_buf())
        )
        .is_err());
        assert!(!dir.path().join("hostapd_evil_twin.conf").exists());
    }

    #[tokio::test]
    async fn test_shutdown_during_start_stops_daemons() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::default());
        let orch = orchestrator(&dir, 300, &runner);

        let signal = tokio::time::sleep(Duration::from_millis(20));
        run_attack(&orch, AttackKind::EvilTwin, evil_twin(), signal)
            .await
            .unwrap();

        assert_eq!(runner.spawned(), 1);
        assert_eq!(runner.alive(), 0);
        assert!(orch
            .status()
            .iter()
            .all(|info| info.state == AttackState::Idle));
    }

    #[tokio::test]
    async fn test_shutdown_after_start_stops_daemons() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::default());
        let orch = orchestrator(&dir, 10, &runner);

        let signal = tokio::time::sleep(Duration::from_millis(150));
        run_attack(&orch, AttackKind::EvilTwin, evil_twin(), signal)
            .await
            .unwrap();

        assert_eq!(runner.spawned(), 1);
        assert_eq!(runner.alive(), 0);
        assert_eq!(orch.active_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_start_is_reported() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::default());
        let orch = orchestrator(&dir, 10, &runner);

        let params = AttackParameters::new().with_ssid("Free_WiFi");
        let result = run_attack(&orch, AttackKind::EvilTwin, params, std::future::pending()).await;

        assert!(result.is_err());
        assert_eq!(runner.spawned(), 0);
    }
}
