//! Process supervisor for attack daemons
//!
//! The `ProcessSupervisor` owns every daemon AirGhost launches. It
//! provides:
//!
//! - One process per attack kind, checked and reserved atomically
//! - A grace check turning immediate daemon failures into errors
//! - Graceful stop with SIGKILL escalation
//! - Fault-isolated shutdown of everything it owns

use airghost_core::{AttackKind, CommandRunner, CommandSpec, Error, ProcessHandle, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Information about a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub kind: AttackKind,
    pub pid: Option<u32>,
    /// Command line the process was launched with
    pub command: String,
    pub started_at: DateTime<Utc>,
}

struct Supervised {
    handle: Box<dyn ProcessHandle>,
    info: ProcessInfo,
}

enum Slot {
    /// Reserved by an in-flight launch
    Starting,
    Running(Supervised),
}

/// Supervisor owning the attack daemons
pub struct ProcessSupervisor {
    runner: Arc<dyn CommandRunner>,
    /// Map of attack kind to its process; at most one per kind
    slots: DashMap<AttackKind, Slot>,
    grace_period: Duration,
    stop_timeout: Duration,
    /// Is the supervisor shutting down?
    shutting_down: AtomicBool,
}

impl ProcessSupervisor {
    /// Create a new supervisor
    pub fn new(runner: Arc<dyn CommandRunner>, grace_period: Duration, stop_timeout: Duration) -> Self {
        Self {
            runner,
            slots: DashMap::new(),
            grace_period,
            stop_timeout,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Launch `command` as the process of `kind`
    ///
    /// Fails with `AlreadyRunning` if `kind` has a live or starting
    /// process. After spawning, waits the grace period; a process that
    /// already exited yields `ProcessCrashedEarly` carrying its stderr and
    /// leaves the slot empty. A kind that runs to completion may exit
    /// with status 0 inside the window; that launch succeeds and the exit
    /// is reported by the next `cleanup_exited`.
    pub async fn launch(&self, kind: AttackKind, command: CommandSpec) -> Result<ProcessInfo> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::process("supervisor is shutting down"));
        }

        self.reserve(kind)?;

        info!(kind = %kind, command = %command, "Launching process");

        let mut handle = match self.runner.spawn(&command).await {
            Ok(handle) => handle,
            Err(e) => {
                self.slots.remove(&kind);
                error!(kind = %kind, error = %e, "Failed to spawn process");
                return Err(e);
            }
        };

        tokio::time::sleep(self.grace_period).await;

        match handle.try_exit() {
            Ok(None) => {}
            Ok(Some(Some(0))) if kind.runs_to_completion() => {
                info!(kind = %kind, "Process completed during grace period");
            }
            Ok(Some(code)) => {
                self.slots.remove(&kind);
                let mut stderr = handle.stderr_text().await;
                if stderr.trim().is_empty() {
                    stderr = match code {
                        Some(code) => format!("exited with status {}", code),
                        None => "terminated by signal".to_string(),
                    };
                }
                error!(kind = %kind, code = ?code, stderr = %stderr, "Process exited during grace period");
                return Err(Error::ProcessCrashedEarly { kind, stderr });
            }
            Err(e) => {
                self.slots.remove(&kind);
                let _ = handle.kill().await;
                error!(kind = %kind, error = %e, "Failed to poll process");
                return Err(e);
            }
        }

        if self.shutting_down.load(Ordering::SeqCst) {
            self.slots.remove(&kind);
            warn!(kind = %kind, "Shutdown began during launch, killing process");
            let _ = handle.kill().await;
            return Err(Error::process("supervisor is shutting down"));
        }

        let info = ProcessInfo {
            kind,
            pid: handle.pid(),
            command: command.to_string(),
            started_at: Utc::now(),
        };
        self.slots.insert(
            kind,
            Slot::Running(Supervised {
                handle,
                info: info.clone(),
            }),
        );

        info!(kind = %kind, pid = ?info.pid, "Process running");
        Ok(info)
    }

    /// Check-and-set the slot for `kind`
    fn reserve(&self, kind: AttackKind) -> Result<()> {
        match self.slots.entry(kind) {
            Entry::Vacant(entry) => {
                entry.insert(Slot::Starting);
                Ok(())
            }
            Entry::Occupied(mut entry) => {
                let exited = match entry.get_mut() {
                    Slot::Starting => false,
                    Slot::Running(process) => matches!(process.handle.try_exit(), Ok(Some(_))),
                };
                if exited {
                    debug!(kind = %kind, "Replacing exited process");
                    entry.insert(Slot::Starting);
                    Ok(())
                } else {
                    warn!(kind = %kind, "Process already running");
                    Err(Error::AlreadyRunning(kind))
                }
            }
        }
    }

    /// Stop the process of `kind`
    ///
    /// Sends SIGTERM, waits up to the stop timeout, then SIGKILLs. The
    /// slot is cleared whatever happens; a failed signal is still
    /// reported to the caller.
    pub async fn stop(&self, kind: AttackKind) -> Result<()> {
        let process = match self
            .slots
            .remove_if(&kind, |_, slot| matches!(slot, Slot::Running(_)))
        {
            Some((_, Slot::Running(process))) => process,
            _ => {
                warn!(kind = %kind, "No process to stop");
                return Err(Error::NotRunning(kind));
            }
        };

        info!(kind = %kind, pid = ?process.info.pid, "Stopping process");
        let result = self.terminate(kind, process).await;
        match &result {
            Ok(()) => info!(kind = %kind, "Process stopped"),
            Err(e) => warn!(kind = %kind, error = %e, "Process stopped with errors"),
        }
        result
    }

    async fn terminate(&self, kind: AttackKind, mut process: Supervised) -> Result<()> {
        if let Ok(Some(code)) = process.handle.try_exit() {
            debug!(kind = %kind, code = ?code, "Process had already exited");
            return Ok(());
        }

        let mut result = Ok(());
        if let Err(e) = process.handle.terminate() {
            warn!(kind = %kind, error = %e, "SIGTERM failed");
            result = Err(e);
        }

        let exited = match process.handle.wait_for_exit(self.stop_timeout).await {
            Ok(exited) => exited,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Waiting for exit failed");
                false
            }
        };

        if !exited {
            warn!(kind = %kind, timeout = ?self.stop_timeout, "Process still alive, sending SIGKILL");
            if let Err(e) = process.handle.kill().await {
                error!(kind = %kind, error = %e, "SIGKILL failed");
                result = Err(e);
            }
        }

        result
    }

    /// Stop every supervised process
    ///
    /// Individual failures are logged and do not prevent the remaining
    /// processes from being stopped. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let kinds: Vec<AttackKind> = self
            .slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Running(_)))
            .map(|entry| *entry.key())
            .collect();

        let mut stopped = 0;
        for kind in kinds {
            match self.stop(kind).await {
                Ok(()) => stopped += 1,
                Err(Error::NotRunning(_)) => {}
                Err(e) => {
                    stopped += 1;
                    error!(kind = %kind, error = %e, "Failed to stop process cleanly");
                }
            }
        }
        stopped
    }

    /// Refuse new launches and stop everything
    pub async fn shutdown(&self) -> usize {
        info!("Shutting down process supervisor");
        self.shutting_down.store(true, Ordering::SeqCst);
        self.stop_all().await
    }

    /// Whether `kind` has a process that is still alive
    pub fn is_running(&self, kind: AttackKind) -> bool {
        match self.slots.get_mut(&kind) {
            Some(mut slot) => match slot.value_mut() {
                Slot::Running(process) => matches!(process.handle.try_exit(), Ok(None)),
                Slot::Starting => false,
            },
            None => false,
        }
    }

    /// Information about the process of `kind`
    pub fn info(&self, kind: AttackKind) -> Option<ProcessInfo> {
        match self.slots.get(&kind)?.value() {
            Slot::Running(process) => Some(process.info.clone()),
            Slot::Starting => None,
        }
    }

    /// Number of registered processes (live or not yet reaped)
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Running(_)))
            .count()
    }

    /// Drop slots whose process exited on its own
    ///
    /// Returns the kinds that were cleaned up with their exit status
    /// (`None` when killed by a signal).
    pub fn cleanup_exited(&self) -> Vec<(AttackKind, Option<i32>)> {
        let exited: Vec<(AttackKind, Option<i32>)> = self
            .slots
            .iter_mut()
            .filter_map(|mut entry| {
                let kind = *entry.key();
                match entry.value_mut() {
                    Slot::Running(process) => match process.handle.try_exit() {
                        Ok(Some(code)) => Some((kind, code)),
                        _ => None,
                    },
                    Slot::Starting => None,
                }
            })
            .collect();

        for (kind, code) in &exited {
            self.slots
                .remove_if(kind, |_, slot| matches!(slot, Slot::Running(_)));
            if *code == Some(0) && kind.runs_to_completion() {
                info!(kind = %kind, "Process completed");
            } else {
                warn!(kind = %kind, code = ?code, "Process exited unexpectedly");
            }
        }
        exited
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let remaining = self.active_count();
        if remaining > 0 {
            // Spawned children are kill_on_drop
            warn!(remaining, "ProcessSupervisor dropped with live processes");
        }
    }
}
