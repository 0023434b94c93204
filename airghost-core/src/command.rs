//! External command execution
//!
//! Everything AirGhost does to the host goes through [`CommandRunner`]:
//! one-shot commands (`ip`, `iw`, `iptables`) via [`CommandRunner::run`]
//! and long-lived daemons via [`CommandRunner::spawn`]. Commands are
//! argument vectors; no shell is ever involved.

use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Lines of daemon stderr kept for crash reports
const STDERR_TAIL_LINES: usize = 64;

/// How long to wait for the stderr reader to drain after exit
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Whether this command starts with `program` followed by `prefix`
    pub fn matches(&self, program: &str, prefix: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a one-shot command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Handle to a spawned long-lived process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if still known
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness poll; `Some(code)` once the process exited
    /// (`code` is `None` when it died from a signal)
    fn try_exit(&mut self) -> Result<Option<Option<i32>>>;

    /// Captured error stream
    async fn stderr_text(&mut self) -> String;

    /// Ask the process to exit (SIGTERM)
    fn terminate(&mut self) -> Result<()>;

    /// Wait for exit up to `timeout`; returns whether the process exited
    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool>;

    /// Force the process down (SIGKILL) and reap it
    async fn kill(&mut self) -> Result<()>;
}

/// Executes external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;

    /// Start a long-lived process and return its handle
    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn ProcessHandle>>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    /// Create a runner whose one-shot commands time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        trace!(command = %cmd, "Running command");

        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::CommandTimeout {
                program: cmd.program.clone(),
            })??;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        debug!(command = %cmd, "Spawning process");

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let reader = child.stderr.take().map(|stderr| {
            let tail = tail.clone();
            let program = cmd.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(program = %program, "{}", line);
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        Ok(Box::new(SystemProcess {
            pid: child.id(),
            child,
            tail,
            reader,
        }))
    }
}

/// A daemon spawned by [`SystemRunner`]
///
/// Stderr is drained continuously into a bounded tail so a chatty daemon
/// never blocks on a full pipe.
struct SystemProcess {
    pid: Option<u32>,
    child: Child,
    tail: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl ProcessHandle for SystemProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit(&mut self) -> Result<Option<Option<i32>>> {
        Ok(self.child.try_wait()?.map(|status| status.code()))
    }

    async fn stderr_text(&mut self) -> String {
        if let Some(reader) = self.reader.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, reader).await.is_err() {
                warn!(pid = ?self.pid, "Timed out draining process stderr");
            }
        }
        let tail = self.tail.lock();
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    fn terminate(&mut self) -> Result<()> {
        let pid = self
            .child
            .id()
            .ok_or_else(|| Error::process("process already reaped"))?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                .map_err(|e| Error::process(format!("SIGTERM to {} failed: {}", pid, e)))
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()?;
            Ok(())
        }
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => {
                status?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_command_display_and_match() {
        let cmd = CommandSpec::new("iw").args(["wlan0", "set", "monitor", "none"]);
        assert_eq!(cmd.to_string(), "iw wlan0 set monitor none");
        assert!(cmd.matches("iw", &["wlan0", "set"]));
        assert!(!cmd.matches("iw", &["wlan1"]));
        assert!(!cmd.matches("ip", &[]));
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = SystemRunner::default();
        let output = runner
            .run(&CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let runner = SystemRunner::new(Duration::from_millis(50));
        let result = runner.run(&CommandSpec::new("sleep").arg("5")).await;
        assert!(matches!(result, Err(Error::CommandTimeout { .. })));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let runner = SystemRunner::default();
        let result = runner
            .spawn(&CommandSpec::new("/nonexistent/airghost-daemon"))
            .await;
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_spawned_process_exit_and_stderr() {
        let runner = SystemRunner::default();
        let mut process = runner
            .spawn(&CommandSpec::new("sh").args(["-c", "echo 'bad config' >&2; exit 1"]))
            .await
            .unwrap();

        assert!(process.wait_for_exit(Duration::from_secs(5)).await.unwrap());
        assert_eq!(process.try_exit().unwrap(), Some(Some(1)));
        assert_eq!(process.stderr_text().await, "bad config");
    }

    #[tokio::test]
    async fn test_terminate_long_running_process() {
        let runner = SystemRunner::default();
        let mut process = runner
            .spawn(&CommandSpec::new("sleep").arg("30"))
            .await
            .unwrap();

        assert!(process.pid().is_some());
        assert_eq!(process.try_exit().unwrap(), None);

        process.terminate().unwrap();
        assert!(process.wait_for_exit(Duration::from_secs(5)).await.unwrap());
    }
}
