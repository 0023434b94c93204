//! Scriptable [`CommandRunner`] for tests

use airghost_core::{CommandOutput, CommandRunner, CommandSpec, Error, ProcessHandle, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observable state of a fake process
#[derive(Debug, Default)]
pub struct FakeState {
    pub alive: AtomicBool,
    pub terminated: AtomicBool,
    pub killed: AtomicBool,
}

impl FakeState {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    crash_stderr: Option<String>,
    exit_code: Option<i32>,
    fail_terminate: bool,
    ignore_terminate: bool,
    fail_spawn: bool,
}

struct FakeProcess {
    pid: u32,
    state: Arc<FakeState>,
    behavior: Behavior,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&mut self) -> Result<Option<Option<i32>>> {
        if self.state.is_alive() {
            Ok(None)
        } else if self.state.killed.load(Ordering::SeqCst) {
            Ok(Some(None))
        } else if let Some(code) = self.behavior.exit_code {
            Ok(Some(Some(code)))
        } else if self.behavior.crash_stderr.is_some() {
            Ok(Some(Some(1)))
        } else {
            Ok(Some(Some(0)))
        }
    }

    async fn stderr_text(&mut self) -> String {
        self.behavior.crash_stderr.clone().unwrap_or_default()
    }

    fn terminate(&mut self) -> Result<()> {
        if self.behavior.fail_terminate {
            return Err(Error::process("mock: SIGTERM refused"));
        }
        self.state.terminated.store(true, Ordering::SeqCst);
        if !self.behavior.ignore_terminate {
            self.state.alive.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool> {
        if self.state.is_alive() {
            tokio::time::sleep(timeout).await;
        }
        Ok(!self.state.is_alive())
    }

    async fn kill(&mut self) -> Result<()> {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every command and fabricates processes
#[derive(Default)]
pub struct MockRunner {
    commands: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<(CommandSpec, Arc<FakeState>)>>,
    iw_info: Mutex<HashMap<String, String>>,
    failing: Mutex<Vec<(String, Vec<String>)>>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    next_pid: AtomicU32,
    run_delay: Mutex<Option<Duration>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(4000),
            ..Self::default()
        }
    }

    /// Output of `iw dev <name> info`; unset interfaces are unreadable
    pub fn set_iw_info(&self, name: &str, output: &str) {
        self.iw_info.lock().insert(name.to_string(), output.to_string());
    }

    /// Make one-shot commands starting with `program prefix..` exit 1
    pub fn fail_command(&self, program: &str, prefix: &[&str]) {
        self.failing.lock().push((
            program.to_string(),
            prefix.iter().map(|s| s.to_string()).collect(),
        ));
    }

    /// Processes of `program` exit immediately with `stderr`
    pub fn crash_on(&self, program: &str, stderr: &str) {
        self.behaviors
            .lock()
            .entry(program.to_string())
            .or_default()
            .crash_stderr = Some(stderr.to_string());
    }

    /// Processes of `program` exit immediately with `code` and no stderr
    pub fn exit_on(&self, program: &str, code: i32) {
        self.behaviors
            .lock()
            .entry(program.to_string())
            .or_default()
            .exit_code = Some(code);
    }

    /// Every one-shot command takes `delay` to complete
    pub fn set_run_delay(&self, delay: Duration) {
        *self.run_delay.lock() = Some(delay);
    }

    /// Processes of `program` reject SIGTERM with an error
    pub fn fail_terminate_on(&self, program: &str) {
        self.behaviors
            .lock()
            .entry(program.to_string())
            .or_default()
            .fail_terminate = true;
    }

    /// Processes of `program` survive SIGTERM and need SIGKILL
    pub fn ignore_terminate_on(&self, program: &str) {
        self.behaviors
            .lock()
            .entry(program.to_string())
            .or_default()
            .ignore_terminate = true;
    }

    /// Spawning `program` fails
    pub fn fail_spawn_on(&self, program: &str) {
        self.behaviors
            .lock()
            .entry(program.to_string())
            .or_default()
            .fail_spawn = true;
    }

    /// One-shot commands issued so far
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().clone()
    }

    /// Whether a one-shot command with this prefix was issued
    pub fn issued(&self, program: &str, prefix: &[&str]) -> bool {
        self.commands.lock().iter().any(|c| c.matches(program, prefix))
    }

    /// Commands spawned as long-lived processes
    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    /// State of the latest process spawned for `program`
    pub fn process(&self, program: &str) -> Option<Arc<FakeState>> {
        self.spawned
            .lock()
            .iter()
            .rev()
            .find(|(c, _)| c.program == program)
            .map(|(_, s)| s.clone())
    }

    /// Processes still alive
    pub fn alive_count(&self) -> usize {
        self.spawned
            .lock()
            .iter()
            .filter(|(_, s)| s.is_alive())
            .count()
    }

    /// Forget recorded one-shot commands
    pub fn clear_commands(&self) {
        self.commands.lock().clear();
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        self.commands.lock().push(cmd.clone());

        let delay = *self.run_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if cmd.program == "iw" && cmd.args.len() == 3 && cmd.args[0] == "dev" && cmd.args[2] == "info"
        {
            return Ok(match self.iw_info.lock().get(&cmd.args[1]) {
                Some(stdout) => CommandOutput {
                    code: Some(0),
                    stdout: stdout.clone(),
                    stderr: String::new(),
                },
                None => CommandOutput {
                    code: Some(237),
                    stdout: String::new(),
                    stderr: "command failed: No such device (-19)".to_string(),
                },
            });
        }

        let failing = self.failing.lock().iter().any(|(program, prefix)| {
            let prefix: Vec<&str> = prefix.iter().map(String::as_str).collect();
            cmd.matches(program, &prefix)
        });

        Ok(CommandOutput {
            code: Some(if failing { 1 } else { 0 }),
            stdout: String::new(),
            stderr: if failing {
                "mock failure".to_string()
            } else {
                String::new()
            },
        })
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        let behavior = self
            .behaviors
            .lock()
            .get(&cmd.program)
            .cloned()
            .unwrap_or_default();

        if behavior.fail_spawn {
            return Err(Error::Spawn {
                program: cmd.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock: not installed"),
            });
        }

        let state = Arc::new(FakeState::default());
        state
            .alive
            .store(
                behavior.crash_stderr.is_none() && behavior.exit_code.is_none(),
                Ordering::SeqCst,
            );
        self.spawned.lock().push((cmd.clone(), state.clone()));

        Ok(Box::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            state,
            behavior,
        }))
    }
}
