//! Process spawning for packaged units
//!
//! Runs the interpreter on a persisted unit under the resolved isolation
//! strategy and captures its output and termination.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::{Config, has_sensitive_prefix};
use crate::isolation::IsolationStrategy;
use crate::types::{ProcessOutput, Termination};

/// Errors that occur while running a child process
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {}: {source}", program.display())]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Launches the interpreter on packaged units
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    interpreter: PathBuf,
    work_dir: PathBuf,
    strategy: IsolationStrategy,
    sensitive_prefixes: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessLauncher {
    /// Create a launcher with no deadline, no sensitive prefixes and the
    /// current directory as working directory
    pub fn new(interpreter: impl Into<PathBuf>, strategy: IsolationStrategy) -> Self {
        Self {
            interpreter: interpreter.into(),
            work_dir: PathBuf::from("."),
            strategy,
            sensitive_prefixes: Vec::new(),
            timeout: None,
        }
    }

    /// Create a launcher from engine configuration
    pub fn from_config(config: &Config, strategy: IsolationStrategy) -> Self {
        Self::new(config.interpreter_binary(), strategy)
            .work_dir(config.working_dir())
            .sensitive_prefixes(config.sensitive_env_prefixes.iter().cloned())
            .timeout(config.timeout())
    }

    /// Set the working directory of the child
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Set the prefixes of variables withheld from the child
    pub fn sensitive_prefixes(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.sensitive_prefixes = prefixes.into_iter().collect();
        self
    }

    /// Set the wall-clock deadline
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn strategy(&self) -> &IsolationStrategy {
        &self.strategy
    }

    fn is_sensitive(&self, name: &str) -> bool {
        has_sensitive_prefix(&self.sensitive_prefixes, name)
    }

    fn command(&self, script: &Path) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(script)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (name, _) in std::env::vars_os() {
            if let Some(name) = name.to_str()
                && self.is_sensitive(name)
            {
                command.env_remove(name);
            }
        }

        self.apply_strategy(&mut command);
        command
    }

    #[cfg(unix)]
    fn apply_strategy(&self, command: &mut Command) {
        match &self.strategy {
            IsolationStrategy::Local => {}
            IsolationStrategy::UnprivilegedUser(identity) => {
                // std clears supplementary groups when switching away from root
                command.uid(identity.uid).gid(identity.gid);
            }
            IsolationStrategy::Namespaced => {
                #[cfg(target_os = "linux")]
                {
                    use nix::sched::{CloneFlags, unshare};

                    // SAFETY: unshare is a single async-signal-safe syscall and
                    // the closure touches no shared state.
                    unsafe {
                        command.pre_exec(|| {
                            unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET)
                                .map_err(std::io::Error::from)
                        });
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn apply_strategy(&self, _command: &mut Command) {}

    /// Run the interpreter on `script` and wait for it to finish
    ///
    /// When the deadline passes the child is killed and the result is
    /// [`Termination::TimedOut`] with empty output.
    #[instrument(skip(self), fields(mode = ?self.strategy.mode()))]
    pub async fn run(&self, script: &Path) -> Result<ProcessOutput, LaunchError> {
        let child = self
            .command(script)
            .spawn()
            .map_err(|source| LaunchError::SpawnFailed {
                program: self.interpreter.clone(),
                source,
            })?;

        debug!(pid = child.id(), "spawned child process");

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    // Dropping the future drops the child, and kill_on_drop kills it
                    warn!(limit = ?limit, "child process exceeded its deadline, killed");
                    return Ok(ProcessOutput {
                        termination: Termination::TimedOut(limit),
                        stdout: String::new(),
                        stderr: String::new(),
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(LaunchError::Wait)?;

        let result = ProcessOutput {
            termination: termination_of(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(termination = %result.termination, "child process finished");
        Ok(result)
    }
}

fn termination_of(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return Termination::Signaled(signal);
        }
    }

    Termination::Exited(-1)
}
