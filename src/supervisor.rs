use crate::config::Config;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("failed to run `{command}`: {source}")]
    StopCommand {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    StopStatus { command: String, status: ExitStatus },

    #[error("failed to terminate server process {pid}: {source}")]
    Kill { pid: u32, source: std::io::Error },
}

#[derive(Debug)]
enum ServerState {
    NotStarted,
    Running(Child),
    Stopped,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    Stopped,
    Disabled,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Disabled => "external",
        }
    }
}

/// Owns the local inference server process.
///
/// `ensure_started` runs on the async runtime while `stop` runs on the UI
/// thread, so the state sits behind a mutex.
#[derive(Debug)]
pub struct ServerSupervisor {
    binary: String,
    model: String,
    state: Mutex<ServerState>,
}

impl ServerSupervisor {
    pub fn new(config: &Config) -> Self {
        let state = if config.autostart {
            ServerState::NotStarted
        } else {
            ServerState::Disabled
        };

        Self {
            binary: config.server_binary.clone(),
            model: config.model.clone(),
            state: Mutex::new(state),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command_line(&self, verb: &str) -> String {
        format!("{} {verb} {}", self.binary, self.model)
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        // A panic while holding the lock leaves the state readable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match &*self.lock() {
            ServerState::NotStarted => Lifecycle::NotStarted,
            ServerState::Running(_) => Lifecycle::Running,
            ServerState::Stopped => Lifecycle::Stopped,
            ServerState::Disabled => Lifecycle::Disabled,
        }
    }

    /// Spawns `<binary> run <model>` the first time it is called. A failed
    /// spawn leaves the supervisor not started so a later call may retry.
    pub fn ensure_started(&self) -> Result<StartOutcome, SupervisorError> {
        let mut state = self.lock();
        match &*state {
            ServerState::Running(_) => return Ok(StartOutcome::AlreadyRunning),
            ServerState::Stopped => return Ok(StartOutcome::Stopped),
            ServerState::Disabled => return Ok(StartOutcome::Disabled),
            ServerState::NotStarted => {}
        }

        let command = self.command_line("run");
        let child = Command::new(&self.binary)
            .args(["run", self.model.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: command.clone(),
                source,
            })?;

        info!(pid = child.id(), %command, "started inference server");
        *state = ServerState::Running(child);
        Ok(StartOutcome::Started)
    }

    /// Issues `<binary> stop <model>` and terminates the tracked process.
    ///
    /// The stop command runs even if nothing was started here, since the
    /// server may have been launched outside the app. Errors are returned
    /// for reporting; the supervisor ends up `Stopped` regardless.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        let child = match std::mem::replace(&mut *state, ServerState::Stopped) {
            ServerState::Stopped => return Ok(()),
            ServerState::Disabled => {
                *state = ServerState::Disabled;
                return Ok(());
            }
            ServerState::NotStarted => None,
            ServerState::Running(child) => Some(child),
        };
        drop(state);

        let command = self.command_line("stop");
        let stop_result = Command::new(&self.binary)
            .args(["stop", self.model.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| SupervisorError::StopCommand {
                command: command.clone(),
                source,
            })
            .and_then(|status| {
                if status.success() {
                    Ok(())
                } else {
                    Err(SupervisorError::StopStatus {
                        command: command.clone(),
                        status,
                    })
                }
            });

        let kill_result = match child {
            Some(child) => terminate(child),
            None => Ok(()),
        };

        match (&stop_result, &kill_result) {
            (Ok(()), Ok(())) => info!(%command, "inference server stopped"),
            _ => warn!(%command, "inference server shutdown reported errors"),
        }

        stop_result.and(kill_result)
    }
}

fn terminate(mut child: Child) -> Result<(), SupervisorError> {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(pid, %status, "server process already exited");
            return Ok(());
        }
        Ok(None) => {}
        Err(err) => debug!(pid, error = %err, "could not poll server process"),
    }

    child
        .kill()
        .map_err(|source| SupervisorError::Kill { pid, source })?;
    let _ = child.wait();
    debug!(pid, "server process terminated");
    Ok(())
}
