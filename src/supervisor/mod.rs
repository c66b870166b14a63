//! The supervisor: one server process, its spawn/kill/restart flow and the
//! state kept around it.
//!
//! Entry points may overlap whenever one of them is waiting (shutdown notice,
//! restart delay, cfg validation). Two flags make kill and restart mutually
//! exclusive: a call that finds one set returns [`Error::Busy`] instead of
//! queueing. A third reserves the single process slot for a spawn still
//! validating its cfg, so a concurrent spawn fails with
//! [`Error::AlreadyRunning`] before touching anything.

mod deadline;
mod restart;
mod spawn;

pub use deadline::{Deadline, DeadlineOutcome};

use crate::collaborators::Collaborators;
use crate::config::{SupervisorConfig, validate_config};
use crate::error::{Error, Result};
use crate::server::{
    ChildProcessHandle, ChildProcessRecord, History, OsLauncher, ProcessLauncher,
    RestartSpawnDelay, SpawnBackoff,
};
use crate::transport::SessionLink;
use crate::transport::command::encode_command;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Author recorded for commands the supervisor issues on its own.
pub const SYSTEM_AUTHOR: &str = "fxrunner";

/// Who issued a command or lifecycle action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAuthor {
    /// An operator, already authenticated upstream.
    Admin(String),
    System,
}

impl fmt::Display for CommandAuthor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin(name) => f.write_str(name),
            Self::System => f.write_str(SYSTEM_AUTHOR),
        }
    }
}

impl From<&str> for CommandAuthor {
    fn from(name: &str) -> Self {
        Self::Admin(name.to_string())
    }
}

struct SupervisorState {
    child: Option<ChildProcessHandle>,
    history: History,
    backoff: SpawnBackoff,
    awaiting_shutdown_notice: bool,
    awaiting_restart_delay: Option<Deadline>,
    /// Set from the moment a spawn passes its first check until it registers the child.
    spawning: bool,
}

fn lock(state: &Mutex<SupervisorState>) -> MutexGuard<'_, SupervisorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears a pending-operation flag when dropped, including when the
/// owning future is dropped mid-wait.
struct PendingFlag<'a> {
    state: &'a Mutex<SupervisorState>,
    clear: fn(&mut SupervisorState),
}

impl<'a> PendingFlag<'a> {
    fn shutdown_notice(state: &'a Mutex<SupervisorState>) -> Self {
        Self {
            state,
            clear: |s| s.awaiting_shutdown_notice = false,
        }
    }

    fn restart_delay(state: &'a Mutex<SupervisorState>) -> Self {
        Self {
            state,
            clear: |s| s.awaiting_restart_delay = None,
        }
    }

    fn spawning(state: &'a Mutex<SupervisorState>) -> Self {
        Self {
            state,
            clear: |s| s.spawning = false,
        }
    }
}

impl Drop for PendingFlag<'_> {
    fn drop(&mut self) {
        (self.clear)(&mut lock(self.state));
    }
}

/// Supervises a single server process.
///
/// Create it with [`Supervisor::new`], which hands back an `Arc` so the
/// event stream of each spawned process can reach back into it.
///
/// # Examples
///
/// ```no_run
/// use fxrunner::{Collaborators, CommandAuthor, Supervisor, SupervisorConfig};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> fxrunner::Result<()> {
///     let config = SupervisorConfig::from_file("fxrunner.json")?;
///     let supervisor = Supervisor::new(config, Collaborators::detached())?;
///
///     supervisor.spawn(true).await?;
///     let admin = CommandAuthor::from("alice");
///     supervisor.send_command("say", &[json!("hello")], &admin).await?;
///     supervisor.restart_server("scheduled restart", &admin).await?;
///     Ok(())
/// }
/// ```
pub struct Supervisor {
    config: SupervisorConfig,
    collaborators: Collaborators,
    launcher: Arc<dyn ProcessLauncher>,
    state: Mutex<SupervisorState>,
    shutdown: CancellationToken,
    weak_self: Weak<Supervisor>,
}

impl Supervisor {
    /// Create a supervisor launching real OS processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    #[tracing::instrument(skip(config, collaborators), fields(command = %config.server.command))]
    pub fn new(config: SupervisorConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        Self::with_launcher(config, collaborators, Arc::new(OsLauncher))
    }

    /// Create a supervisor with a custom process launcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn with_launcher(
        config: SupervisorConfig,
        collaborators: Collaborators,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Arc<Self>> {
        validate_config(&config)?;
        tracing::info!("Creating new Supervisor");

        Ok(Arc::new_cyclic(|weak_self| Self {
            state: Mutex::new(SupervisorState {
                child: None,
                history: History::new(config.history_limit),
                backoff: SpawnBackoff::from(config.backoff),
                awaiting_shutdown_notice: false,
                awaiting_restart_delay: None,
                spawning: false,
            }),
            config,
            collaborators,
            launcher,
            shutdown: CancellationToken::new(),
            weak_self: weak_self.clone(),
        }))
    }

    /// Create a supervisor from a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_config_file(
        path: impl AsRef<std::path::Path>,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>> {
        let config = SupervisorConfig::from_file(path)?;
        Self::new(config, collaborators)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Snapshot of the current process, if one is registered.
    pub fn child_state_info(&self) -> Option<ChildProcessRecord> {
        lock(&self.state).child.as_ref().map(ChildProcessHandle::state_info)
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.state)
            .child
            .as_ref()
            .is_some_and(ChildProcessHandle::is_alive)
    }

    /// Session token of the registered process.
    pub fn active_mutex(&self) -> Option<String> {
        lock(&self.state)
            .child
            .as_ref()
            .map(|child| child.mutex().to_string())
    }

    /// Past processes, oldest first.
    pub fn history(&self) -> Vec<ChildProcessRecord> {
        lock(&self.state).history.entries()
    }

    /// Raise (`true`) or clear (`false`) the spawn backoff. Returns the resulting delay.
    pub fn signal_spawn_backoff_required(&self, required: bool) -> Duration {
        lock(&self.state).backoff.signal(required)
    }

    fn spawn_backoff_active(&self) -> bool {
        lock(&self.state).backoff.is_active()
    }

    /// Delay a restart waits between kill and spawn.
    pub fn restart_spawn_delay(&self) -> RestartSpawnDelay {
        let backoff = lock(&self.state).backoff.current();
        RestartSpawnDelay::resolve(self.config.restart_spawn_delay(), backoff)
    }

    /// Stop accepting spawns and cut pending notice/restart delays short.
    pub fn begin_shutdown(&self) {
        tracing::info!("Supervisor shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled by [`begin_shutdown`](Self::begin_shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Encode and send a console command.
    ///
    /// Returns `Ok(false)` if no process is alive or the write failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the command name is invalid.
    #[tracing::instrument(skip(self, args), fields(author = %author))]
    pub async fn send_command(
        &self,
        name: &str,
        args: &[Value],
        author: &CommandAuthor,
    ) -> Result<bool> {
        let line = encode_command(name, args)?;
        Ok(self.write_command(&line, author).await)
    }

    /// Send a line to the console as is.
    ///
    /// Returns `Ok(false)` if no process is alive or the write failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the command is empty or spans several lines.
    #[tracing::instrument(skip(self), fields(author = %author))]
    pub async fn send_raw_command(&self, command: &str, author: &CommandAuthor) -> Result<bool> {
        if command.trim().is_empty() {
            return Err(Error::Protocol("command must not be empty".to_string()));
        }
        if command.contains(['\n', '\r']) {
            return Err(Error::Protocol(
                "command must not contain line breaks".to_string(),
            ));
        }
        Ok(self.write_command(command, author).await)
    }

    /// Send an event to the server-side resource through the event command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the event type is not a plain identifier.
    pub async fn send_event(&self, event_type: &str, data: Value) -> Result<bool> {
        if event_type.is_empty() || !event_type.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::Protocol(format!("invalid event type '{}'", event_type)));
        }
        self.send_command(
            &self.config.event_command,
            &[Value::String(event_type.to_string()), data],
            &CommandAuthor::System,
        )
        .await
    }

    async fn write_command(&self, line: &str, author: &CommandAuthor) -> bool {
        let child = {
            let state = lock(&self.state);
            match state.child.as_ref() {
                Some(child) if child.is_alive() => child.clone(),
                _ => {
                    tracing::debug!("No live server process, command not sent");
                    return false;
                }
            }
        };

        if let Err(e) = child.write_line(line).await {
            tracing::warn!(pid = child.pid(), error = %e, "Failed to send command");
            return false;
        }

        let logger = &self.collaborators.logger;
        match author {
            CommandAuthor::Admin(name) => logger.log_admin_command(name, line),
            CommandAuthor::System => logger.log_system_command(line),
        }
        true
    }

    fn link(&self) -> Arc<dyn SessionLink> {
        Arc::new(SupervisorLink(self.weak_self.clone()))
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Supervisor")
            .field("child", &state.child)
            .field("history", &state.history.len())
            .field("backoff", &state.backoff.current())
            .field("awaiting_shutdown_notice", &state.awaiting_shutdown_notice)
            .field("awaiting_restart_delay", &state.awaiting_restart_delay.is_some())
            .field("spawning", &state.spawning)
            .finish()
    }
}

/// Lets the event stream reach the supervisor without keeping it alive.
struct SupervisorLink(Weak<Supervisor>);

impl SessionLink for SupervisorLink {
    fn active_mutex(&self) -> Option<String> {
        self.0.upgrade()?.active_mutex()
    }

    fn signal_spawn_backoff_required(&self, required: bool) -> Duration {
        self.0
            .upgrade()
            .map(|s| s.signal_spawn_backoff_required(required))
            .unwrap_or_default()
    }

    fn spawn_backoff_active(&self) -> bool {
        self.0
            .upgrade()
            .is_some_and(|s| s.spawn_backoff_active())
    }
}
