//! Contracts for the subsystems the supervisor talks to.
//!
//! Storage, the web dashboard, chat integrations and cfg validation live
//! outside this crate. The supervisor receives them at construction through
//! [`Collaborators`] and never looks them up globally. Every hook has a no-op
//! default so implementors only override what they care about.

use crate::server::ChildProcessState;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Which pipe a chunk of server output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Server console output and command audit trail.
pub trait ConsoleLogger: Send + Sync {
    fn write_output(&self, _stream: OutputStream, _chunk: &[u8]) {}
    fn log_spawn(&self, _pid: u32) {}
    fn log_admin_command(&self, _author: &str, _command: &str) {}
    fn log_system_command(&self, _command: &str) {}
    /// Log batch emitted by the server-side resource.
    fn write_structured_logs(&self, _logs: &Value, _mutex: &str) {}
}

/// Outcome of checking the server cfg before a spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfgValidation {
    /// Reported verbatim to the operator when present.
    pub errors: Option<String>,
    pub warnings: Vec<String>,
    /// Address the server is expected to bind.
    pub connect_endpoint: String,
}

#[async_trait]
pub trait ConfigValidator: Send + Sync {
    async fn validate(&self, cfg_path: &Path, data_path: &Path) -> CfgValidation;
}

pub trait HealthMonitor: Send + Sync {
    fn reset_state(&self) {}
    fn handle_heartbeat(&self) {}
    /// The server process exited, for whatever reason.
    fn handle_process_exit(&self, _code: Option<i32>) {}
}

pub trait Scheduler: Send + Sync {
    fn handle_server_close(&self) {}
}

pub trait ResourceTracker: Send + Sync {
    fn handle_server_events(&self, _payload: &Value, _mutex: &str) {}
    fn handle_server_close(&self) {}
}

pub trait Playerlist: Send + Sync {
    fn reset_state(&self) {}
    fn handle_server_events(&self, _payload: &Value, _mutex: &str) {}
    fn handle_server_close(&self) {}
}

pub trait Metrics: Send + Sync {
    fn log_node_heap(&self, _payload: &Value) {}
    fn handle_server_close(&self) {}
}

/// Operator-facing announcements (chat bots and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Spawning {
        server_name: String,
    },
    Stopped {
        server_name: String,
        reason: String,
        author: String,
        is_restarting: bool,
    },
}

pub trait Announcer: Send + Sync {
    fn send_announcement(&self, _announcement: Announcement) {}
}

/// Live dashboard push layer.
pub trait Dashboard: Send + Sync {
    fn push_status_refresh(&self, _status: ChildProcessState) {}
}

/// Process-wide key/value cache.
pub trait SharedCache: Send + Sync {
    fn set(&self, _key: &str, _value: String) {}
}

/// Player action storage.
pub trait ActionStore: Send + Sync {
    fn ack_warning(&self, _action_id: &str) {}
}

/// Receives application commands bridged over the event stream.
pub trait CommandBridge: Send + Sync {
    fn handle_bridged_command(&self, _payload: &Value) {}
}

/// Collaborator that does nothing, standing in for absent subsystems.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

/// Endpoint reported by [`Detached`] validation, the server's default bind address.
pub const DEFAULT_CONNECT_ENDPOINT: &str = "0.0.0.0:30120";

#[async_trait]
impl ConfigValidator for Detached {
    async fn validate(&self, _cfg_path: &Path, _data_path: &Path) -> CfgValidation {
        CfgValidation {
            connect_endpoint: DEFAULT_CONNECT_ENDPOINT.to_string(),
            ..CfgValidation::default()
        }
    }
}

impl HealthMonitor for Detached {}
impl Scheduler for Detached {}
impl ResourceTracker for Detached {}
impl Playerlist for Detached {}
impl Metrics for Detached {}
impl Announcer for Detached {}
impl Dashboard for Detached {}
impl SharedCache for Detached {}
impl ActionStore for Detached {}
impl CommandBridge for Detached {}

/// Mirrors server output and commands into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsoleLogger;

impl ConsoleLogger for TracingConsoleLogger {
    fn write_output(&self, stream: OutputStream, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            tracing::info!(target: "fxserver", %stream, "{}", line);
        }
    }

    fn log_spawn(&self, pid: u32) {
        tracing::info!(target: "fxserver", pid, "Server process spawned");
    }

    fn log_admin_command(&self, author: &str, command: &str) {
        tracing::info!(target: "fxserver", author, command, "Admin command");
    }

    fn log_system_command(&self, command: &str) {
        tracing::debug!(target: "fxserver", command, "System command");
    }
}

/// Everything the supervisor depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub logger: Arc<dyn ConsoleLogger>,
    pub validator: Arc<dyn ConfigValidator>,
    pub health_monitor: Arc<dyn HealthMonitor>,
    pub scheduler: Arc<dyn Scheduler>,
    pub resources: Arc<dyn ResourceTracker>,
    pub playerlist: Arc<dyn Playerlist>,
    pub metrics: Arc<dyn Metrics>,
    pub announcer: Arc<dyn Announcer>,
    pub dashboard: Arc<dyn Dashboard>,
    pub cache: Arc<dyn SharedCache>,
    pub actions: Arc<dyn ActionStore>,
    pub bridge: Arc<dyn CommandBridge>,
}

impl Collaborators {
    /// No-op collaborators with console output mirrored into `tracing`.
    pub fn detached() -> Self {
        let detached = Arc::new(Detached);
        Self {
            logger: Arc::new(TracingConsoleLogger),
            validator: detached.clone(),
            health_monitor: detached.clone(),
            scheduler: detached.clone(),
            resources: detached.clone(),
            playerlist: detached.clone(),
            metrics: detached.clone(),
            announcer: detached.clone(),
            dashboard: detached.clone(),
            cache: detached.clone(),
            actions: detached.clone(),
            bridge: detached,
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::detached()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
