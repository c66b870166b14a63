use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to launch the supervised server process.
///
/// # Examples
///
/// ```
/// use fxrunner::config::ServerConfig;
/// use std::collections::HashMap;
///
/// let server_config = ServerConfig {
///     command: "/opt/fxserver/run.sh".to_string(),
///     args: vec!["+set".to_string(), "onesync".to_string(), "on".to_string()],
///     env: HashMap::new(),
///     data_path: Some("/srv/server-data".into()),
///     cfg_path: Some("/srv/server-data/server.cfg".into()),
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Executable to launch.
    /// This can be an absolute path or a command available in the PATH.
    pub command: String,

    /// Extra command-line arguments, placed before `+exec <cfgPath>`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set when launching the server.
    /// These will be combined with the current environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Server data directory; the process runs with it as working directory.
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    /// Server cfg file executed on boot.
    #[serde(default)]
    pub cfg_path: Option<PathBuf>,
}

/// Spawn backoff applied after the server reports a busy port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Increment applied on each detected bind failure.
    #[serde(default = "default_backoff_step_ms")]
    pub step_ms: u64,
    /// Upper bound for the accumulated delay.
    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            step_ms: default_backoff_step_ms(),
            cap_ms: default_backoff_cap_ms(),
        }
    }
}

/// Main configuration for the supervisor.
///
/// # JSON Schema
///
/// ```json
/// {
///   "serverName": "my-server",
///   "server": {
///     "command": "/opt/fxserver/run.sh",
///     "args": [],
///     "env": {},
///     "dataPath": "/srv/server-data",
///     "cfgPath": "/srv/server-data/server.cfg"
///   },
///   "shutdownNoticeDelayMs": 5000,
///   "restartSpawnDelayMs": 500,
///   "backoff": { "stepMs": 5000, "capMs": 45000 },
///   "instantCrashThresholdMs": 5000,
///   "historyLimit": 50,
///   "watchdogLogDelayMs": 250,
///   "eventCommand": "txaEvent"
/// }
/// ```
///
/// Everything except `server.command` is optional.
///
/// # Examples
///
/// ```no_run
/// use fxrunner::config::SupervisorConfig;
///
/// let config = SupervisorConfig::from_file("fxrunner.json").unwrap();
/// println!("Supervising {}", config.server.command);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Display name used in announcements.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Process launch settings.
    pub server: ServerConfig,

    /// How long players are warned before the process is killed.
    #[serde(default = "default_shutdown_notice_delay_ms")]
    pub shutdown_notice_delay_ms: u64,

    /// Minimum wait between kill and respawn during a restart.
    #[serde(default = "default_restart_spawn_delay_ms")]
    pub restart_spawn_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Processes exiting within this uptime are reported as failed boots.
    #[serde(default = "default_instant_crash_threshold_ms")]
    pub instant_crash_threshold_ms: u64,

    /// Number of past process snapshots kept in history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Delay before a watchdog bark is logged, letting the server's own output settle.
    #[serde(default = "default_watchdog_log_delay_ms")]
    pub watchdog_log_delay_ms: u64,

    /// Command the server resource listens on for supervisor events.
    #[serde(default = "default_event_command")]
    pub event_command: String,
}

fn default_server_name() -> String {
    "server".to_string()
}

fn default_shutdown_notice_delay_ms() -> u64 {
    5_000
}

fn default_restart_spawn_delay_ms() -> u64 {
    500
}

fn default_backoff_step_ms() -> u64 {
    5_000
}

fn default_backoff_cap_ms() -> u64 {
    45_000
}

fn default_instant_crash_threshold_ms() -> u64 {
    5_000
}

fn default_history_limit() -> usize {
    50
}

fn default_watchdog_log_delay_ms() -> u64 {
    250
}

fn default_event_command() -> String {
    "txaEvent".to_string()
}

impl SupervisorConfig {
    /// Builds a configuration with default timings around the given server settings.
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server_name: default_server_name(),
            server,
            shutdown_notice_delay_ms: default_shutdown_notice_delay_ms(),
            restart_spawn_delay_ms: default_restart_spawn_delay_ms(),
            backoff: BackoffConfig::default(),
            instant_crash_threshold_ms: default_instant_crash_threshold_ms(),
            history_limit: default_history_limit(),
            watchdog_log_delay_ms: default_watchdog_log_delay_ms(),
            event_command: default_event_command(),
        }
    }

    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The string is not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    pub fn shutdown_notice_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_notice_delay_ms)
    }

    pub fn restart_spawn_delay(&self) -> Duration {
        Duration::from_millis(self.restart_spawn_delay_ms)
    }

    pub fn instant_crash_threshold(&self) -> Duration {
        Duration::from_millis(self.instant_crash_threshold_ms)
    }

    pub fn watchdog_log_delay(&self) -> Duration {
        Duration::from_millis(self.watchdog_log_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config_str = r#"{
            "server": {
                "command": "/opt/fxserver/run.sh"
            }
        }"#;

        let config = SupervisorConfig::parse_from_str(config_str).unwrap();

        assert_eq!(config.server.command, "/opt/fxserver/run.sh");
        assert!(config.server.args.is_empty());
        assert!(config.server.data_path.is_none());
        assert_eq!(config.shutdown_notice_delay(), Duration::from_secs(5));
        assert_eq!(config.backoff.step_ms, 5_000);
        assert_eq!(config.backoff.cap_ms, 45_000);
        assert_eq!(config.event_command, "txaEvent");
    }
}
