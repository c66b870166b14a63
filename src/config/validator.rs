use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::transport::command::is_valid_command_name;

/// Validates the process launch settings
pub fn validate_server_config(config: &SupervisorConfig) -> Result<()> {
    if config.server.command.trim().is_empty() {
        return Err(Error::ConfigInvalid("Server command is empty".to_string()));
    }

    // dataPath/cfgPath are checked when spawning, so a half-configured
    // server can still be loaded and inspected.

    Ok(())
}

/// Validates backoff bounds and the remaining supervisor settings
pub fn validate_supervisor_settings(config: &SupervisorConfig) -> Result<()> {
    if config.backoff.step_ms == 0 {
        return Err(Error::ConfigInvalid(
            "backoff.stepMs must be greater than zero".to_string(),
        ));
    }

    if config.backoff.cap_ms < config.backoff.step_ms {
        return Err(Error::ConfigInvalid(format!(
            "backoff.capMs ({}) must not be lower than backoff.stepMs ({})",
            config.backoff.cap_ms, config.backoff.step_ms
        )));
    }

    if config.history_limit == 0 {
        return Err(Error::ConfigInvalid(
            "historyLimit must be at least 1".to_string(),
        ));
    }

    if !is_valid_command_name(&config.event_command) {
        return Err(Error::ConfigInvalid(format!(
            "eventCommand '{}' is not a valid command name",
            config.event_command
        )));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    validate_server_config(config)?;
    validate_supervisor_settings(config)?;

    Ok(())
}
