use fxrunner::config::{SupervisorConfig, validate_config};
use fxrunner::error::{Error, Result};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_parse_config() -> Result<()> {
    let config_str = r#"{
        "serverName": "Los Santos RP",
        "server": {
            "command": "/opt/fxserver/run.sh",
            "args": ["+set", "sv_enforceGameBuild", "2944"],
            "env": {"TZ": "UTC"},
            "dataPath": "/srv/server-data",
            "cfgPath": "/srv/server-data/server.cfg"
        },
        "shutdownNoticeDelayMs": 10000,
        "backoff": {"stepMs": 2000}
    }"#;

    let config = SupervisorConfig::parse_from_str(config_str)?;

    assert_eq!(config.server_name, "Los Santos RP");
    assert_eq!(config.server.command, "/opt/fxserver/run.sh");
    assert_eq!(config.server.args, vec!["+set", "sv_enforceGameBuild", "2944"]);
    assert_eq!(config.server.env["TZ"], "UTC");
    assert_eq!(config.server.data_path, Some(PathBuf::from("/srv/server-data")));
    assert_eq!(
        config.server.cfg_path,
        Some(PathBuf::from("/srv/server-data/server.cfg"))
    );
    assert_eq!(config.shutdown_notice_delay(), Duration::from_secs(10));
    assert_eq!(config.backoff.step_ms, 2_000);
    assert_eq!(config.backoff.cap_ms, 45_000);

    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_defaults() -> Result<()> {
    let config = SupervisorConfig::parse_from_str(r#"{"server": {"command": "FXServer"}}"#)?;

    assert!(config.server.args.is_empty());
    assert!(config.server.data_path.is_none());
    assert_eq!(config.shutdown_notice_delay(), Duration::from_millis(5_000));
    assert_eq!(config.restart_spawn_delay(), Duration::from_millis(500));
    assert_eq!(config.instant_crash_threshold(), Duration::from_millis(5_000));
    assert_eq!(config.watchdog_log_delay(), Duration::from_millis(250));
    assert_eq!(config.history_limit, 50);
    assert_eq!(config.event_command, "txaEvent");

    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_load_from_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"server": {{"command": "FXServer", "cfgPath": "server.cfg"}}, "historyLimit": 3}}"#
    )
    .unwrap();

    let config = SupervisorConfig::from_file(file.path())?;
    assert_eq!(config.history_limit, 3);
    assert_eq!(config.server.cfg_path, Some(PathBuf::from("server.cfg")));
    Ok(())
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = SupervisorConfig::from_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_invalid_json() {
    let result = SupervisorConfig::parse_from_str(r#"{"server": {"command": "FXServer""#);
    assert!(matches!(result, Err(Error::ConfigParse(_))));

    let result = SupervisorConfig::parse_from_str(r#"{"serverName": "no server block"}"#);
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_validation_rejects_bad_values() -> Result<()> {
    let base = SupervisorConfig::parse_from_str(r#"{"server": {"command": "FXServer"}}"#)?;

    let mut blank_command = base.clone();
    blank_command.server.command = "  ".to_string();
    assert!(matches!(validate_config(&blank_command), Err(Error::ConfigInvalid(_))));

    let mut zero_step = base.clone();
    zero_step.backoff.step_ms = 0;
    assert!(matches!(validate_config(&zero_step), Err(Error::ConfigInvalid(_))));

    let mut low_cap = base.clone();
    low_cap.backoff.cap_ms = low_cap.backoff.step_ms - 1;
    assert!(matches!(validate_config(&low_cap), Err(Error::ConfigInvalid(_))));

    let mut no_history = base.clone();
    no_history.history_limit = 0;
    assert!(matches!(validate_config(&no_history), Err(Error::ConfigInvalid(_))));

    let mut bad_event = base;
    bad_event.event_command = "txa Event".to_string();
    assert!(matches!(validate_config(&bad_event), Err(Error::ConfigInvalid(_))));
    Ok(())
}
