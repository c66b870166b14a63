//! Configuration module for FX Runner.
//!
//! This module handles parsing, validation, and access to the supervisor's
//! settings. It supports loading configurations from files or strings in
//! JSON format.
//!
//! This is the supervisor's own configuration. Validation of the game
//! server's `server.cfg` is delegated to a [`ConfigValidator`](crate::collaborators::ConfigValidator)
//! collaborator at spawn time.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use fxrunner::config::{SupervisorConfig, validate_config};
//!
//! let config = SupervisorConfig::from_file("fxrunner.json").unwrap();
//! validate_config(&config).unwrap();
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use fxrunner::config::{ServerConfig, SupervisorConfig};
//! use std::collections::HashMap;
//!
//! let mut config = SupervisorConfig::new(ServerConfig {
//!     command: "/opt/fxserver/run.sh".to_string(),
//!     args: vec![],
//!     env: HashMap::new(),
//!     data_path: Some("/srv/server-data".into()),
//!     cfg_path: Some("/srv/server-data/server.cfg".into()),
//! });
//! config.shutdown_notice_delay_ms = 10_000;
//! ```
mod parser;
pub mod validator;

pub use parser::{BackoffConfig, ServerConfig, SupervisorConfig};
pub use validator::validate_config;
