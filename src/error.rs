/// Error handling module for FX Runner.
///
/// This module defines the error types used throughout the library.
/// Every public supervisor operation reports failure through [`Error`], whose
/// `Display` output is the human-readable message shown to operators.
///
/// # Example
///
/// ```
/// use fxrunner::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::Busy(msg)) => println!("Try again later: {}", msg),
///         Err(Error::ConfigValidation(msg)) => println!("Fix your server.cfg: {}", msg),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the fxrunner library.
///
/// Each variant includes context information to help diagnose and handle the
/// error appropriately.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON is malformed
    /// - Required fields are missing
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration is valid JSON but contains invalid values.
    ///
    /// This error occurs when:
    /// - The server command is empty
    /// - The data path or cfg path required for spawning is not set
    /// - Backoff bounds are inconsistent
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The server cfg file was rejected by the config validator.
    ///
    /// The message is the validator's output, passed through verbatim.
    #[error("{0}")]
    ConfigValidation(String),

    /// Another kill or restart is already in flight.
    #[error("{0}")]
    Busy(String),

    /// The server process is already running.
    ///
    /// This error occurs when:
    /// - Attempting to spawn while a child process is still registered
    #[error("The server is already running.")]
    AlreadyRunning,

    /// The whole application is shutting down; no new work is accepted.
    #[error("The application is shutting down.")]
    ShuttingDown,

    /// A command or argument is malformed.
    ///
    /// This is a programming error on the caller's side:
    /// - Empty command name
    /// - Command name with characters outside `[A-Za-z0-9_]`
    /// - Non-string value handed to the argument sanitizer
    /// - Raw command containing a line break
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error when launching or controlling the server process.
    ///
    /// This error occurs when:
    /// - The process fails to start
    /// - The process has no writable stdin
    /// - Session metadata is incomplete
    #[error("Server process error: {0}")]
    Process(String),

    /// Error in communication with the server process.
    ///
    /// This error occurs when:
    /// - Writing to the process stdin fails
    /// - A pipe is closed unexpectedly
    #[error("Communication error: {0}")]
    Communication(String),

    /// An event stream frame was malformed or belonged to a previous session.
    #[error("Event frame error: {0}")]
    Frame(String),
}

/// Result type for fxrunner operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module.
pub type Result<T> = std::result::Result<T, Error>;
