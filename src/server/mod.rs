/// Process management module for FX Runner.
///
/// This module wraps the supervised OS process: launching it with its pipes,
/// tracking its lifecycle, and the small pieces of state the supervisor keeps
/// around it (spawn backoff, history of past processes).
/// All public components log through `tracing`.
///
/// # Components
///
/// * `process` - Launching OS processes and requesting their termination
/// * `handle` - The per-process handle and its derived status
/// * `lifecycle` - Lifecycle signals, snapshots and history
/// * `backoff` - Spawn delay after port bind failures
///
/// # Examples
///
/// Tracking a process' lifecycle:
///
/// ```no_run
/// use fxrunner::server::{
///     ChildProcessHandle, ChildProcessState, LifecycleSignal, OsLauncher, ProcessLauncher,
///     ProcessParts, SessionMeta, LaunchSpec,
/// };
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn run() -> fxrunner::Result<()> {
/// let launched = OsLauncher.launch(LaunchSpec {
///     command: "sleep".to_string(),
///     args: vec!["60".to_string()],
///     env: HashMap::new(),
///     working_dir: ".".into(),
///     mutex: "abc123".to_string(),
/// })?;
/// let handle = ChildProcessHandle::new(
///     ProcessParts { pid: launched.pid, stdin: launched.stdin, control: launched.control },
///     SessionMeta {
///         mutex: "abc123".to_string(),
///         net_endpoint: "0.0.0.0:30120".to_string(),
///         on_status_update: Arc::new(|status| println!("now {status}")),
///         instant_crash_threshold: Duration::from_secs(5),
///     },
/// )?;
/// assert_eq!(handle.status(), ChildProcessState::Alive);
/// handle.destroy();
/// # Ok(())
/// # }
/// ```
pub mod backoff;
pub mod handle;
pub mod lifecycle;
pub mod process;

pub use backoff::{RestartSpawnDelay, SpawnBackoff};
pub use handle::{ChildProcessHandle, ExitCallback, ProcessParts, SessionMeta, StatusCallback};
pub use lifecycle::{ChildProcessRecord, ChildProcessState, History, LifecycleSignal};
pub use process::{
    CommandWriter, LaunchSpec, LaunchedProcess, MUTEX_ENV, OsLauncher, OutputReader,
    ProcessControl, ProcessLauncher,
};
