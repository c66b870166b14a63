use crate::error::{Error, Result};
use crate::server::lifecycle::{
    ChildProcessRecord, ChildProcessState, LifecycleSignal, Timestamps, now_ms,
};
use crate::server::process::{CommandWriter, ProcessControl};
use futures_lite::io::AsyncWriteExt;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Invoked whenever the derived status may have changed.
pub type StatusCallback = Arc<dyn Fn(ChildProcessState) + Send + Sync>;

/// Invoked once when the process exits, with its exit code if any.
pub type ExitCallback = Box<dyn FnOnce(Option<i32>) + Send>;

/// Delay before the failed-boot diagnostic, so it lands after the crash output.
const BOOT_FAILURE_LOG_DELAY: Duration = Duration::from_millis(500);

/// Identity and callbacks attached to a process at spawn time.
#[derive(Clone)]
pub struct SessionMeta {
    pub mutex: String,
    pub net_endpoint: String,
    pub on_status_update: StatusCallback,
    /// Exits within this uptime are reported as failed boots.
    pub instant_crash_threshold: Duration,
}

impl fmt::Debug for SessionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMeta")
            .field("mutex", &self.mutex)
            .field("net_endpoint", &self.net_endpoint)
            .field("instant_crash_threshold", &self.instant_crash_threshold)
            .finish_non_exhaustive()
    }
}

/// Parts of a launched process the handle takes ownership of.
pub struct ProcessParts {
    pub pid: Option<u32>,
    pub stdin: Option<CommandWriter>,
    pub control: Box<dyn ProcessControl>,
}

struct HandleState {
    ts: Timestamps,
    /// `None` once the process has been released.
    control: Option<Box<dyn ProcessControl>>,
    on_exit: Option<ExitCallback>,
}

impl HandleState {
    fn status(&self) -> ChildProcessState {
        if self.control.is_none() {
            ChildProcessState::Destroyed
        } else if self.ts.exit.is_some() {
            ChildProcessState::Exited
        } else {
            ChildProcessState::Alive
        }
    }
}

struct HandleInner {
    pid: u32,
    mutex: String,
    net_endpoint: String,
    on_status_update: StatusCallback,
    instant_crash_threshold: Duration,
    state: Mutex<HandleState>,
    stdin: tokio::sync::Mutex<Option<CommandWriter>>,
}

/// A single supervised OS process.
///
/// Status is derived from what has been observed: `Alive` until an exit is
/// reported, `Exited` until the handle is released, then `Destroyed`.
/// Lifecycle signals are fed through [`handle_signal`](Self::handle_signal)
/// by the task consuming the process' lifecycle channel.
///
/// Cloning is cheap; clones share the same process.
#[derive(Clone)]
pub struct ChildProcessHandle {
    inner: Arc<HandleInner>,
}

impl ChildProcessHandle {
    /// Wraps a launched process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] if the process has no pid or no writable
    /// stdin, or if the session token or network endpoint is empty.
    pub fn new(parts: ProcessParts, meta: SessionMeta) -> Result<Self> {
        let pid = parts
            .pid
            .ok_or_else(|| Error::Process("Process has no pid".to_string()))?;
        let stdin = parts
            .stdin
            .ok_or_else(|| Error::Process("Process stdin is not writable".to_string()))?;
        if meta.mutex.is_empty() {
            return Err(Error::Process("Session mutex is missing".to_string()));
        }
        if meta.net_endpoint.is_empty() {
            return Err(Error::Process("Network endpoint is missing".to_string()));
        }

        Ok(Self {
            inner: Arc::new(HandleInner {
                pid,
                mutex: meta.mutex,
                net_endpoint: meta.net_endpoint,
                on_status_update: meta.on_status_update,
                instant_crash_threshold: meta.instant_crash_threshold,
                state: Mutex::new(HandleState {
                    ts: Timestamps::started_now(),
                    control: Some(parts.control),
                    on_exit: None,
                }),
                stdin: tokio::sync::Mutex::new(Some(stdin)),
            }),
        })
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Session token minted for this process.
    pub fn mutex(&self) -> &str {
        &self.inner.mutex
    }

    pub fn net_endpoint(&self) -> &str {
        &self.inner.net_endpoint
    }

    pub fn status(&self) -> ChildProcessState {
        self.lock_state().status()
    }

    pub fn is_alive(&self) -> bool {
        self.status() == ChildProcessState::Alive
    }

    pub fn uptime(&self) -> Duration {
        self.lock_state().ts.uptime_at(now_ms())
    }

    /// Snapshot of identity, timestamps and derived fields.
    pub fn state_info(&self) -> ChildProcessRecord {
        let state = self.lock_state();
        let status = state.status();
        ChildProcessRecord {
            pid: self.inner.pid,
            mutex: self.inner.mutex.clone(),
            net_endpoint: self.inner.net_endpoint.clone(),
            ts_start: state.ts.start,
            ts_kill: state.ts.kill,
            ts_exit: state.ts.exit,
            ts_close: state.ts.close,
            state: status,
            is_alive: status == ChildProcessState::Alive,
            uptime: state.ts.uptime_at(now_ms()).as_millis() as u64,
        }
    }

    /// Registers the callback run when the process exits. Replaces any previous one.
    pub fn on_exit(&self, callback: impl FnOnce(Option<i32>) + Send + 'static) {
        self.lock_state().on_exit = Some(Box::new(callback));
    }

    /// Writes one line to the process stdin, appending the newline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Communication`] if stdin is gone or the write fails.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.inner.stdin.lock().await;
        let writer = stdin
            .as_mut()
            .ok_or_else(|| Error::Communication("Process stdin is closed".to_string()))?;

        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        writer
            .write_all(&data)
            .await
            .map_err(|e| Error::Communication(format!("Failed to write to stdin: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Communication(format!("Failed to flush stdin: {}", e)))?;
        Ok(())
    }

    /// Applies a lifecycle transition reported by the OS process.
    pub fn handle_signal(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Exit { code } => self.handle_exit(code),
            LifecycleSignal::Close => self.handle_close(),
            LifecycleSignal::Error(message) => {
                tracing::warn!(pid = self.inner.pid, error = %message, "Process termination error");
            }
        }
    }

    fn handle_exit(&self, code: Option<i32>) {
        let (callback, uptime) = {
            let mut state = self.lock_state();
            if state.ts.exit.is_some() {
                tracing::debug!(pid = self.inner.pid, "Duplicate exit signal ignored");
                return;
            }
            state.ts.exit = Some(now_ms());
            (state.on_exit.take(), state.ts.uptime_at(now_ms()))
        };

        tracing::info!(pid = self.inner.pid, code = ?code, "Server process exited");
        if let Some(callback) = callback {
            callback(code);
        }
        self.notify_status();

        if uptime <= self.inner.instant_crash_threshold {
            let pid = self.inner.pid;
            let report = move || {
                tracing::error!(
                    pid,
                    uptime_ms = uptime.as_millis() as u64,
                    "Server process didn't start. This is not a supervisor issue, check the output above."
                );
            };
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        tokio::time::sleep(BOOT_FAILURE_LOG_DELAY).await;
                        report();
                    });
                }
                Err(_) => report(),
            }
        }
    }

    fn handle_close(&self) {
        let exited = {
            let mut state = self.lock_state();
            let exited = state.ts.exit.is_some();
            if exited {
                state.ts.close = Some(now_ms());
            }
            exited
        };

        if !exited {
            tracing::warn!(pid = self.inner.pid, "Close reported before exit; applying exit first");
            self.handle_exit(None);
            self.lock_state().ts.close = Some(now_ms());
        }

        tracing::debug!(pid = self.inner.pid, "Server process pipes closed");
        self.destroy();
    }

    /// Releases the process, asking the OS to terminate it.
    ///
    /// Idempotent: only the first call records the kill time. Termination
    /// failures are logged and swallowed.
    pub fn destroy(&self) {
        let mut control = {
            let mut state = self.lock_state();
            let Some(control) = state.control.take() else {
                return;
            };
            state.ts.kill = Some(now_ms());
            control
        };

        if let Err(e) = control.terminate() {
            tracing::debug!(pid = self.inner.pid, error = %e, "Termination request went nowhere");
        }
        drop(control);

        // Drop stdin without waiting on a writer that might be mid-flush.
        if let Ok(mut stdin) = self.inner.stdin.try_lock() {
            stdin.take();
        }

        self.notify_status();
    }

    fn notify_status(&self) {
        let status = self.status();
        (self.inner.on_status_update)(status);
    }

    fn lock_state(&self) -> MutexGuard<'_, HandleState> {
        // State updates never panic midway, so a poisoned lock still holds consistent data.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ChildProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcessHandle")
            .field("pid", &self.inner.pid)
            .field("mutex", &self.inner.mutex)
            .field("status", &self.status())
            .finish()
    }
}
