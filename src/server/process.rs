// src/server/process.rs
use crate::error::{Error, Result};
use crate::server::lifecycle::LifecycleSignal;
use async_process::{Child, Stdio};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Environment variable carrying the session token into the server process.
pub const MUTEX_ENV: &str = "FXRUNNER_MUTEX";

/// Writable end of the server's stdin.
pub type CommandWriter = Box<dyn futures_lite::AsyncWrite + Send + Unpin>;

/// Readable output stream (stdout, stderr or the event side channel).
pub type OutputReader = Box<dyn futures_lite::AsyncRead + Send + Unpin>;

/// Requests termination of a running process.
pub trait ProcessControl: Send {
    /// Ask the OS to kill the process. Failing is not fatal to the caller.
    fn terminate(&mut self) -> io::Result<()>;
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
    /// Session token, exported as [`MUTEX_ENV`].
    pub mutex: String,
}

/// A freshly launched process and everything needed to supervise it.
pub struct LaunchedProcess {
    pub pid: Option<u32>,
    pub stdin: Option<CommandWriter>,
    pub stdout: Option<OutputReader>,
    pub stderr: Option<OutputReader>,
    /// Structured event side channel, if the platform supports it.
    pub events: Option<OutputReader>,
    pub control: Box<dyn ProcessControl>,
    /// Exit and termination errors, in order. Close is derived by the consumer.
    pub lifecycle: mpsc::UnboundedReceiver<LifecycleSignal>,
}

/// Starts server processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: LaunchSpec) -> Result<LaunchedProcess>;
}

/// Launches real OS processes with stdin/stdout/stderr pipes plus an event
/// pipe on fd 3.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl ProcessLauncher for OsLauncher {
    #[tracing::instrument(skip(self, spec), fields(command = %spec.command))]
    fn launch(&self, spec: LaunchSpec) -> Result<LaunchedProcess> {
        let mut command = std::process::Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .env(MUTEX_ENV, &spec.mutex)
            .current_dir(&spec.working_dir);

        #[cfg(unix)]
        let side_channel = {
            let channel = side_channel::open()
                .map_err(|e| Error::Process(format!("Failed to create event pipe: {}", e)))?;
            side_channel::install_on(&mut command, &channel);
            channel
        };
        #[cfg(not(unix))]
        tracing::warn!("Event side channel is not supported on this platform");

        let mut command = async_process::Command::from(command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start process: {}", e)))?;

        #[cfg(unix)]
        let events = {
            let side_channel::SideChannel { read, write } = side_channel;
            // The child holds its own copy; ours must go for EOF to ever arrive.
            drop(write);
            match side_channel::spawn_reader(read) {
                Ok(reader) => Some(reader),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to start event stream reader");
                    None
                }
            }
        };
        #[cfg(not(unix))]
        let events: Option<OutputReader> = None;

        let pid = Some(child.id());
        let stdin = child
            .stdin
            .take()
            .map(|s| Box::new(s) as CommandWriter);
        let stdout = child
            .stdout
            .take()
            .map(|s| Box::new(s) as OutputReader);
        let stderr = child
            .stderr
            .take()
            .map(|s| Box::new(s) as OutputReader);

        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(watch_child(child, kill_rx, signal_tx));

        tracing::debug!(pid = ?pid, "Process launched");
        Ok(LaunchedProcess {
            pid,
            stdin,
            stdout,
            stderr,
            events,
            control: Box::new(KillSwitch { requests: kill_tx }),
            lifecycle: signal_rx,
        })
    }
}

/// Forwards termination requests to the task that owns the OS child.
struct KillSwitch {
    requests: mpsc::UnboundedSender<()>,
}

impl ProcessControl for KillSwitch {
    fn terminate(&mut self) -> io::Result<()> {
        self.requests.send(()).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "process has already been reaped")
        })
    }
}

/// Owns the child until it exits, killing it on request.
async fn watch_child(
    mut child: Child,
    mut kill_requests: mpsc::UnboundedReceiver<()>,
    signals: mpsc::UnboundedSender<LifecycleSignal>,
) {
    let status = child.status();
    tokio::pin!(status);

    let mut accepting_kills = true;
    let mut kill_sent = false;
    let result = loop {
        tokio::select! {
            result = &mut status => break result,
            request = kill_requests.recv(), if accepting_kills => match request {
                Some(()) => {
                    kill_sent = true;
                    if let Err(e) = child.kill() {
                        let _ = signals.send(LifecycleSignal::Error(e.to_string()));
                    }
                }
                None => {
                    accepting_kills = false;
                    // Control dropped without a kill: nothing can stop this process anymore.
                    if !kill_sent {
                        tracing::warn!(pid = child.id(), "Process control dropped, killing process");
                        if let Err(e) = child.kill() {
                            let _ = signals.send(LifecycleSignal::Error(e.to_string()));
                        }
                    }
                }
            },
        }
    };

    let code = match result {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to wait for process exit");
            None
        }
    };
    let _ = signals.send(LifecycleSignal::Exit { code });
}

#[cfg(unix)]
mod side_channel {
    use super::OutputReader;
    use futures::TryStreamExt;
    use std::io::{self, Read};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::os::unix::process::CommandExt;

    /// Descriptor number the server writes its events to.
    pub(super) const CHILD_FD: RawFd = 3;

    const READ_CHUNK: usize = 16 * 1024;

    pub(super) struct SideChannel {
        pub read: OwnedFd,
        pub write: OwnedFd,
    }

    /// Opens a close-on-exec pipe.
    pub(super) fn open() -> io::Result<SideChannel> {
        let mut fds: [libc::c_int; 2] = [-1, -1];

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };

        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe just handed us two fresh descriptors we now own.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            set_cloexec(read.as_raw_fd(), true)?;
            set_cloexec(write.as_raw_fd(), true)?;
        }

        Ok(SideChannel { read, write })
    }

    fn set_cloexec(fd: RawFd, enabled: bool) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        let flags = if enabled {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn set_parent_death_signal() -> io::Result<()> {
        if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn set_parent_death_signal() -> io::Result<()> {
        Ok(())
    }

    /// Maps the write end onto [`CHILD_FD`] in the forked child.
    pub(super) fn install_on(command: &mut std::process::Command, channel: &SideChannel) {
        let write_fd = channel.write.as_raw_fd();
        // SAFETY: only async-signal-safe calls (prctl, dup2, fcntl) run between fork and exec.
        unsafe {
            command.pre_exec(move || {
                set_parent_death_signal()?;
                if write_fd == CHILD_FD {
                    // dup2 onto itself keeps CLOEXEC set.
                    set_cloexec(CHILD_FD, false)
                } else if libc::dup2(write_fd, CHILD_FD) == -1 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(())
                }
            });
        }
    }

    /// Pumps the read end on a dedicated thread and exposes it as an async reader.
    pub(super) fn spawn_reader(read: OwnedFd) -> io::Result<OutputReader> {
        let (tx, rx) = futures::channel::mpsc::unbounded::<io::Result<Vec<u8>>>();
        let mut file = std::fs::File::from(read);

        std::thread::Builder::new()
            .name("fxrunner-events".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; READ_CHUNK];
                loop {
                    match file.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.unbounded_send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            let _ = tx.unbounded_send(Err(e));
                            break;
                        }
                    }
                }
            })?;

        Ok(Box::new(rx.into_async_read()))
    }
}
