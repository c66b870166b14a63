use super::{PendingFlag, Supervisor, lock};
use crate::collaborators::{Announcement, OutputStream};
use crate::error::{Error, Result};
use crate::server::{
    ChildProcessHandle, LaunchSpec, LaunchedProcess, LifecycleSignal, OutputReader, ProcessParts,
    SessionMeta,
};
use crate::transport::{EventStreamDecoder, pump_output};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Pipes of a launched process, handed to the background tasks.
struct ProcessStreams {
    stdout: Option<OutputReader>,
    stderr: Option<OutputReader>,
    events: Option<OutputReader>,
    lifecycle: mpsc::UnboundedReceiver<LifecycleSignal>,
}

impl Supervisor {
    /// Validate the server cfg and start a new server process.
    ///
    /// `announce` controls whether the operator-facing "spawning" announcement is sent.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once shutdown has begun.
    /// - [`Error::AlreadyRunning`] while a process is registered, alive or not,
    ///   or another spawn is in progress.
    /// - [`Error::ConfigInvalid`] if the data or cfg path is unset.
    /// - [`Error::ConfigValidation`] with the validator's message, verbatim.
    /// - [`Error::Process`] if the launch fails.
    #[tracing::instrument(skip(self))]
    pub async fn spawn(&self, announce: bool) -> Result<()> {
        let _reservation = self.reserve_spawn()?;

        let server = &self.config.server;
        let data_path = server
            .data_path
            .clone()
            .ok_or_else(|| Error::ConfigInvalid("Server data path is not set".to_string()))?;
        let cfg_path = server
            .cfg_path
            .clone()
            .ok_or_else(|| Error::ConfigInvalid("Server cfg path is not set".to_string()))?;

        let validation = self
            .collaborators
            .validator
            .validate(&cfg_path, &data_path)
            .await;
        if let Some(errors) = validation.errors {
            tracing::error!(%errors, "Server cfg validation failed");
            return Err(Error::ConfigValidation(errors));
        }
        for warning in &validation.warnings {
            tracing::warn!(%warning, "Server cfg warning");
        }

        self.collaborators.health_monitor.reset_state();
        self.collaborators.playerlist.reset_state();
        if announce {
            self.collaborators
                .announcer
                .send_announcement(Announcement::Spawning {
                    server_name: self.config.server_name.clone(),
                });
        }

        let mutex = new_session_mutex();
        let mut args = server.args.clone();
        args.push("+exec".to_string());
        args.push(cfg_path.to_string_lossy().into_owned());
        let spec = LaunchSpec {
            command: server.command.clone(),
            args,
            env: server.env.clone(),
            working_dir: data_path,
            mutex: mutex.clone(),
        };

        let (handle, streams) = {
            // Validation awaited; shutdown may have begun meanwhile.
            let mut state = lock(&self.state);
            self.check_can_spawn_locked(state.child.is_some())?;

            let LaunchedProcess {
                pid,
                stdin,
                stdout,
                stderr,
                events,
                control,
                lifecycle,
            } = self.launcher.launch(spec)?;

            let dashboard = self.collaborators.dashboard.clone();
            let handle = ChildProcessHandle::new(
                ProcessParts {
                    pid,
                    stdin,
                    control,
                },
                SessionMeta {
                    mutex,
                    net_endpoint: validation.connect_endpoint,
                    on_status_update: Arc::new(move |status| dashboard.push_status_refresh(status)),
                    instant_crash_threshold: self.config.instant_crash_threshold(),
                },
            )?;

            let health_monitor = self.collaborators.health_monitor.clone();
            handle.on_exit(move |code| health_monitor.handle_process_exit(code));

            state.child = Some(handle.clone());
            (
                handle,
                ProcessStreams {
                    stdout,
                    stderr,
                    events,
                    lifecycle,
                },
            )
        };

        self.collaborators.logger.log_spawn(handle.pid());
        tracing::info!(pid = handle.pid(), mutex = handle.mutex(), "Server process started");
        self.supervise(handle, streams);
        Ok(())
    }

    /// Claims the process slot until the returned flag drops.
    fn reserve_spawn(&self) -> Result<PendingFlag<'_>> {
        let mut state = lock(&self.state);
        self.check_can_spawn_locked(state.child.is_some() || state.spawning)?;
        state.spawning = true;
        Ok(PendingFlag::spawning(&self.state))
    }

    fn check_can_spawn_locked(&self, has_child: bool) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        if has_child {
            return Err(Error::AlreadyRunning);
        }
        Ok(())
    }

    /// Starts the output pumps, the event decoder and the lifecycle driver.
    ///
    /// The driver applies signals until the exit, then reports the close
    /// once every pipe has reached EOF.
    fn supervise(&self, handle: ChildProcessHandle, streams: ProcessStreams) {
        let ProcessStreams {
            stdout,
            stderr,
            events,
            mut lifecycle,
        } = streams;

        let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(3);
        for (reader, stream) in [(stdout, OutputStream::Stdout), (stderr, OutputStream::Stderr)] {
            if let Some(reader) = reader {
                let logger = self.collaborators.logger.clone();
                pumps.push(tokio::spawn(async move {
                    pump_output(reader, stream, logger).await;
                }));
            }
        }
        if let Some(events) = events {
            let decoder = EventStreamDecoder::new(
                self.link(),
                self.collaborators.clone(),
                self.config.watchdog_log_delay(),
            );
            pumps.push(tokio::spawn(decoder.run(events)));
        }

        tokio::spawn(async move {
            while let Some(signal) = lifecycle.recv().await {
                let exited = matches!(signal, LifecycleSignal::Exit { .. });
                handle.handle_signal(signal);
                if exited {
                    break;
                }
            }
            for pump in pumps {
                if let Err(e) = pump.await {
                    tracing::warn!(pid = handle.pid(), error = %e, "Output pump task failed");
                }
            }
            handle.handle_signal(LifecycleSignal::Close);
        });
    }
}

fn new_session_mutex() -> String {
    Uuid::new_v4().simple().to_string()
}
