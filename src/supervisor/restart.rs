use super::{CommandAuthor, Deadline, DeadlineOutcome, PendingFlag, Supervisor, lock};
use crate::collaborators::Announcement;
use crate::error::{Error, Result};
use serde_json::json;

/// Event type announcing an imminent shutdown to server-side scripts.
pub(super) const EVENT_SHUTTING_DOWN: &str = "serverShuttingDown";

impl Supervisor {
    /// Stop the current server process and archive it into history.
    ///
    /// A live process first gets a shutdown notice and the configured grace
    /// delay; a dead one is archived straight away. Without a process this
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] while another kill is waiting out its notice delay.
    #[tracing::instrument(skip(self), fields(author = %author))]
    pub async fn kill_server(
        &self,
        reason: &str,
        author: &CommandAuthor,
        is_restarting: bool,
    ) -> Result<()> {
        let needs_notice = {
            let mut state = lock(&self.state);
            let Some(child) = state.child.as_ref() else {
                tracing::debug!("No server process to kill");
                return Ok(());
            };
            if state.awaiting_shutdown_notice {
                return Err(Error::Busy(
                    "Server shutdown already in progress, please wait.".to_string(),
                ));
            }
            let alive = child.is_alive();
            state.awaiting_shutdown_notice = alive;
            alive
        };

        let pending = needs_notice.then(|| PendingFlag::shutdown_notice(&self.state));
        if needs_notice {
            self.send_shutdown_notice(reason, author).await;
        }

        let Some(child) = lock(&self.state).child.take() else {
            return Ok(());
        };
        child.destroy();
        let record = child.state_info();
        lock(&self.state).history.push(record.clone());
        drop(pending);

        self.collaborators.scheduler.handle_server_close();
        self.collaborators.resources.handle_server_close();
        self.collaborators.playerlist.handle_server_close();
        self.collaborators.metrics.handle_server_close();
        self.collaborators
            .announcer
            .send_announcement(Announcement::Stopped {
                server_name: self.config.server_name.clone(),
                reason: reason.to_string(),
                author: author.to_string(),
                is_restarting,
            });

        tracing::info!(
            pid = record.pid,
            uptime_ms = record.uptime,
            is_restarting,
            "Server process killed"
        );
        Ok(())
    }

    async fn send_shutdown_notice(&self, reason: &str, author: &CommandAuthor) {
        let delay = self.config.shutdown_notice_delay();
        let notice = json!({
            "delay": delay.as_millis() as u64,
            "author": author.to_string(),
            "message": reason,
        });
        match self.send_event(EVENT_SHUTTING_DOWN, notice).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Shutdown notice not delivered"),
            Err(e) => tracing::warn!(error = %e, "Failed to send shutdown notice"),
        }

        if Deadline::after(delay).wait(&self.shutdown).await == DeadlineOutcome::Cancelled {
            tracing::info!("Shutdown notice cut short");
        }
    }

    /// Kill the server, wait out the restart delay, then spawn again.
    ///
    /// The delay is the configured one, or the bind-failure backoff when larger.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] while another restart is waiting to respawn, or a
    ///   kill is in progress.
    /// - [`Error::ShuttingDown`] if shutdown begins during the delay.
    /// - Any error from [`spawn`](Self::spawn).
    #[tracing::instrument(skip(self), fields(author = %author))]
    pub async fn restart_server(&self, reason: &str, author: &CommandAuthor) -> Result<()> {
        self.check_no_pending_restart()?;
        self.kill_server(reason, author, true).await?;

        let delay = self.restart_spawn_delay();
        let deadline = Deadline::after(delay.delay);
        let pending = {
            let mut state = lock(&self.state);
            if let Some(existing) = state.awaiting_restart_delay {
                return Err(pending_restart_error(existing));
            }
            state.awaiting_restart_delay = Some(deadline);
            PendingFlag::restart_delay(&self.state)
        };

        if delay.is_backoff {
            tracing::warn!(
                delay_ms = delay.delay.as_millis() as u64,
                "Delaying respawn, the server failed to bind its port"
            );
        }
        let outcome = deadline.wait(&self.shutdown).await;
        drop(pending);
        if outcome == DeadlineOutcome::Cancelled {
            return Err(Error::ShuttingDown);
        }

        self.spawn(false).await
    }

    fn check_no_pending_restart(&self) -> Result<()> {
        match lock(&self.state).awaiting_restart_delay {
            Some(deadline) => Err(pending_restart_error(deadline)),
            None => Ok(()),
        }
    }
}

fn pending_restart_error(deadline: Deadline) -> Error {
    let seconds = deadline.remaining().as_secs_f64().ceil() as u64;
    Error::Busy(format!(
        "A restart is already pending, please wait {} more second(s).",
        seconds.max(1)
    ))
}
