use anyhow::Context;
use fxrunner::{Collaborators, CommandAuthor, Supervisor, SupervisorConfig};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

/// Extra time granted on Ctrl+C beyond the shutdown notice delay.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs one server under supervision, forwarding stdin lines to its console.
///
/// Lines starting with `!` are supervisor directives: `!restart`, `!stop`,
/// `!start` and `!status`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "fxrunner.json".to_string());
    let config = SupervisorConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;
    let hard_limit = config.shutdown_notice_delay() + SHUTDOWN_GRACE;

    let supervisor = Supervisor::new(config, Collaborators::detached())?;
    supervisor.spawn(true).await.context("starting the server")?;

    let operator = CommandAuthor::from("console");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // One listener for the whole loop; directives like `!restart` wait too.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let Some(line) = unless_interrupted(lines.next_line(), ctrl_c.as_mut()).await else {
            tracing::info!("Ctrl+C received");
            break;
        };
        let Some(line) = line.context("reading stdin")? else {
            break;
        };
        if unless_interrupted(handle_line(&supervisor, line.trim(), &operator), ctrl_c.as_mut())
            .await
            .is_none()
        {
            tracing::info!("Ctrl+C received, abandoning the current directive");
            break;
        }
    }

    supervisor.begin_shutdown();
    match tokio::time::timeout(
        hard_limit,
        supervisor.kill_server("Host shutting down", &CommandAuthor::System, false),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => tracing::error!("Timed out stopping the server"),
    }
    Ok(())
}

/// Runs `work` unless `interrupt` completes first, in which case `None` is returned.
async fn unless_interrupted<T, I>(work: impl Future<Output = T>, interrupt: Pin<&mut I>) -> Option<T>
where
    I: Future,
{
    tokio::select! {
        output = work => Some(output),
        _ = interrupt => None,
    }
}

async fn handle_line(supervisor: &Supervisor, line: &str, operator: &CommandAuthor) {
    if line.is_empty() {
        return;
    }

    let result = match line {
        "!restart" => supervisor.restart_server("Restart requested", operator).await,
        "!stop" => supervisor.kill_server("Stop requested", operator, false).await,
        "!start" => supervisor.spawn(true).await,
        "!status" => {
            match supervisor.child_state_info() {
                Some(info) => tracing::info!(
                    pid = info.pid,
                    state = %info.state,
                    uptime_ms = info.uptime,
                    "Server status"
                ),
                None => tracing::info!("No server process"),
            }
            Ok(())
        }
        command => match supervisor.send_raw_command(command, operator).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!("Server is not running, command dropped");
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_cuts_long_work_short() {
        let interrupt = tokio::time::sleep(Duration::from_millis(10));
        tokio::pin!(interrupt);

        let started = std::time::Instant::now();
        let result = unless_interrupted(
            tokio::time::sleep(Duration::from_secs(5)),
            interrupt.as_mut(),
        )
        .await;
        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_interrupt_persists_across_iterations() {
        let interrupt = tokio::time::sleep(Duration::from_millis(50));
        tokio::pin!(interrupt);

        let quick = unless_interrupted(async { 7 }, interrupt.as_mut()).await;
        assert_eq!(quick, Some(7));

        let slow = unless_interrupted(
            tokio::time::sleep(Duration::from_secs(5)),
            interrupt.as_mut(),
        )
        .await;
        assert!(slow.is_none());
    }
}
