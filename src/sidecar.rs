use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

pub const STARTUP_GRACE: Duration = Duration::from_secs(3);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Optional companion process started alongside the server.
///
/// Lives independently of any research request. Its stdout is discarded
/// so it can never interleave with stdio framing.
pub struct Sidecar {
    command_line: String,
    child: Option<Child>,
}

impl Sidecar {
    /// Spawn the command and give it `grace` to come up. A process that has
    /// already exited by then counts as a failed start.
    pub async fn start(command_line: &str, grace: Duration) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().context("sidecar command line is empty")?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn sidecar '{}'", command_line))?;

        tokio::time::sleep(grace).await;

        if let Some(status) = child.try_wait()? {
            bail!("sidecar '{}' exited during startup: {}", command_line, status);
        }

        info!("🧩 Sidecar started: {} (pid {:?})", command_line, child.id());
        Ok(Self {
            command_line: command_line.to_string(),
            child: Some(child),
        })
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Check health one last time, then stop. Returns whether the process
    /// was still running when shutdown began.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<bool> {
        let alive = self.is_running();
        if !alive {
            warn!("Sidecar '{}' exited while serving", self.command_line);
        }
        self.stop(timeout).await?;
        Ok(alive)
    }

    /// Ask the process to terminate, wait up to `timeout`, then kill it.
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        terminate(&child);
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                info!("Sidecar stopped: {}", status?);
            }
            Err(_) => {
                warn!(
                    "Sidecar '{}' ignored terminate for {:?}, killing",
                    self.command_line, timeout
                );
                child.kill().await?;
            }
        }
        Ok(())
    }
}

fn terminate(child: &Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill(2) only sends a signal; pid is our own child, not yet reaped.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut sidecar = Sidecar::start("sleep 30", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(sidecar.is_running());

        sidecar.stop(STOP_TIMEOUT).await.unwrap();
        assert!(!sidecar.is_running());
        // Stopping twice is a no-op.
        sidecar.stop(STOP_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_after_stop_timeout() {
        let mut sidecar = Sidecar::start("sleep 30", Duration::from_millis(100))
            .await
            .unwrap();
        sidecar.stop(Duration::ZERO).await.unwrap();
        assert!(!sidecar.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_reports_health() {
        let mut healthy = Sidecar::start("sleep 30", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(healthy.shutdown(STOP_TIMEOUT).await.unwrap());

        let mut crashed = Sidecar::start("sleep 0.3", Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!crashed.shutdown(STOP_TIMEOUT).await.unwrap());
        assert!(!crashed.is_running());
    }

    #[tokio::test]
    async fn test_early_exit_is_a_failed_start() {
        let result = Sidecar::start("true", Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        assert!(Sidecar::start("   ", Duration::ZERO).await.is_err());
    }
}
