//! Translation daemon control backed by a child process.
//!
//! `start` spawns the configured program with the upstream interface
//! substituted into its arguments; `stop` kills and reaps it. Only one
//! daemon instance is supervised at a time. The child gets a null stdin and
//! stdout; stderr is inherited.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::lifecycle::DaemonControl;
use crate::types::{DaemonConfig, Error, InterfaceName, Result};

/// Runs the translation daemon as a child process.
#[derive(Debug)]
pub struct ClatdProcess {
    config: DaemonConfig,
    child: Mutex<Option<Child>>,
}

impl ClatdProcess {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
        }
    }

    /// Whether the supervised daemon is still alive.
    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// PID of the supervised daemon, if one is running.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }
}

async fn reap(mut child: Child) -> Result<()> {
    match child.try_wait()? {
        Some(status) => {
            tracing::debug!(%status, "daemon already exited");
            Ok(())
        }
        None => {
            child.kill().await?;
            Ok(())
        }
    }
}

#[async_trait]
impl DaemonControl for ClatdProcess {
    async fn start(&self, upstream: &InterfaceName) -> Result<()> {
        let mut slot = self.child.lock().await;
        if let Some(previous) = slot.take() {
            tracing::warn!("daemon already running, replacing it");
            reap(previous).await?;
        }

        let args = self.config.args_for(upstream);
        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::daemon(format!("spawn {}: {}", self.config.program, e)))?;

        tracing::info!(
            program = %self.config.program,
            ?args,
            pid = ?child.id(),
            "daemon started"
        );
        *slot = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(child) = self.child.lock().await.take() else {
            tracing::debug!("no daemon to stop");
            return Ok(());
        };

        let pid = child.id();
        reap(child)
            .await
            .map_err(|e| Error::daemon(format!("stop pid {:?}: {}", pid, e)))?;
        tracing::info!(?pid, "daemon stopped");
        Ok(())
    }
}
