//! Signal handling for graceful shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::debug;

/// Handles shutdown signals (SIGTERM, SIGINT)
///
/// The control loop runs on a blocking thread and polls the halt flag
/// between iterations.
pub struct ShutdownSignal {
    halt: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the control loop
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Ask the control loop to stop
    pub fn trigger(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    /// Wait for a shutdown signal, then raise the halt flag
    pub async fn wait(&self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
            }
        }

        self.trigger();
        Ok(())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
