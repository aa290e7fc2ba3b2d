//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C) or SIGTERM
//! - Translate the first one into a graceful shutdown
//!
//! A second signal while draining is left to the default disposition, so
//! an impatient operator can still kill the process.

use crate::lifecycle::{Shutdown, StopReason};

/// Resolve when the process is asked to terminate.
pub async fn wait_for_termination() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
            _ = term.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}

/// Spawn a task that triggers `shutdown` on the first termination signal.
pub fn install(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(name) => {
                tracing::info!(signal = name, "Shutdown signal received");
                shutdown.stop(StopReason::Signal(name));
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
        }
    })
}
