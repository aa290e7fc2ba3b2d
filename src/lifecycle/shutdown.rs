//! Process-wide stop signal.
//!
//! The first stop wins and is remembered: a task that subscribes after the
//! stop was triggered still sees it, along with the reason.

use std::fmt;

use tokio::sync::watch;

/// Why the proxy is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An OS termination signal, by name.
    Signal(&'static str),
    /// Asked for in-process (embedding code, tests).
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Signal(name) => write!(f, "signal {name}"),
            StopReason::Requested => f.write_str("requested"),
        }
    }
}

/// Trigger side of the stop signal; clones share one state.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<Option<StopReason>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Stop for `reason`. Returns false if a stop was already underway.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| match current {
            Some(_) => false,
            None => {
                *current = Some(reason);
                true
            }
        })
    }

    /// `stop(StopReason::Requested)`.
    pub fn trigger(&self) -> bool {
        self.stop(StopReason::Requested)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side, held by the accept loop.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<StopReason>>,
}

impl ShutdownSignal {
    /// Resolve once a stop has been triggered. Cancel safe.
    pub async fn stopped(&mut self) -> StopReason {
        // Release the watch guard before any further await so the future stays `Send`.
        let result = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|reason| reason.unwrap_or(StopReason::Requested));
        match result {
            Ok(reason) => reason,
            // Every `Shutdown` is gone, so nothing can stop us any more.
            Err(_) => std::future::pending().await,
        }
    }
}
