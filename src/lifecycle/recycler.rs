//! Worker recycling.
//!
//! # Responsibilities
//! - Draw each worker's jittered request threshold at spawn time
//! - Replace drained workers so the pool keeps N Active/Draining workers
//!
//! # Design Decisions
//! - The jitter is drawn per worker, not from a global counter, so workers
//!   spawned together still retire at different request counts
//! - Replacement happens in the same critical section that retires the old
//!   worker; the live count never dips below N during steady operation

use std::sync::Arc;

use rand::Rng;
use tokio::sync::mpsc;

use crate::config::WorkerConfig;
use crate::pool::{WorkerId, WorkerPool};

/// Threshold policy: `max_requests + uniform(0..=max_requests_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecyclePolicy {
    pub max_requests: u64,
    pub max_requests_jitter: u64,
}

impl RecyclePolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            max_requests_jitter: config.max_requests_jitter,
        }
    }

    /// Draw a threshold for a new worker. None when recycling is disabled.
    pub fn draw(&self) -> Option<u64> {
        self.draw_with(&mut rand::thread_rng())
    }

    pub fn draw_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        if self.max_requests == 0 {
            return None;
        }
        let jitter = if self.max_requests_jitter > 0 {
            rng.gen_range(0..=self.max_requests_jitter)
        } else {
            0
        };
        Some(self.max_requests.saturating_add(jitter))
    }
}

/// Reported by a worker task once it has finished draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub id: WorkerId,
    pub served: u64,
    /// Lingering connections had to be aborted at the drain deadline.
    pub forced: bool,
}

/// Background task that turns worker exits into replacements.
pub struct Recycler {
    pool: Arc<WorkerPool>,
    exits: mpsc::UnboundedReceiver<WorkerExit>,
}

impl Recycler {
    pub(crate) fn new(pool: Arc<WorkerPool>, exits: mpsc::UnboundedReceiver<WorkerExit>) -> Self {
        Self { pool, exits }
    }

    /// Run until the pool is closed and every worker has retired.
    pub async fn run(mut self) {
        while let Some(exit) = self.exits.recv().await {
            let live = self.pool.replace(exit);
            if self.pool.is_closing() && live == 0 {
                break;
            }
        }
        tracing::debug!("Recycler stopped");
    }
}
