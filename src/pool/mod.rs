//! Worker pool subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → registry.rs (lock, select, count, enqueue; wait if no capacity)
//!     → Apply selection policy:
//!         - round_robin.rs (rotate through workers)
//!         - least_loaded.rs (pick worker with fewest in-flight connections)
//!     → worker.rs (worker task spawns the connection on its handler)
//!     → On threshold: worker drains, lifecycle::recycler replaces it
//! ```
//!
//! # Design Decisions
//! - Pool size is static; a retired worker is replaced in the same slot
//! - Selection, counting and enqueueing happen under one lock, so a
//!   worker can never be handed a connection after it stopped being Active
//! - Each worker owns its handler (and the handler's upstream client)

pub mod least_loaded;
pub mod registry;
pub mod round_robin;
pub mod worker;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::net::Connection;

pub use registry::{PoolSettings, WorkerPool};
pub use worker::{Worker, WorkerSnapshot, WorkerState};

/// Trait for worker selection algorithms.
pub trait SelectionPolicy: Send + Sync + std::fmt::Debug {
    /// Index of the worker that should take the next connection, if any
    /// worker is Active with spare capacity.
    fn select(&self, workers: &[Arc<Worker>]) -> Option<usize>;
}

/// Identity of a worker: its pool slot and how many times the slot was refilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub slot: usize,
    pub generation: u64,
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}.{}", self.slot, self.generation)
    }
}

/// Serves one connection to completion inside a worker.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Drive `conn` until it completes, fails, times out or `cancel` fires.
    fn handle(&self, conn: Connection, cancel: CancellationToken) -> BoxFuture<'static, ()>;
}

/// Builds the handler owned by a freshly spawned worker.
pub trait HandlerFactory: Send + Sync + 'static {
    fn build(&self, worker: WorkerId) -> Arc<dyn ConnectionHandler>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::future::BoxFuture;
    use tokio::sync::{mpsc, Notify};
    use tokio_util::sync::CancellationToken;

    use super::worker::WorkerSpawn;
    use super::{ConnectionHandler, Worker, WorkerId};
    use crate::lifecycle::recycler::WorkerExit;
    use crate::net::Connection;

    struct Discard;

    impl ConnectionHandler for Discard {
        fn handle(&self, conn: Connection, _cancel: CancellationToken) -> BoxFuture<'static, ()> {
            Box::pin(async move { drop(conn) })
        }
    }

    /// Workers with no recycling threshold, for exercising selection policies.
    pub(crate) fn idle_workers(
        count: usize,
        max_connections: usize,
    ) -> (Vec<Arc<Worker>>, mpsc::UnboundedReceiver<WorkerExit>) {
        let (exits, rx) = mpsc::unbounded_channel();
        let released = Arc::new(Notify::new());
        let workers = (0..count)
            .map(|slot| {
                Worker::spawn(
                    WorkerSpawn {
                        id: WorkerId { slot, generation: 0 },
                        threshold: None,
                        max_connections,
                        drain_timeout: Duration::from_secs(5),
                        released: Arc::clone(&released),
                        exits: exits.clone(),
                    },
                    Arc::new(Discard),
                )
            })
            .collect();
        (workers, rx)
    }
}
