//! Worker abstraction.
//!
//! # Responsibilities
//! - Represent a single worker and its state (Active → Draining → Retired)
//! - Count served requests against the worker's jittered threshold
//! - Track in-flight connections and drain them before exiting
//!
//! # States
//! ```text
//! Active → Draining: served count reaches the threshold, or pool shutdown
//! Draining → Retired: in-flight count reaches zero (forced past the deadline),
//!                     applied by the pool when it installs the replacement
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::lifecycle::recycler::WorkerExit;
use crate::net::{Connection, InFlightGuard, InFlightTracker};
use crate::pool::{ConnectionHandler, WorkerId};

/// After a forced drain, how long cancelled connections get before their tasks are aborted.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Worker state enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Active = 0,
    Draining = 1,
    Retired = 2,
}

impl From<u8> for WorkerState {
    fn from(val: u8) -> Self {
        match val {
            0 => WorkerState::Active,
            1 => WorkerState::Draining,
            _ => WorkerState::Retired,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Active => "active",
            WorkerState::Draining => "draining",
            WorkerState::Retired => "retired",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub state: WorkerState,
    pub served: u64,
    pub threshold: Option<u64>,
    pub in_flight: usize,
}

/// Parameters a worker is spawned with.
#[derive(Debug, Clone)]
pub(crate) struct WorkerSpawn {
    pub id: WorkerId,
    pub threshold: Option<u64>,
    pub max_connections: usize,
    pub drain_timeout: Duration,
    pub released: Arc<Notify>,
    pub exits: mpsc::UnboundedSender<WorkerExit>,
}

/// A single worker.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    /// Requests served before draining; None disables recycling.
    threshold: Option<u64>,
    /// Maximum concurrent connections.
    max_connections: usize,
    /// Requests assigned so far.
    served: AtomicU64,
    /// Current state (0=Active, 1=Draining, 2=Retired).
    state: AtomicU8,
    in_flight: InFlightTracker,
    /// Fired on Active → Draining.
    drain: CancellationToken,
    /// Parent of every connection token; fired when the drain deadline passes.
    abort: CancellationToken,
    queue: mpsc::UnboundedSender<Connection>,
}

impl Worker {
    /// Create the worker and start its task.
    pub(crate) fn spawn(params: WorkerSpawn, handler: Arc<dyn ConnectionHandler>) -> Arc<Self> {
        let (queue, rx) = mpsc::unbounded_channel();
        let worker = Arc::new(Self {
            id: params.id,
            threshold: params.threshold,
            max_connections: params.max_connections,
            served: AtomicU64::new(0),
            state: AtomicU8::new(WorkerState::Active as u8),
            in_flight: InFlightTracker::new(params.released),
            drain: CancellationToken::new(),
            abort: CancellationToken::new(),
            queue,
        });

        tokio::spawn(
            Arc::clone(&worker).run(rx, handler, params.drain_timeout, params.exits),
        );
        worker
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> Option<u64> {
        self.threshold
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.active_count()
    }

    /// Active with spare capacity.
    pub fn accepts(&self) -> bool {
        self.state() == WorkerState::Active && self.in_flight() < self.max_connections
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            state: self.state(),
            served: self.served(),
            threshold: self.threshold,
            in_flight: self.in_flight(),
        }
    }

    /// Count a new request. Starts draining once the threshold is reached,
    /// so the worker never takes more than `threshold` requests while Active.
    pub(crate) fn begin_request(&self) -> InFlightGuard {
        let guard = self.in_flight.track();
        let served = self.served.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(threshold) = self.threshold {
            if served >= threshold && self.begin_drain() {
                tracing::info!(
                    worker = %self.id,
                    served,
                    threshold,
                    "Worker reached request threshold"
                );
            }
        }
        guard
    }

    /// Active → Draining. Returns false if the worker was not Active.
    pub(crate) fn begin_drain(&self) -> bool {
        let switched = self
            .state
            .compare_exchange(
                WorkerState::Active as u8,
                WorkerState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if switched {
            self.drain.cancel();
        }
        switched
    }

    pub(crate) fn retire(&self) {
        self.state.store(WorkerState::Retired as u8, Ordering::SeqCst);
    }

    /// Hand a counted connection to the worker task.
    pub(crate) fn enqueue(&self, conn: Connection) -> Result<(), Connection> {
        self.queue.send(conn).map_err(|e| e.0)
    }

    async fn run(
        self: Arc<Self>,
        mut queue: mpsc::UnboundedReceiver<Connection>,
        handler: Arc<dyn ConnectionHandler>,
        drain_timeout: Duration,
        exits: mpsc::UnboundedSender<WorkerExit>,
    ) {
        tracing::info!(worker = %self.id, threshold = ?self.threshold, "Worker started");

        let mut tasks = JoinSet::new();
        let mut drain_deadline: Option<Instant> = None;
        let mut abort_deadline: Option<Instant> = None;
        let mut forced = false;

        loop {
            let idle = self.in_flight.wait_idle();
            tokio::select! {
                Some(conn) = queue.recv() => {
                    let cancel = self.abort.child_token();
                    let handler = Arc::clone(&handler);
                    tasks.spawn(async move { handler.handle(conn, cancel).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(worker = %self.id, error = %e, "Connection task panicked");
                        }
                    }
                }
                _ = self.drain.cancelled(), if drain_deadline.is_none() => {
                    drain_deadline = Some(Instant::now() + drain_timeout);
                    tracing::info!(
                        worker = %self.id,
                        in_flight = self.in_flight(),
                        "Worker draining"
                    );
                }
                _ = idle, if drain_deadline.is_some() => break,
                _ = sleep_until_opt(drain_deadline), if !forced => {
                    let err = ProxyError::WorkerDrainTimeout {
                        worker: self.id,
                        lingering: self.in_flight(),
                    };
                    tracing::warn!(worker = %self.id, error = %err, "Forcing drain");
                    self.abort.cancel();
                    forced = true;
                    abort_deadline = Some(Instant::now() + ABORT_GRACE);
                }
                _ = sleep_until_opt(abort_deadline) => {
                    tracing::warn!(worker = %self.id, "Aborting connection tasks that ignored cancellation");
                    tasks.abort_all();
                    abort_deadline = None;
                }
            }
        }

        tasks.shutdown().await;
        let exit = WorkerExit {
            id: self.id,
            served: self.served(),
            forced,
        };
        tracing::info!(worker = %self.id, served = exit.served, forced = exit.forced, "Worker drained");
        let _ = exits.send(exit);
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use tokio::net::{TcpListener, TcpStream};

    struct HoldUntilCancelled;

    impl ConnectionHandler for HoldUntilCancelled {
        fn handle(&self, conn: Connection, cancel: CancellationToken) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                cancel.cancelled().await;
                drop(conn);
            })
        }
    }

    async fn connection(listener: &TcpListener) -> (Connection, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (Connection::new(server, peer, Duration::from_secs(5)), client)
    }

    fn spawn_worker(threshold: Option<u64>, drain_timeout: Duration) -> (Arc<Worker>, mpsc::UnboundedReceiver<WorkerExit>) {
        let (exits, rx) = mpsc::unbounded_channel();
        let worker = Worker::spawn(
            WorkerSpawn {
                id: WorkerId { slot: 0, generation: 0 },
                threshold,
                max_connections: 10,
                drain_timeout,
                released: Arc::new(Notify::new()),
                exits,
            },
            Arc::new(HoldUntilCancelled),
        );
        (worker, rx)
    }

    #[tokio::test]
    async fn drains_exactly_at_threshold() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (worker, _exits) = spawn_worker(Some(2), Duration::from_secs(5));

        let (conn, _c1) = connection(&listener).await;
        let _g1 = worker.begin_request();
        worker.enqueue(conn).unwrap();
        assert_eq!(worker.state(), WorkerState::Active);

        let _g2 = worker.begin_request();
        assert_eq!(worker.state(), WorkerState::Draining);
        assert!(!worker.accepts());
        assert_eq!(worker.served(), 2);
    }

    #[tokio::test]
    async fn no_threshold_never_drains() {
        let (worker, _exits) = spawn_worker(None, Duration::from_secs(5));
        let guards: Vec<_> = (0..50).map(|_| worker.begin_request()).collect();
        assert_eq!(worker.state(), WorkerState::Active);
        assert_eq!(worker.in_flight(), 50);
        drop(guards);
        assert_eq!(worker.in_flight(), 0);
    }

    #[tokio::test]
    async fn forced_drain_reports_exit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (worker, mut exits) = spawn_worker(Some(1), Duration::from_millis(100));

        let (mut conn, _client) = connection(&listener).await;
        conn.attach(worker.begin_request());
        worker.enqueue(conn).unwrap();
        assert_eq!(worker.state(), WorkerState::Draining);

        let exit = tokio::time::timeout(Duration::from_secs(3), exits.recv())
            .await
            .expect("worker never exited")
            .unwrap();
        assert_eq!(exit.id, worker.id());
        assert!(exit.forced);
        assert_eq!(worker.in_flight(), 0);
    }
}
