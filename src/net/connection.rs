//! Connection state and in-flight tracking.
//!
//! # Responsibilities
//! - Carry an accepted socket with its peer address and deadline
//! - Generate unique connection IDs for tracing
//! - Count in-flight connections per worker so draining can finish

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An accepted client connection.
///
/// Owned by exactly one worker once assigned; dropped on completion,
/// error or timeout, which closes the socket and releases the in-flight slot.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub accepted_at: Instant,
    /// Accept time plus the request timeout.
    pub deadline: Instant,
    in_flight: Option<InFlightGuard>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, timeout: Duration) -> Self {
        let accepted_at = Instant::now();
        Self {
            id: ConnectionId::new(),
            stream,
            peer,
            accepted_at,
            deadline: accepted_at + timeout,
            in_flight: None,
        }
    }

    /// Attach the worker's in-flight slot.
    pub(crate) fn attach(&mut self, guard: InFlightGuard) {
        self.in_flight = Some(guard);
    }

    /// Time remaining until the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Counts a worker's in-flight connections.
///
/// Uses a watch channel so a draining worker can wait for the count to hit zero.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    count: Arc<watch::Sender<usize>>,
    /// Woken whenever a slot is released.
    released: Arc<Notify>,
}

impl InFlightTracker {
    /// Create a tracker that pings `released` when a connection finishes.
    pub fn new(released: Arc<Notify>) -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            count: Arc::new(tx),
            released,
        }
    }

    /// Record a new in-flight connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> InFlightGuard {
        self.count.send_modify(|n| *n += 1);
        InFlightGuard {
            count: Arc::clone(&self.count),
            released: Arc::clone(&self.released),
        }
    }

    /// Get current in-flight count.
    pub fn active_count(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once no connection is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the in-flight count when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
    released: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
        self.released.notify_one();
    }
}
