//! Worker pool management.
//!
//! # Responsibilities
//! - Keep exactly N workers, replacing each retired worker in its slot
//! - Apply the selection policy to assign connections
//! - Count every assignment atomically with the choice of worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};

use crate::config::{ProxyConfig, SelectionPolicyKind};
use crate::lifecycle::recycler::{RecyclePolicy, Recycler, WorkerExit};
use crate::net::Connection;
use crate::observability::metrics;
use crate::pool::least_loaded::LeastLoaded;
use crate::pool::round_robin::RoundRobin;
use crate::pool::worker::{Worker, WorkerSnapshot, WorkerSpawn, WorkerState};
use crate::pool::{HandlerFactory, SelectionPolicy, WorkerId};

/// Static pool parameters.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub size: usize,
    pub worker_connections: usize,
    pub recycle: RecyclePolicy,
    /// Upper bound on how long a draining worker waits for its connections.
    pub drain_timeout: Duration,
    pub policy: SelectionPolicyKind,
}

impl PoolSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            size: config.workers.count,
            worker_connections: config.workers.worker_connections,
            recycle: RecyclePolicy::from_config(&config.workers),
            drain_timeout: Duration::from_secs(config.timeouts.request_secs),
            policy: config.workers.policy,
        }
    }
}

/// Fixed-size set of workers.
pub struct WorkerPool {
    /// Selection state shared across workers; the only cross-worker mutable structure.
    slots: Mutex<Vec<Arc<Worker>>>,
    policy: Box<dyn SelectionPolicy>,
    factory: Arc<dyn HandlerFactory>,
    settings: PoolSettings,
    closing: AtomicBool,
    /// Pinged when capacity may have freed up.
    released: Arc<Notify>,
    /// Workers in Active or Draining.
    live: watch::Sender<usize>,
    exits: mpsc::UnboundedSender<WorkerExit>,
}

impl WorkerPool {
    /// Spawn `settings.size` workers and the recycler that replaces them.
    pub fn start(settings: PoolSettings, factory: Arc<dyn HandlerFactory>) -> Arc<Self> {
        let (exits, exit_rx) = mpsc::unbounded_channel();
        let (live, _) = watch::channel(settings.size);
        let policy: Box<dyn SelectionPolicy> = match settings.policy {
            SelectionPolicyKind::RoundRobin => Box::new(RoundRobin::new()),
            SelectionPolicyKind::LeastLoaded => Box::new(LeastLoaded::new()),
        };

        let pool = Arc::new(Self {
            slots: Mutex::new(Vec::with_capacity(settings.size)),
            policy,
            factory,
            settings,
            closing: AtomicBool::new(false),
            released: Arc::new(Notify::new()),
            live,
            exits,
        });

        {
            let mut slots = pool.slots.lock().expect("worker pool mutex poisoned");
            for slot in 0..pool.settings.size {
                let worker = pool.spawn_worker(WorkerId { slot, generation: 0 });
                slots.push(worker);
            }
            publish_state_gauges(&slots);
        }

        tracing::info!(
            workers = pool.settings.size,
            worker_connections = pool.settings.worker_connections,
            max_requests = pool.settings.recycle.max_requests,
            max_requests_jitter = pool.settings.recycle.max_requests_jitter,
            policy = ?pool.settings.policy,
            "Worker pool started"
        );

        tokio::spawn(Recycler::new(Arc::clone(&pool), exit_rx).run());
        pool
    }

    fn spawn_worker(&self, id: WorkerId) -> Arc<Worker> {
        let params = WorkerSpawn {
            id,
            threshold: self.settings.recycle.draw(),
            max_connections: self.settings.worker_connections,
            drain_timeout: self.settings.drain_timeout,
            released: Arc::clone(&self.released),
            exits: self.exits.clone(),
        };
        Worker::spawn(params, self.factory.build(id))
    }

    /// Hand `conn` to an Active worker with spare capacity.
    ///
    /// Returns the connection when no worker can take it right now.
    pub fn assign(&self, mut conn: Connection) -> Result<WorkerId, Connection> {
        let slots = self.slots.lock().expect("worker pool mutex poisoned");
        if self.is_closing() {
            return Err(conn);
        }
        let Some(index) = self.policy.select(&slots) else {
            return Err(conn);
        };

        let worker = &slots[index];
        conn.attach(worker.begin_request());
        let connection_id = conn.id;
        worker.enqueue(conn)?;

        if worker.state() == WorkerState::Draining {
            publish_state_gauges(&slots);
        }
        tracing::trace!(connection_id = %connection_id, worker = %worker.id(), "Connection assigned");
        Ok(worker.id())
    }

    /// Assign `conn`, waiting for capacity if every worker is busy or draining.
    ///
    /// Fails only once the pool is closing.
    pub async fn dispatch(&self, mut conn: Connection) -> Result<WorkerId, Connection> {
        loop {
            // Register before checking so a release in between is not lost.
            let released = self.released.notified();
            match self.assign(conn) {
                Ok(id) => return Ok(id),
                Err(back) if self.is_closing() => return Err(back),
                Err(back) => {
                    tracing::debug!(connection_id = %back.id, "No worker with spare capacity, waiting");
                    conn = back;
                    released.await;
                }
            }
        }
    }

    /// Retire the exited worker and, unless closing, spawn its replacement in
    /// the same slot. Returns the number of live workers afterwards.
    pub(crate) fn replace(&self, exit: WorkerExit) -> usize {
        let mut slots = self.slots.lock().expect("worker pool mutex poisoned");
        let Some(slot) = slots.get_mut(exit.id.slot) else {
            return *self.live.borrow();
        };
        if slot.id() != exit.id {
            tracing::warn!(worker = %exit.id, current = %slot.id(), "Exit from a worker no longer in its slot");
            return *self.live.borrow();
        }

        slot.retire();
        metrics::record_worker_recycled(exit.forced);

        if self.is_closing() {
            self.live.send_modify(|n| *n = n.saturating_sub(1));
            tracing::info!(worker = %exit.id, served = exit.served, "Worker retired");
        } else {
            let replacement = self.spawn_worker(WorkerId {
                slot: exit.id.slot,
                generation: exit.id.generation + 1,
            });
            tracing::info!(
                retired = %exit.id,
                replacement = %replacement.id(),
                served = exit.served,
                forced = exit.forced,
                "Worker recycled"
            );
            *slot = replacement;
            self.released.notify_one();
        }

        publish_state_gauges(&slots);
        *self.live.borrow()
    }

    /// Stop assigning and drain every worker without replacement.
    pub fn close(&self) {
        let slots = self.slots.lock().expect("worker pool mutex poisoned");
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in slots.iter() {
            worker.begin_drain();
        }
        publish_state_gauges(&slots);
        self.released.notify_waiters();
        tracing::info!(workers = slots.len(), "Worker pool closing");
    }

    /// Resolve once every worker has retired after `close`.
    pub async fn wait_retired(&self) {
        let mut live = self.live.subscribe();
        let _ = live.wait_for(|n| *n == 0).await;
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Configured pool size.
    pub fn size(&self) -> usize {
        self.settings.size
    }

    /// Workers currently Active or Draining.
    pub fn live_workers(&self) -> usize {
        *self.live.borrow()
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let slots = self.slots.lock().expect("worker pool mutex poisoned");
        slots.iter().map(|worker| worker.snapshot()).collect()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("settings", &self.settings)
            .field("closing", &self.is_closing())
            .field("live", &self.live_workers())
            .finish()
    }
}

fn publish_state_gauges(slots: &[Arc<Worker>]) {
    let draining = slots
        .iter()
        .filter(|w| w.state() == WorkerState::Draining)
        .count();
    let active = slots.iter().filter(|w| w.state() == WorkerState::Active).count();
    metrics::record_worker_states(active, draining);
}
