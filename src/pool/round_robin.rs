//! Round-robin worker selection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::pool::{SelectionPolicy, Worker};

/// Round-robin selector.
/// Stores an internal counter to rotate through workers, skipping any that
/// are draining or at capacity.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for RoundRobin {
    fn select(&self, workers: &[Arc<Worker>]) -> Option<usize> {
        if workers.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = workers.len();

        (0..len)
            .map(|i| (start + i) % len)
            .find(|&index| workers[index].accepts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_support::idle_workers;

    #[tokio::test]
    async fn rotates_through_workers() {
        let (workers, _exits) = idle_workers(2, 100);
        let rr = RoundRobin::new();

        assert_eq!(rr.select(&workers), Some(0));
        assert_eq!(rr.select(&workers), Some(1));
        assert_eq!(rr.select(&workers), Some(0));
    }

    #[tokio::test]
    async fn skips_draining_worker() {
        let (workers, _exits) = idle_workers(3, 100);
        let rr = RoundRobin::new();
        workers[1].begin_drain();

        let picks: Vec<_> = (0..4).map(|_| rr.select(&workers).unwrap()).collect();
        assert_eq!(picks, vec![0, 2, 2, 0]);
    }

    #[tokio::test]
    async fn none_when_nothing_accepts() {
        let (workers, _exits) = idle_workers(2, 1);
        let _guards: Vec<_> = workers.iter().map(|w| w.begin_request()).collect();
        assert_eq!(RoundRobin::new().select(&workers), None);
        assert_eq!(RoundRobin::new().select(&[]), None);
    }
}
