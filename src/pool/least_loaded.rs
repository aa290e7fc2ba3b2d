//! Least-loaded worker selection.

use std::sync::Arc;

use crate::pool::{SelectionPolicy, Worker};

/// Selects the accepting worker with the fewest in-flight connections.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for LeastLoaded {
    fn select(&self, workers: &[Arc<Worker>]) -> Option<usize> {
        // In case of tie, the lowest slot is selected (stability)
        workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.accepts())
            .min_by_key(|(_, w)| w.in_flight())
            .map(|(index, _)| index)
    }
}
