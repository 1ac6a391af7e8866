//! Observation publication
use std::sync::Mutex;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::debug;

use crate::observation::Batch;

/// [ObservationSink] receives every accepted [Batch].
/// Publication is fire and forget: no acknowledgment, no backpressure.
/// One sink is usually shared by many streaming tasks.
pub trait ObservationSink: Send + Sync {
    fn publish(&self, batch: Batch);
}

/// [ObservationCenter] is a fan-out publication point.
/// Each [Batch] is delivered as a whole to all subscribers, and concurrent
/// publishers are serialized so every subscriber sees the same batch order.
#[derive(Debug, Default)]
pub struct ObservationCenter {
    subscribers: Mutex<Vec<Sender<Batch>>>,
}

impl ObservationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber, that will receive all
    /// [Batch]es published from now on.
    pub fn subscribe(&self) -> Receiver<Batch> {
        let (tx, rx) = unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Number of active subscribers
    pub fn subscribers(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or_default()
    }
}

impl ObservationSink for ObservationCenter {
    fn publish(&self, batch: Batch) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| tx.send(batch.clone()).is_ok());
        debug!(
            "published {} observations to {} subscribers",
            batch.len(),
            subscribers.len()
        );
    }
}
