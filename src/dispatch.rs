//! Hand-off between the audio thread and the notifier.
//!
//! The audio callback only enqueues state changes; a tokio worker owns the
//! notifier and performs the (possibly blocking) network I/O. Events are
//! delivered in the order they were emitted.

use crate::detector::PipelineStats;
use crate::notifier::Notifier;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default number of pending notifications before new ones are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Sending half used from the audio thread
#[derive(Clone)]
pub struct NotifyHandle {
    tx: mpsc::Sender<bool>,
    stats: Arc<PipelineStats>,
}

impl NotifyHandle {
    /// Queue a state change without blocking.
    ///
    /// Returns false if the event was dropped (queue full or worker gone).
    pub fn send(&self, state: bool) -> bool {
        match self.tx.try_send(state) {
            Ok(()) => true,
            Err(TrySendError::Full(state)) => {
                warn!("Notification queue full, dropping state {}", state);
                self.stats.record_dropped();
                false
            }
            Err(TrySendError::Closed(state)) => {
                warn!("Notifier stopped, dropping state {}", state);
                self.stats.record_dropped();
                false
            }
        }
    }
}

/// Worker delivering queued state changes to a notifier
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The worker exits once every [`NotifyHandle`] has been dropped and the
    /// queue is drained.
    pub fn spawn(
        notifier: Box<dyn Notifier>,
        capacity: usize,
        stats: Arc<PipelineStats>,
    ) -> (NotifyHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run(notifier, rx, Arc::clone(&stats)));

        (NotifyHandle { tx, stats }, worker)
    }
}

async fn run(notifier: Box<dyn Notifier>, mut rx: mpsc::Receiver<bool>, stats: Arc<PipelineStats>) {
    while let Some(state) = rx.recv().await {
        match notifier.notify(state).await {
            Ok(()) => stats.record_sent(),
            Err(e) => error!("Error notifying state {} via {}: {}", state, notifier.kind(), e),
        }
    }

    debug!("Notification worker stopped");
}
