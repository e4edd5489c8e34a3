use crate::ws::protocol::Frame;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SubscriberId = Uuid;

/// Connected subscribers, each behind a bounded frame channel.
///
/// Sends happen outside the lock, so a subscriber may register or disconnect
/// while a broadcast is in flight. A subscriber whose channel is closed or full
/// is removed.
pub struct SubscriptionRegistry {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Frame>>>,
    buffer: usize,
}

impl SubscriptionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Add a subscriber. `first` is queued before anything else it receives.
    pub fn register(&self, first: Option<Frame>) -> (SubscriberId, mpsc::Receiver<Frame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        if let Some(frame) = first {
            // Fresh channel with capacity >= 1 cannot be full
            let _ = tx.try_send(frame);
        }

        let total = {
            let mut subscribers = self.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        info!(subscriber = %id, total, "subscriber registered");

        (id, rx)
    }

    pub fn remove(&self, id: &SubscriberId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            info!(subscriber = %id, "subscriber removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a frame to every subscriber; returns how many accepted it
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<Frame>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if targets.is_empty() {
            debug!("No subscribers connected, skipping broadcast");
            return 0;
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "subscriber channel closed");
                    failed.push(id);
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, buffer = self.buffer, "subscriber too slow, dropping it");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.lock();
            for id in &failed {
                subscribers.remove(id);
            }
            info!(removed = failed.len(), remaining = subscribers.len(), "removed failed subscribers");
        }

        delivered
    }

    /// Drop every subscriber channel, which ends their connections
    pub fn close_all(&self) -> usize {
        let mut subscribers = self.lock();
        let count = subscribers.len();
        subscribers.clear();
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Frame>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
