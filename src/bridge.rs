//! Handoff queue between the ingestion loop and the broadcaster.
//!
//! Pushing never waits. The queue is unbounded by default; with a capacity the
//! oldest entry is dropped (and counted) to make room. Order is FIFO, which keeps
//! updates for the same cell in the order they were decided.

use crate::decision::ProcessedUpdate;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event bridge is closed")]
pub struct BridgeClosed;

struct Shared {
    queue: Mutex<VecDeque<ProcessedUpdate>>,
    capacity: Option<usize>,
    closed: AtomicBool,
    dropped: AtomicU64,
    notify: Notify,
}

/// Producer half, used by the ingestion loop
#[derive(Clone)]
pub struct BridgeSender {
    shared: Arc<Shared>,
}

/// Consumer half, owned by the broadcaster
pub struct BridgeReceiver {
    shared: Arc<Shared>,
}

pub fn channel(capacity: Option<usize>) -> (BridgeSender, BridgeReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity.unwrap_or(64))),
        capacity,
        closed: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
        notify: Notify::new(),
    });
    (
        BridgeSender {
            shared: shared.clone(),
        },
        BridgeReceiver { shared },
    )
}

impl BridgeSender {
    pub fn push(&self, update: ProcessedUpdate) -> Result<(), BridgeClosed> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BridgeClosed);
        }

        {
            let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(capacity) = self.shared.capacity {
                while queue.len() >= capacity {
                    if let Some(evicted) = queue.pop_front() {
                        let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            cell_id = %evicted.cell_id,
                            capacity,
                            dropped_total = total,
                            "event bridge full, dropped oldest update"
                        );
                    }
                }
            }
            queue.push_back(update);
        }

        self.shared.notify.notify_one();
        Ok(())
    }

    /// Stop accepting updates. Already queued updates stay available to the receiver.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl BridgeReceiver {
    /// Wait for the next update. Returns `None` once closed and drained.
    pub async fn pop(&mut self) -> Option<ProcessedUpdate> {
        loop {
            {
                let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(update) = queue.pop_front() {
                    return Some(update);
                }
                if self.shared.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }
}

impl Drop for BridgeReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::HysteresisEngine;
    use std::time::Duration;

    fn update(cell: &str, utilization: f64) -> ProcessedUpdate {
        HysteresisEngine::default().decide(cell, utilization)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel(None);
        for u in [10.0, 20.0, 30.0] {
            tx.push(update("cell-1", u)).unwrap();
        }

        assert_eq!(rx.pop().await.unwrap().utilization, 10.0);
        assert_eq!(rx.pop().await.unwrap().utilization, 20.0);
        assert_eq!(rx.pop().await.unwrap().utilization, 30.0);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let (tx, mut rx) = channel(None);

        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            tx.push(update("cell-1", 55.0)).unwrap();
        });

        let received = tokio::time::timeout(Duration::from_secs(2), rx.pop())
            .await
            .expect("pop should wake up after push");
        assert_eq!(received.unwrap().cell_id, "cell-1");
        producer.join().unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (tx, mut rx) = channel(None);
        tx.push(update("cell-1", 1.0)).unwrap();
        tx.push(update("cell-2", 2.0)).unwrap();
        tx.close();

        assert_eq!(tx.push(update("cell-3", 3.0)), Err(BridgeClosed));
        assert_eq!(rx.pop().await.unwrap().cell_id, "cell-1");
        assert_eq!(rx.pop().await.unwrap().cell_id, "cell-2");
        assert!(rx.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_bounded_drops_oldest() {
        let (tx, mut rx) = channel(Some(2));
        tx.push(update("cell-1", 1.0)).unwrap();
        tx.push(update("cell-1", 2.0)).unwrap();
        tx.push(update("cell-1", 3.0)).unwrap();

        assert_eq!(tx.dropped(), 1);
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.pop().await.unwrap().utilization, 2.0);
        assert_eq!(rx.pop().await.unwrap().utilization, 3.0);
    }

    #[test]
    fn test_dropping_receiver_closes() {
        let (tx, rx) = channel(None);
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.push(update("cell-1", 1.0)).is_err());
    }
}
