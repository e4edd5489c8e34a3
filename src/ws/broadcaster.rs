//! Fan-out of processed updates to WebSocket subscribers.
//!
//! The broadcaster runs as a single task that owns the latest-value snapshot.
//! Bridge updates, subscribe requests and the resync timer are all handled in
//! that task, so a new subscriber's `init` is queued before any update that
//! follows it and never duplicates one already sent. Every sync tick resends
//! the full snapshot, even when it is still empty.

use crate::bridge::BridgeReceiver;
use crate::decision::ProcessedUpdate;
use crate::error::{AppError, Result};
use crate::ws::protocol::{Frame, ServerMessage};
use crate::ws::registry::{SubscriberId, SubscriptionRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Most recent update per cell, ordered by cell id
#[derive(Debug, Default, Clone)]
pub struct LatestSnapshot {
    entries: BTreeMap<String, ProcessedUpdate>,
}

impl LatestSnapshot {
    pub fn apply(&mut self, update: ProcessedUpdate) {
        self.entries.insert(update.cell_id.clone(), update);
    }

    pub fn get(&self, cell_id: &str) -> Option<&ProcessedUpdate> {
        self.entries.get(cell_id)
    }

    pub fn values(&self) -> Vec<ProcessedUpdate> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A registered subscriber: its id and the frames addressed to it
pub struct Subscription {
    pub id: SubscriberId,
    pub frames: mpsc::Receiver<Frame>,
}

enum Command {
    Subscribe {
        reply: oneshot::Sender<Subscription>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ProcessedUpdate>>,
    },
}

#[derive(Clone)]
pub struct BroadcasterHandle {
    commands: mpsc::Sender<Command>,
    registry: Arc<SubscriptionRegistry>,
}

impl BroadcasterHandle {
    /// Register a subscriber; its first frame is the `init` message
    pub async fn subscribe(&self) -> Result<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { reply })
            .await
            .map_err(|_| AppError::Internal("broadcaster stopped".to_string()))?;
        rx.await
            .map_err(|_| AppError::Internal("broadcaster dropped subscribe request".to_string()))
    }

    pub fn unsubscribe(&self, id: &SubscriberId) {
        self.registry.remove(id);
    }

    /// Current snapshot values
    pub async fn snapshot(&self) -> Result<Vec<ProcessedUpdate>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| AppError::Internal("broadcaster stopped".to_string()))?;
        rx.await
            .map_err(|_| AppError::Internal("broadcaster dropped snapshot request".to_string()))
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

pub struct Broadcaster {
    bridge: BridgeReceiver,
    commands: mpsc::Receiver<Command>,
    registry: Arc<SubscriptionRegistry>,
    snapshot: LatestSnapshot,
    sync_interval: Duration,
}

impl Broadcaster {
    pub fn new(
        bridge: BridgeReceiver,
        registry: Arc<SubscriptionRegistry>,
        sync_interval: Duration,
    ) -> (Self, BroadcasterHandle) {
        let (tx, rx) = mpsc::channel(64);
        let handle = BroadcasterHandle {
            commands: tx,
            registry: registry.clone(),
        };
        let broadcaster = Self {
            bridge,
            commands: rx,
            registry,
            snapshot: LatestSnapshot::default(),
            sync_interval,
        };
        (broadcaster, handle)
    }

    /// Run until the bridge is closed and drained, then disconnect every
    /// subscriber. Returns the final snapshot.
    pub async fn run(mut self) -> LatestSnapshot {
        info!(
            "Broadcaster started (sync interval: {}s)",
            self.sync_interval.as_secs_f64()
        );

        let mut sync = interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = self.bridge.pop() => match next {
                    Some(update) => self.publish(update),
                    None => break,
                },
                Some(command) = self.commands.recv() => self.handle(command),
                _ = sync.tick() => self.resync(),
            }
        }

        let closed = self.registry.close_all();
        info!(
            cells = self.snapshot.len(),
            subscribers = closed,
            "Broadcaster stopped, bridge drained"
        );
        self.snapshot
    }

    fn publish(&mut self, update: ProcessedUpdate) {
        let message = ServerMessage::update(update.clone());
        self.snapshot.apply(update);

        match message.to_frame() {
            Ok(frame) => {
                let delivered = self.registry.broadcast(&frame);
                debug!("Broadcast update to {} subscribers", delivered);
            }
            Err(e) => error!("Failed to serialize update: {}", e),
        }
    }

    fn resync(&mut self) {
        match ServerMessage::sync(self.snapshot.values()).to_frame() {
            Ok(frame) => {
                let delivered = self.registry.broadcast(&frame);
                debug!(cells = self.snapshot.len(), delivered, "periodic sync sent");
            }
            Err(e) => error!("Failed to serialize sync message: {}", e),
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe { reply } => {
                let init = match ServerMessage::init(self.snapshot.values()).to_frame() {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        error!("Failed to serialize init message: {}", e);
                        None
                    }
                };
                let (id, frames) = self.registry.register(init);
                if reply.send(Subscription { id, frames }).is_err() {
                    // Requester went away before the reply arrived
                    self.registry.remove(&id);
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot.values());
            }
        }
    }
}
