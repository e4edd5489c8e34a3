use crate::decision::ProcessedUpdate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serialized server message, shared by every subscriber it is delivered to
pub type Frame = Arc<str>;

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Full state, sent once right after a subscriber connects
    Init { data: Vec<ProcessedUpdate> },
    /// A single new decision
    Update { data: Vec<ProcessedUpdate> },
    /// Periodic full state resend
    Sync { data: Vec<ProcessedUpdate> },
}

impl ServerMessage {
    pub fn init(data: Vec<ProcessedUpdate>) -> Self {
        ServerMessage::Init { data }
    }

    pub fn update(update: ProcessedUpdate) -> Self {
        ServerMessage::Update { data: vec![update] }
    }

    pub fn sync(data: Vec<ProcessedUpdate>) -> Self {
        ServerMessage::Sync { data }
    }

    pub fn to_frame(&self) -> serde_json::Result<Frame> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Messages sent from client to server. Anything else is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping,
}
