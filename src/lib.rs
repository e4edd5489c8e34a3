pub mod bridge;
pub mod config;
pub mod decision;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod policy;
pub mod telemetry;
pub mod ws;

// Re-export commonly used items
pub use config::Config;
pub use decision::{Action, HysteresisEngine, PowerState, ProcessedUpdate, Thresholds};
pub use error::{AppError, Result};
pub use pipeline::{run_ingestion, IngestStats};
pub use telemetry::{FallbackSource, SourceMode};
pub use ws::{AppState, Broadcaster, BroadcasterHandle, ClientMessage, ServerMessage};
