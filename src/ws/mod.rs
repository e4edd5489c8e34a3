pub mod broadcaster;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod registry;

pub use broadcaster::{Broadcaster, BroadcasterHandle, LatestSnapshot, Subscription};
pub use handler::{health_check, router, ws_handler, AppState};
pub use protocol::{ClientMessage, Frame, ServerMessage};
pub use registry::{SubscriberId, SubscriptionRegistry};
