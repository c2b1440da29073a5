//! Inbound message bus (front end → bridge).

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, ReplyContext};
