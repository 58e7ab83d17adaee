//! Domain model (ids, messages).

pub mod ids;
pub mod message;

pub use ids::{JobId, MessageId};
pub use message::{Body, Message, MessageBuilder};
