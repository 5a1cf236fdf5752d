//! Utilities built beside the scheduler
//!
//! - `queue`: fixed-capacity circular queue of fixed-size elements
//! - `mbus`: topic publish/subscribe on top of `queue`

pub mod mbus;
pub mod queue;

pub use mbus::{MessageBus, SubscriptionId, TopicId};
pub use queue::FixedQueue;
