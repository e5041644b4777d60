//! Lifecycle notification plumbing.
//!
//! A small publish/subscribe layer: producers publish messages, every
//! subscriber receives its own copy in publication order.

pub mod bus;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
