//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is intentionally **lightweight**:
//!
//! - **Transport-agnostic**: the trait says nothing about channels, brokers or storage
//! - **Broadcast**: each subscription gets a copy of every message published after it was created
//! - **Non-blocking publish**: publishing never waits on a slow subscriber
//! - **No persistence**: a subscriber that is not listening simply misses messages
//!
//! Subscribers observe; they cannot influence the publisher. A dropped
//! subscription is pruned on the next publish.

use std::sync::Arc;

use tokio::sync::mpsc;

/// A subscription to a message stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut subscription = bus.subscribe();
/// while let Some(message) = subscription.recv().await {
///     handle(message);
/// }
/// // `None`: the bus was dropped.
/// ```
///
/// Messages from a single publisher arrive in publication order.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. Returns `None` once the bus is gone and
    /// every buffered message has been consumed.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            out.push(message);
        }
        out
    }
}

/// Domain-agnostic pub/sub abstraction.
///
/// Implementations must be `Send + Sync`; publishing may happen from any task.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
