//! In-process pub/sub bus.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// In-memory fan-out over unbounded tokio channels.
///
/// - Publish is synchronous and never blocks
/// - Per-subscriber ordering follows publication order
/// - Subscribers whose receiving side is gone are dropped while publishing
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;

        let before = subs.len();
        subs.retain(|tx| tx.send(message.clone()).is_ok());
        if subs.len() != before {
            trace!(dropped = before - subs.len(), "pruned closed subscriptions");
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::unbounded_channel();

        // A poisoned lock still yields a subscription; it just never receives.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_messages_in_order() {
        let bus = InMemoryEventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        for i in 0..3 {
            bus.publish(i).unwrap();
        }

        assert_eq!(first.drain(), vec![0, 1, 2]);
        assert_eq!(second.recv().await, Some(0));
        assert_eq!(second.drain(), vec![1, 2]);
    }

    #[test]
    fn late_subscriber_misses_earlier_messages() {
        let bus = InMemoryEventBus::new();
        bus.publish("early").unwrap();
        let mut sub = bus.subscribe();
        bus.publish("late").unwrap();
        assert_eq!(sub.drain(), vec!["late"]);
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe();
        let _kept = bus.subscribe();
        drop(sub);

        bus.publish(1u8).unwrap();
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn poisoned_error_renders_its_cause() {
        assert_eq!(InMemoryBusError::Poisoned.to_string(), "event bus lock poisoned");
    }
}
