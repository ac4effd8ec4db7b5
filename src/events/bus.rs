//! Synchronous message bus over std::sync::mpsc.
//!
//! Subscribers get their own channel per event type; publishing clones the
//! event into every live channel. A subscriber that dropped its consumer is
//! pruned on the next publish.

use super::error::{MessageBusError, MessageBusResult};
use super::{Event, EventType};
use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Consumer handle for receiving events of a specific type
pub struct Consumer<T: EventType> {
    receiver: Receiver<T>,
}

impl<T: EventType> Consumer<T> {
    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<T, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Try to receive an event with a timeout
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything already delivered
    pub fn drain(&mut self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Default)]
struct SubscriberRegistry {
    // Key: event type name, Value: type-erased senders
    subscribers: HashMap<&'static str, Vec<Box<dyn Any + Send>>>,
}

impl SubscriberRegistry {
    fn add_subscriber<T: EventType>(&mut self, sender: Sender<T>) {
        self.subscribers
            .entry(T::type_id())
            .or_default()
            .push(Box::new(sender));
    }

    fn senders<T: EventType>(&self) -> Vec<Sender<T>> {
        self.subscribers
            .get(T::type_id())
            .map(|senders| {
                senders
                    .iter()
                    .filter_map(|boxed| boxed.downcast_ref::<Sender<T>>().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn replace<T: EventType>(&mut self, senders: Vec<Sender<T>>) {
        let boxed = senders
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn Any + Send>)
            .collect();
        self.subscribers.insert(T::type_id(), boxed);
    }
}

/// Main synchronous message bus for sync events
#[derive(Default)]
pub struct MessageBus {
    registry: Mutex<SubscriberRegistry>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, SubscriberRegistry> {
        // A poisoned registry is still a valid map
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<T: EventType>(&self) -> Consumer<T> {
        let (sender, receiver) = mpsc::channel();
        self.registry().add_subscriber(sender);
        Consumer { receiver }
    }

    /// Publish an event to all subscribers of that event type.
    ///
    /// No subscribers is not an error. Disconnected subscribers are dropped
    /// from the registry and reported as `SubscribersGone`.
    pub fn publish<T: EventType>(&self, event: T) -> MessageBusResult<()> {
        let mut registry = self.registry();
        let senders = registry.senders::<T>();
        if senders.is_empty() {
            return Ok(());
        }

        let total = senders.len();
        let live: Vec<Sender<T>> = senders
            .into_iter()
            .filter(|sender| sender.send(event.clone()).is_ok())
            .collect();
        let failed = total - live.len();
        registry.replace(live);

        if failed > 0 {
            return Err(MessageBusError::SubscribersGone {
                event_type: T::type_id(),
                dropped: failed,
                total,
            });
        }
        Ok(())
    }

    /// Convenience method to publish a unified Event
    pub fn publish_event(&self, event: Event) -> MessageBusResult<()> {
        match event {
            Event::EntitySkipped(e) => self.publish(e),
            Event::SyncRunStarted(e) => self.publish(e),
            Event::StrategyCompleted(e) => self.publish(e),
            Event::SyncRunFinished(e) => self.publish(e),
        }
    }

    /// Get the number of subscribers for a given event type
    pub fn subscriber_count<T: EventType>(&self) -> usize {
        self.registry().senders::<T>().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::events::{SyncRunFinished, SyncRunStarted};
    use chrono::Utc;

    fn finished(id: &str) -> SyncRunFinished {
        SyncRunFinished {
            correlation_id: CorrelationId::from(id),
            applied: 2,
            failed: 0,
            stopped_early: false,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = MessageBus::new();
        assert!(bus.publish(finished("run-1")).is_ok());
    }

    #[test]
    fn events_are_routed_by_type() {
        let bus = MessageBus::new();
        let mut finished_rx = bus.subscribe::<SyncRunFinished>();
        let mut started_rx = bus.subscribe::<SyncRunStarted>();

        bus.publish_event(Event::SyncRunFinished(finished("run-2")))
            .unwrap();

        let received = finished_rx.try_recv().unwrap();
        assert_eq!(received.correlation_id.as_str(), "run-2");
        assert!(started_rx.try_recv().is_err());
    }

    #[test]
    fn dropped_consumers_are_pruned() {
        let bus = MessageBus::new();
        let keep = bus.subscribe::<SyncRunFinished>();
        let dropped = bus.subscribe::<SyncRunFinished>();
        drop(dropped);
        assert_eq!(bus.subscriber_count::<SyncRunFinished>(), 2);

        assert!(matches!(
            bus.publish(finished("run-3")),
            Err(MessageBusError::SubscribersGone { dropped: 1, .. })
        ));
        assert_eq!(bus.subscriber_count::<SyncRunFinished>(), 1);
        assert!(bus.publish(finished("run-4")).is_ok());
        drop(keep);
    }
}
