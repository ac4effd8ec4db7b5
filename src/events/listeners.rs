//! Background listeners for sync events.

use super::{Consumer, EntitySkipped, MessageBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Consumes [`EntitySkipped`] events on a dedicated thread, logging a
/// notification line for the acting identity and keeping the events for
/// the end-of-run summary.
pub struct SkipLogListener {
    received: Arc<Mutex<Vec<EntitySkipped>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SkipLogListener {
    pub fn spawn(bus: &MessageBus) -> Self {
        let mut consumer = bus.subscribe::<EntitySkipped>();
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let received = Arc::clone(&received);
            let stop = Arc::clone(&stop);
            thread::spawn(move || Self::run(&mut consumer, &received, &stop))
        };

        Self {
            received,
            stop,
            thread: Some(thread),
        }
    }

    fn run(
        consumer: &mut Consumer<EntitySkipped>,
        received: &Mutex<Vec<EntitySkipped>>,
        stop: &AtomicBool,
    ) {
        loop {
            match consumer.recv_timeout(POLL_INTERVAL) {
                Ok(event) => Self::record(received, event),
                Err(RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Deliveries that raced the stop flag
        for event in consumer.drain() {
            Self::record(received, event);
        }
    }

    fn record(received: &Mutex<Vec<EntitySkipped>>, event: EntitySkipped) {
        crate::log_events_info!(
            "📢 Notify {}: {} was not synchronized by {} ({})",
            event.causer.as_deref().unwrap_or("sync administrators"),
            event.entity,
            event.strategy,
            event.reason
        );
        if let Ok(mut events) = received.lock() {
            events.push(event);
        }
    }

    /// Skip events seen so far
    pub fn received(&self) -> Vec<EntitySkipped> {
        self.received
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Stop the listener thread and return every event it saw
    pub fn stop(mut self) -> Vec<EntitySkipped> {
        self.shutdown();
        self.received()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                crate::log_events_error!("❌ Skip listener thread panicked");
            }
        }
    }
}

impl Drop for SkipLogListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::entity::{EntityRef, EntityType};
    use crate::events::SkipSide;
    use crate::strategy::SyncDirection;
    use chrono::Utc;

    #[test]
    fn collects_published_skips() {
        let bus = MessageBus::new();
        let listener = SkipLogListener::spawn(&bus);

        for id in ["a", "b"] {
            bus.publish(EntitySkipped {
                correlation_id: CorrelationId::from("run-1"),
                strategy: "PullContactStrategy".to_string(),
                direction: SyncDirection::Pull,
                entity: EntityRef::remote(EntityType::Contact, Some(id.to_string())),
                reason: "missing company linkage".to_string(),
                causer: None,
                side: SkipSide::Remote,
                occurred_at: Utc::now(),
            })
            .unwrap();
        }

        let events = listener.stop();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].entity.remote_id.as_deref(), Some("b"));
    }
}
