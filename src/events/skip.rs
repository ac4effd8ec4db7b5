use super::{EntitySkipped, MessageBus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Raises one [`EntitySkipped`] per unsynchronizable entity.
///
/// Publishing failures are logged and swallowed: a missing listener must
/// never halt the batch that produced the skip.
pub struct SkipEventEmitter {
    bus: Arc<MessageBus>,
    emitted: AtomicUsize,
}

impl SkipEventEmitter {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            emitted: AtomicUsize::new(0),
        }
    }

    pub fn emit(&self, event: EntitySkipped) {
        crate::log_events_warn!(
            "⏭️ [{}] {} skipped {}: {}",
            event.correlation_id,
            event.strategy,
            event.entity,
            event.reason
        );
        self.emitted.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.bus.publish(event) {
            crate::log_events_error!("❌ Failed to publish skip event: {}", e);
        }
    }

    /// Number of skip events raised through this emitter
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::Relaxed)
    }
}
