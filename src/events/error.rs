use thiserror::Error;

/// Delivery failures on the sync message bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageBusError {
    /// Some subscribers of `event_type` dropped their consumer; they were pruned
    #[error("{dropped} of {total} {event_type} subscribers are gone")]
    SubscribersGone {
        event_type: &'static str,
        dropped: usize,
        total: usize,
    },
}

pub type MessageBusResult<T> = Result<T, MessageBusError>;
