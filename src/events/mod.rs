//! # Sync events
//!
//! Events published on the [`MessageBus`] during a run. Listeners (activity
//! log, notifications) subscribe per event type and correlate by
//! [`CorrelationId`].

pub mod bus;
pub mod error;
pub mod listeners;
pub mod skip;

pub use bus::{Consumer, MessageBus};
pub use error::{MessageBusError, MessageBusResult};
pub use listeners::SkipLogListener;
pub use skip::SkipEventEmitter;

use crate::correlation::CorrelationId;
use crate::entity::EntityRef;
use crate::strategy::SyncDirection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trait for all event types that can be sent through the message bus
pub trait EventType: Clone + Send + 'static {
    /// Get the unique type identifier for this event type
    fn type_id() -> &'static str;
}

/// Which side of the sync the skipped entity lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipSide {
    /// A local record could not be pushed
    Local,
    /// A remote record could not be pulled
    Remote,
}

/// One entity was deliberately not synchronized; the batch continued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySkipped {
    pub correlation_id: CorrelationId,
    pub strategy: String,
    pub direction: SyncDirection,
    pub entity: EntityRef,
    pub reason: String,
    /// Acting identity of the run, if any
    pub causer: Option<String>,
    pub side: SkipSide,
    pub occurred_at: DateTime<Utc>,
}

impl EventType for EntitySkipped {
    fn type_id() -> &'static str {
        "EntitySkipped"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunStarted {
    pub correlation_id: CorrelationId,
    pub directions: Vec<SyncDirection>,
    pub strategies: Vec<String>,
    pub causer: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl EventType for SyncRunStarted {
    fn type_id() -> &'static str {
        "SyncRunStarted"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCompleted {
    pub correlation_id: CorrelationId,
    pub strategy: String,
    pub direction: SyncDirection,
    pub ok: bool,
    pub synced: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl EventType for StrategyCompleted {
    fn type_id() -> &'static str {
        "StrategyCompleted"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunFinished {
    pub correlation_id: CorrelationId,
    pub applied: usize,
    pub failed: usize,
    pub stopped_early: bool,
    pub finished_at: DateTime<Utc>,
}

impl EventType for SyncRunFinished {
    fn type_id() -> &'static str {
        "SyncRunFinished"
    }
}

/// Unified event enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    EntitySkipped(EntitySkipped),
    SyncRunStarted(SyncRunStarted),
    StrategyCompleted(StrategyCompleted),
    SyncRunFinished(SyncRunFinished),
}

impl Event {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Event::EntitySkipped(e) => &e.correlation_id,
            Event::SyncRunStarted(e) => &e.correlation_id,
            Event::StrategyCompleted(e) => &e.correlation_id,
            Event::SyncRunFinished(e) => &e.correlation_id,
        }
    }
}
