//! # Pipeliner Sync Library
//!
//! This library implements the bidirectional synchronization engine between the
//! local system and the Pipeliner CRM. A run takes a cross-process status lock,
//! executes a selected set of per-entity strategies in each requested direction
//! and always releases the lock again.
//!
//! ## Core Components
//!
//! * `status` - Durable, expiring lock that serializes sync runs
//! * `orchestration` - Sequential strategy execution and run reports
//! * `strategy` - Strategy identities, registry, filters and outcome policies
//! * `strategies` - Standard push and pull strategies over the remote client
//! * `cursor` - Scroll cursors for incremental pulls and scope tracking
//! * `events` - Message bus carrying skip and run lifecycle events
//! * `cancellation` - Termination signal handling for running syncs
//! * `command` - The lock-owning driver used by the CLI
//!
//! ## Architecture
//!
//! All durable state (lock row, cursors, local records) lives in one sled
//! database opened through [`SyncDb`]. The remote CRM is reached only through
//! the [`RemoteClient`] trait and local records only through [`LocalStore`],
//! so strategies can be exercised against in-memory collaborators from the
//! `testing` module.

pub mod cancellation;
pub mod command;
pub mod config;
pub mod constants;
pub mod correlation;
pub mod cursor;
pub mod db_operations;
pub mod entity;
pub mod error;
pub mod events;
pub mod local;
pub mod logging;
pub mod orchestration;
pub mod remote;
pub mod status;
pub mod strategies;
pub mod strategy;
pub mod testing;

// Re-export main types for convenience
pub use command::{RunOutcome, SyncCommand, SyncRequest};
pub use config::{load_sync_config, RemoteConfig, SyncConfig};
pub use correlation::CorrelationId;
pub use cursor::{CursorKey, CursorProvider, ScopeTracker, ScrollCursor, ScrollCursorStore};
pub use db_operations::SyncDb;
pub use entity::{EntityRef, EntityType, LocalRecord, ModelType, RemoteRecord};
pub use error::{SyncError, SyncResult};
pub use events::{EntitySkipped, Event, MessageBus, SkipEventEmitter};
pub use local::{LocalStore, SledLocalStore};
pub use orchestration::{StrategyResult, SyncOrchestrator, SyncReport, SyncRun};
pub use remote::{RemoteClient, RemoteError};
pub use status::{SyncStatus, SyncStatusLock};
pub use strategies::standard_registry;
pub use strategy::{
    DirectionSet, StrategyFilter, StrategyId, StrategyPolicy, StrategyRegistry, SyncDirection,
    SyncStrategy,
};
