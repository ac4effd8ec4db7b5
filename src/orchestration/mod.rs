//! Strategy orchestration and run reports.

pub mod orchestrator;
pub mod report;

pub use orchestrator::SyncOrchestrator;
pub use report::{StrategyResult, SyncReport, SyncRun};
