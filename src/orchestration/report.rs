use crate::correlation::CorrelationId;
use crate::strategy::{OutcomeTally, StrategyError, StrategyId, StrategyPolicy, SyncDirection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one (strategy, direction) pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub strategy: StrategyId,
    pub direction: SyncDirection,
    pub ok: bool,
    pub synced: usize,
    /// Per-entity skip reasons
    pub skipped: Vec<String>,
    /// Per-entity failures, plus the strategy's own error if it returned one
    pub errors: Vec<String>,
}

impl StrategyResult {
    pub fn from_pass(
        strategy: StrategyId,
        direction: SyncDirection,
        policy: StrategyPolicy,
        outcome: OutcomeTally,
        error: Option<&StrategyError>,
    ) -> Self {
        let ok = policy.evaluate(&outcome, error.is_some());
        let mut errors = outcome.errors;
        if let Some(error) = error {
            errors.push(error.to_string());
        }
        Self {
            strategy,
            direction,
            ok,
            synced: outcome.synced,
            skipped: outcome.skipped,
            errors,
        }
    }
}

/// The aggregate passed through one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub correlation_id: CorrelationId,
    pub directions: Vec<SyncDirection>,
    pub strategies: Vec<StrategyId>,
    pub causer: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What the orchestrator hands back to the lock owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run: SyncRun,
    pub applied: Vec<StrategyResult>,
    /// A stop was requested and remaining strategies were not started
    pub stopped_early: bool,
}

impl SyncReport {
    pub fn all_ok(&self) -> bool {
        self.applied.iter().all(|r| r.ok)
    }

    pub fn failed(&self) -> usize {
        self.applied.iter().filter(|r| !r.ok).count()
    }

    pub fn skipped(&self) -> usize {
        self.applied.iter().map(|r| r.skipped.len()).sum()
    }
}
