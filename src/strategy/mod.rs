//! # Sync strategies
//!
//! A strategy is the unit of sync logic for one entity type. The orchestrator
//! only knows the [`SyncStrategy`] trait: which directions a strategy
//! supports, what policy turns its per-entity outcomes into an `ok` flag, and
//! how to run it. Per-entity problems are recorded on the
//! [`StrategyContext`]; only [`StrategyError`] leaves a strategy call.

pub mod registry;

pub use registry::{StrategyFilter, StrategyRegistry};

use crate::correlation::CorrelationId;
use crate::cursor::{CursorKey, CursorProvider, ScrollCursor};
use crate::entity::{EntityRef, EntityType, LocalRecord};
use crate::error::SyncError;
use crate::events::{EntitySkipped, SkipEventEmitter, SkipSide};
use crate::remote::RemoteError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Push writes local data to the remote; pull reads remote data locally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Push => "push",
            SyncDirection::Pull => "pull",
        }
    }

    fn pascal_name(&self) -> &'static str {
        match self {
            SyncDirection::Push => "Push",
            SyncDirection::Pull => "Pull",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of directions, iterated push before pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectionSet {
    push: bool,
    pull: bool,
}

impl DirectionSet {
    pub const fn both() -> Self {
        Self {
            push: true,
            pull: true,
        }
    }

    pub const fn push_only() -> Self {
        Self {
            push: true,
            pull: false,
        }
    }

    pub const fn pull_only() -> Self {
        Self {
            push: false,
            pull: true,
        }
    }

    pub fn from_directions(directions: &[SyncDirection]) -> Self {
        directions.iter().fold(Self::default(), |mut set, d| {
            match d {
                SyncDirection::Push => set.push = true,
                SyncDirection::Pull => set.pull = true,
            }
            set
        })
    }

    pub fn contains(&self, direction: SyncDirection) -> bool {
        match direction {
            SyncDirection::Push => self.push,
            SyncDirection::Pull => self.pull,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.push && !self.pull
    }

    pub fn iter(&self) -> impl Iterator<Item = SyncDirection> + '_ {
        [SyncDirection::Push, SyncDirection::Pull]
            .into_iter()
            .filter(move |d| self.contains(*d))
    }

    pub fn to_vec(&self) -> Vec<SyncDirection> {
        self.iter().collect()
    }
}

impl fmt::Display for DirectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(|d| d.as_str()).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

/// Compile-time-checked strategy identity: one push and one pull identity
/// per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StrategyId {
    pub direction: SyncDirection,
    pub entity: EntityType,
}

impl StrategyId {
    pub const fn push(entity: EntityType) -> Self {
        Self {
            direction: SyncDirection::Push,
            entity,
        }
    }

    pub const fn pull(entity: EntityType) -> Self {
        Self {
            direction: SyncDirection::Pull,
            entity,
        }
    }

    /// `PushOpportunityStrategy`
    pub fn qualified_name(&self) -> String {
        format!(
            "{}{}Strategy",
            self.direction.pascal_name(),
            self.entity.pascal_name()
        )
    }

    /// `push-opportunity`
    pub fn short_name(&self) -> String {
        format!("{}-{}", self.direction, self.entity)
    }

    /// Every identity, pushes first then pulls, each in entity order
    pub fn all() -> Vec<StrategyId> {
        EntityType::ALL
            .iter()
            .map(|e| StrategyId::push(*e))
            .chain(EntityType::ALL.iter().map(|e| StrategyId::pull(*e)))
            .collect()
    }

    /// Parse a fully-qualified identity; short names are not accepted here
    pub fn from_qualified(name: &str) -> Option<StrategyId> {
        StrategyId::all()
            .into_iter()
            .find(|id| id.qualified_name() == name)
    }

    fn from_short(name: &str) -> Option<StrategyId> {
        StrategyId::all().into_iter().find(|id| id.short_name() == name)
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

impl FromStr for StrategyId {
    type Err = String;

    /// Accepts both the qualified and the short spelling
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        StrategyId::from_qualified(s)
            .or_else(|| StrategyId::from_short(s))
            .ok_or_else(|| format!("Unknown strategy identity: {}", s))
    }
}

impl TryFrom<String> for StrategyId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrategyId> for String {
    fn from(id: StrategyId) -> Self {
        id.qualified_name()
    }
}

/// How per-entity outcomes map onto a strategy's `ok` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPolicy {
    /// Any failed or skipped entity fails the pass
    FailOnAnyError,
    /// Skips are expected; a failed entity fails the pass
    #[default]
    TolerateSkips,
    /// Only an error returned by the strategy itself fails the pass
    TolerateEntityFailures,
}

impl StrategyPolicy {
    pub fn evaluate(&self, outcome: &OutcomeTally, strategy_failed: bool) -> bool {
        if strategy_failed {
            return false;
        }
        match self {
            StrategyPolicy::FailOnAnyError => outcome.errors.is_empty() && outcome.skipped.is_empty(),
            StrategyPolicy::TolerateSkips => outcome.errors.is_empty(),
            StrategyPolicy::TolerateEntityFailures => true,
        }
    }
}

/// Errors that leave a strategy call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    /// The strategy's pass failed; the run continues with the next strategy
    #[error("{0}")]
    Failed(String),

    /// Every subsequent call would fail the same way; the run aborts
    #[error("{0}")]
    Fatal(String),
}

impl StrategyError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StrategyError::Fatal(_))
    }
}

impl From<RemoteError> for StrategyError {
    fn from(error: RemoteError) -> Self {
        if error.is_run_fatal() {
            StrategyError::Fatal(error.to_string())
        } else {
            StrategyError::Failed(error.to_string())
        }
    }
}

impl From<SyncError> for StrategyError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::Storage(_) | SyncError::LockLost(_) | SyncError::Fatal { .. } => {
                StrategyError::Fatal(error.to_string())
            }
            other => StrategyError::Failed(other.to_string()),
        }
    }
}

/// Outcome of processing one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    Synced,
    Skipped { reason: String },
    Failed { error: String },
}

/// Per-entity outcomes collected during one (strategy, direction) pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub synced: usize,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Everything a strategy may touch during one invocation.
pub struct StrategyContext {
    pub correlation_id: CorrelationId,
    pub direction: SyncDirection,
    pub strategy: StrategyId,
    pub causer: Option<String>,
    cursors: Arc<dyn CursorProvider>,
    skips: Arc<SkipEventEmitter>,
    cancel: CancellationToken,
    outcome: OutcomeTally,
}

impl StrategyContext {
    pub fn new(
        correlation_id: CorrelationId,
        direction: SyncDirection,
        strategy: StrategyId,
        causer: Option<String>,
        cursors: Arc<dyn CursorProvider>,
        skips: Arc<SkipEventEmitter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            correlation_id,
            direction,
            strategy,
            causer,
            cursors,
            skips,
            cancel,
            outcome: OutcomeTally::default(),
        }
    }

    /// Stop was requested; finish the current entity and return
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token of the run this pass belongs to
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cursor(&self, key: &CursorKey) -> Result<Option<ScrollCursor>, StrategyError> {
        Ok(self.cursors.load(key)?)
    }

    pub fn checkpoint(&self, key: &CursorKey, token: &str) -> Result<(), StrategyError> {
        Ok(self.cursors.checkpoint(key, token)?)
    }

    pub fn record(&mut self, entity: EntityRef, outcome: EntityOutcome) {
        match outcome {
            EntityOutcome::Synced => self.record_synced(),
            EntityOutcome::Skipped { reason } => self.skip(entity, reason),
            EntityOutcome::Failed { error } => self.record_failure(entity, error),
        }
    }

    pub fn record_synced(&mut self) {
        self.outcome.synced += 1;
    }

    /// Record a skip and raise one [`EntitySkipped`] for it
    pub fn skip(&mut self, entity: EntityRef, reason: impl Into<String>) {
        let reason = reason.into();
        let side = match self.direction {
            SyncDirection::Push => SkipSide::Local,
            SyncDirection::Pull => SkipSide::Remote,
        };
        self.outcome.skipped.push(format!("{}: {}", entity, reason));
        self.skips.emit(EntitySkipped {
            correlation_id: self.correlation_id.clone(),
            strategy: self.strategy.qualified_name(),
            direction: self.direction,
            entity,
            reason,
            causer: self.causer.clone(),
            side,
            occurred_at: Utc::now(),
        });
    }

    pub fn record_failure(&mut self, entity: EntityRef, error: impl fmt::Display) {
        crate::log_strategy_warn!(
            "❌ [{}] {} failed on {}: {}",
            self.correlation_id,
            self.strategy,
            entity,
            error
        );
        self.outcome.errors.push(format!("{}: {}", entity, error));
    }

    pub fn outcome(&self) -> &OutcomeTally {
        &self.outcome
    }

    pub fn into_outcome(self) -> OutcomeTally {
        self.outcome
    }
}

/// Push and/or pull logic for one entity type.
#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Directions this strategy can run in
    fn directions(&self) -> DirectionSet;

    fn policy(&self) -> StrategyPolicy {
        StrategyPolicy::TolerateSkips
    }

    /// Whether single-entity mode may run this strategy for `entity`
    fn supports_model(&self, entity: EntityType) -> bool {
        self.id().entity == entity
    }

    /// Run one pass in `ctx.direction`
    async fn sync(&self, ctx: &mut StrategyContext) -> Result<(), StrategyError>;

    /// Run one pass for a single local record in `ctx.direction`
    async fn sync_model(
        &self,
        record: &LocalRecord,
        ctx: &mut StrategyContext,
    ) -> Result<(), StrategyError> {
        let _ = (record, ctx);
        Err(StrategyError::Failed(format!(
            "{} does not support single-entity sync",
            self.id()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_names() {
        let id = StrategyId::push(EntityType::Opportunity);
        assert_eq!(id.qualified_name(), "PushOpportunityStrategy");
        assert_eq!(id.short_name(), "push-opportunity");
        assert_eq!(
            StrategyId::pull(EntityType::CustomField).short_name(),
            "pull-custom-field"
        );
        assert_eq!("PullUserStrategy".parse::<StrategyId>().unwrap(), StrategyId::pull(EntityType::User));
        assert_eq!("push-task".parse::<StrategyId>().unwrap(), StrategyId::push(EntityType::Task));
        assert!(StrategyId::from_qualified("push-task").is_none());
        assert!("PushWidgetStrategy".parse::<StrategyId>().is_err());
    }

    #[test]
    fn identity_serializes_as_qualified_name() {
        let id = StrategyId::pull(EntityType::Note);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"PullNoteStrategy\"");
        let parsed: StrategyId = serde_json::from_str("\"pull-note\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn all_lists_pushes_first() {
        let all = StrategyId::all();
        assert_eq!(all.len(), EntityType::ALL.len() * 2);
        assert_eq!(all[0], StrategyId::push(EntityType::Opportunity));
        assert_eq!(all[EntityType::ALL.len()], StrategyId::pull(EntityType::Opportunity));
    }

    #[test]
    fn direction_set_iterates_push_first() {
        let set = DirectionSet::from_directions(&[SyncDirection::Pull, SyncDirection::Push]);
        assert_eq!(set, DirectionSet::both());
        assert_eq!(set.to_vec(), vec![SyncDirection::Push, SyncDirection::Pull]);
        assert!(DirectionSet::from_directions(&[]).is_empty());
        assert!(!DirectionSet::push_only().contains(SyncDirection::Pull));
        assert_eq!(DirectionSet::pull_only().to_string(), "pull");
    }

    #[test]
    fn policies_evaluate_outcomes() {
        let with_skip = OutcomeTally {
            synced: 4,
            skipped: vec!["note #1: empty body".to_string()],
            errors: vec![],
        };
        let with_error = OutcomeTally {
            synced: 4,
            skipped: vec![],
            errors: vec!["note #2: HTTP 500".to_string()],
        };

        assert!(!StrategyPolicy::FailOnAnyError.evaluate(&with_skip, false));
        assert!(StrategyPolicy::TolerateSkips.evaluate(&with_skip, false));
        assert!(!StrategyPolicy::TolerateSkips.evaluate(&with_error, false));
        assert!(StrategyPolicy::TolerateEntityFailures.evaluate(&with_error, false));
        assert!(!StrategyPolicy::TolerateEntityFailures.evaluate(&OutcomeTally::default(), true));
    }

    #[test]
    fn error_conversions_classify_fatality() {
        assert!(StrategyError::from(RemoteError::Authentication("401".into())).is_fatal());
        assert!(!StrategyError::from(RemoteError::Unexpected("500".into())).is_fatal());
        assert!(StrategyError::from(SyncError::Storage("io".into())).is_fatal());
        assert!(!StrategyError::from(SyncError::Serialization("bad".into())).is_fatal());
    }
}
