use super::report::{StrategyResult, SyncReport, SyncRun};
use crate::correlation::CorrelationId;
use crate::cursor::CursorProvider;
use crate::entity::{LocalRecord, ModelType};
use crate::error::{SyncError, SyncResult};
use crate::events::{
    MessageBus, SkipEventEmitter, StrategyCompleted, SyncRunFinished, SyncRunStarted,
};
use crate::local::LocalStore;
use crate::status::SyncStatusLock;
use crate::strategy::{
    DirectionSet, StrategyContext, StrategyFilter, StrategyRegistry, SyncStrategy,
};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs selected strategies sequentially under a lock held by the caller.
///
/// The orchestrator never acquires or releases the status lock itself. It
/// refreshes it at every strategy boundary and treats a lost lock as the end
/// of the run.
pub struct SyncOrchestrator {
    registry: Arc<StrategyRegistry>,
    lock: Arc<SyncStatusLock>,
    cursors: Arc<dyn CursorProvider>,
    local: Arc<dyn LocalStore>,
    bus: Arc<MessageBus>,
    skips: Arc<SkipEventEmitter>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        lock: Arc<SyncStatusLock>,
        cursors: Arc<dyn CursorProvider>,
        local: Arc<dyn LocalStore>,
        bus: Arc<MessageBus>,
    ) -> Self {
        let skips = Arc::new(SkipEventEmitter::new(Arc::clone(&bus)));
        Self {
            registry,
            lock,
            cursors,
            local,
            bus,
            skips,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shutdown token; cancelling it stops the current run and every later one
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fresh token for a single run, cancelled along with the shutdown token
    pub fn run_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn lock(&self) -> &Arc<SyncStatusLock> {
        &self.lock
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Run every strategy selected by `filter` in each requested direction it
    /// supports.
    ///
    /// Configuration problems (no direction, unknown strategy name) are
    /// reported before any strategy runs. A strategy error is recorded and the
    /// run continues unless it is fatal, in which case the remaining
    /// strategies are abandoned and the error is returned. Cancelling `cancel`
    /// stops the run at the next strategy boundary.
    pub async fn sync(
        &self,
        directions: DirectionSet,
        filter: &StrategyFilter,
        correlation_id: &CorrelationId,
        causer: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        if directions.is_empty() {
            return Err(SyncError::Configuration(
                "No sync method requested (expected push and/or pull)".to_string(),
            ));
        }
        let strategies = self.registry.resolve(filter)?;
        self.run_strategies(directions, strategies, correlation_id, causer, None, cancel)
            .await
    }

    /// Diagnostic mode: run the strategies that handle `model_type` against
    /// one local record.
    pub async fn sync_model(
        &self,
        directions: DirectionSet,
        model_type: ModelType,
        model_id: &str,
        correlation_id: &CorrelationId,
        causer: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        if directions.is_empty() {
            return Err(SyncError::Configuration(
                "No sync method requested (expected push and/or pull)".to_string(),
            ));
        }
        let entity = model_type.entity();
        let strategies = self.registry.for_model(entity);
        if strategies.is_empty() {
            return Err(SyncError::Configuration(format!(
                "No strategies registered for model type {}",
                model_type
            )));
        }
        let record = self
            .local
            .find(entity, model_id)?
            .ok_or_else(|| SyncError::NotFound {
                model_type: model_type.to_string(),
                id: model_id.to_string(),
            })?;

        self.run_strategies(directions, strategies, correlation_id, causer, Some(&record), cancel)
            .await
    }

    /// `Ok(false)` when the run must stop before the next strategy.
    fn continue_at_boundary(&self, cancel: &CancellationToken) -> SyncResult<bool> {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        if self.lock.refresh()? {
            return Ok(true);
        }
        // The signal handler cancels first, then releases
        if cancel.is_cancelled() {
            return Ok(false);
        }
        Err(SyncError::LockLost(self.lock.lock_name().to_string()))
    }

    async fn run_strategies(
        &self,
        directions: DirectionSet,
        strategies: Vec<Arc<dyn SyncStrategy>>,
        correlation_id: &CorrelationId,
        causer: Option<&str>,
        target: Option<&LocalRecord>,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport {
            run: SyncRun {
                correlation_id: correlation_id.clone(),
                directions: directions.to_vec(),
                strategies: strategies.iter().map(|s| s.id()).collect(),
                causer: causer.map(str::to_string),
                started_at: Utc::now(),
                finished_at: None,
            },
            applied: Vec::new(),
            stopped_early: false,
        };

        crate::log_orchestrator_info!(
            "🚀 [{}] Starting sync ({}) with {} strategies{}",
            correlation_id,
            directions,
            strategies.len(),
            target
                .map(|r| format!(" for {}", r.entity_ref()))
                .unwrap_or_default()
        );
        self.publish_started(&report.run);

        'strategies: for strategy in &strategies {
            let id = strategy.id();
            let supported = strategy.directions();

            for direction in directions.iter() {
                if !supported.contains(direction) {
                    crate::log_orchestrator_debug!(
                        "{} does not support {}, not requesting it",
                        id,
                        direction
                    );
                    continue;
                }

                match self.continue_at_boundary(cancel) {
                    Ok(true) => {}
                    Ok(false) => {
                        crate::log_orchestrator_warn!(
                            "🛑 [{}] Stop requested, not starting {} ({})",
                            correlation_id,
                            id,
                            direction
                        );
                        report.stopped_early = true;
                        break 'strategies;
                    }
                    Err(e) => {
                        crate::log_orchestrator_error!(
                            "❌ [{}] Aborting run before {}: {}",
                            correlation_id,
                            id,
                            e
                        );
                        self.publish_finished(&mut report);
                        return Err(e);
                    }
                }

                crate::log_orchestrator_info!("🔄 [{}] Running {} ({})", correlation_id, id, direction);
                let mut ctx = StrategyContext::new(
                    correlation_id.clone(),
                    direction,
                    id,
                    causer.map(str::to_string),
                    Arc::clone(&self.cursors),
                    Arc::clone(&self.skips),
                    cancel.clone(),
                );
                let result = match target {
                    Some(record) => strategy.sync_model(record, &mut ctx).await,
                    None => strategy.sync(&mut ctx).await,
                };
                let outcome = ctx.into_outcome();

                let error = match result {
                    Ok(()) => None,
                    Err(e) if e.is_fatal() => {
                        crate::log_orchestrator_error!(
                            "❌ [{}] {} ({}) failed fatally: {}",
                            correlation_id,
                            id,
                            direction,
                            e
                        );
                        report.applied.push(StrategyResult::from_pass(
                            id,
                            direction,
                            strategy.policy(),
                            outcome,
                            Some(&e),
                        ));
                        self.publish_finished(&mut report);
                        return Err(SyncError::fatal(id.qualified_name(), e.to_string()));
                    }
                    Err(e) => Some(e),
                };

                let applied =
                    StrategyResult::from_pass(id, direction, strategy.policy(), outcome, error.as_ref());
                if applied.ok {
                    crate::log_orchestrator_info!(
                        "✅ [{}] {} ({}) ok: {} synced, {} skipped",
                        correlation_id,
                        id,
                        direction,
                        applied.synced,
                        applied.skipped.len()
                    );
                } else {
                    crate::log_orchestrator_warn!(
                        "⚠️ [{}] {} ({}) not ok: {} errors, {} skipped",
                        correlation_id,
                        id,
                        direction,
                        applied.errors.len(),
                        applied.skipped.len()
                    );
                }
                self.publish_completed(correlation_id, &applied);
                report.applied.push(applied);
            }
        }

        // A stop during the last pass leaves it partially done
        if cancel.is_cancelled() {
            report.stopped_early = true;
        }
        self.publish_finished(&mut report);
        crate::log_orchestrator_info!(
            "🏁 [{}] Sync finished: {} passes, {} failed, {} skipped{}",
            correlation_id,
            report.applied.len(),
            report.failed(),
            report.skipped(),
            if report.stopped_early { " (stopped early)" } else { "" }
        );
        Ok(report)
    }

    fn publish_started(&self, run: &SyncRun) {
        let event = SyncRunStarted {
            correlation_id: run.correlation_id.clone(),
            directions: run.directions.clone(),
            strategies: run.strategies.iter().map(|id| id.qualified_name()).collect(),
            causer: run.causer.clone(),
            started_at: run.started_at,
        };
        if let Err(e) = self.bus.publish(event) {
            crate::log_events_error!("Failed to publish SyncRunStarted: {}", e);
        }
    }

    fn publish_completed(&self, correlation_id: &CorrelationId, result: &StrategyResult) {
        let event = StrategyCompleted {
            correlation_id: correlation_id.clone(),
            strategy: result.strategy.qualified_name(),
            direction: result.direction,
            ok: result.ok,
            synced: result.synced,
            skipped: result.skipped.len(),
            errors: result.errors.len(),
        };
        if let Err(e) = self.bus.publish(event) {
            crate::log_events_error!("Failed to publish StrategyCompleted: {}", e);
        }
    }

    fn publish_finished(&self, report: &mut SyncReport) {
        let finished_at = Utc::now();
        report.run.finished_at = Some(finished_at);
        let event = SyncRunFinished {
            correlation_id: report.run.correlation_id.clone(),
            applied: report.applied.len(),
            failed: report.failed(),
            stopped_early: report.stopped_early,
            finished_at,
        };
        if let Err(e) = self.bus.publish(event) {
            crate::log_events_error!("Failed to publish SyncRunFinished: {}", e);
        }
    }
}
