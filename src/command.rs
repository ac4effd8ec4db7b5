//! The lock-owning driver behind the CLI.
//!
//! [`SyncCommand`] resolves the request, takes the status lock, runs the
//! orchestrator and releases the lock on every exit path. Lock release and
//! the unit of work share one error boundary here; the orchestrator never
//! touches the lock lifecycle.

use crate::cancellation::CancellationSignal;
use crate::constants::DEFAULT_STATUS_OWNER;
use crate::correlation::CorrelationId;
use crate::cursor::ScopeTracker;
use crate::entity::ModelType;
use crate::error::{SyncError, SyncResult};
use crate::orchestration::{SyncOrchestrator, SyncReport};
use crate::status::{SyncStatus, SyncStatusLock};
use crate::strategy::{DirectionSet, StrategyFilter};
use colored::Colorize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parameters of one `sync` invocation.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub directions: DirectionSet,
    pub filter: StrategyFilter,
    /// Acting identity recorded on events
    pub causer: Option<String>,
    /// Observability label stored on the lock row
    pub status_owner: Option<String>,
    pub correlation_id: CorrelationId,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            directions: DirectionSet::both(),
            filter: StrategyFilter::defaults(),
            causer: None,
            status_owner: None,
            correlation_id: CorrelationId::new(),
        }
    }
}

impl SyncRequest {
    pub fn new(directions: DirectionSet) -> Self {
        Self {
            directions,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: StrategyFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_causer(mut self, causer: impl Into<String>) -> Self {
        self.causer = Some(causer.into());
        self
    }

    pub fn with_status_owner(mut self, owner: impl Into<String>) -> Self {
        self.status_owner = Some(owner.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    fn owner_label(&self) -> String {
        self.status_owner
            .clone()
            .or_else(|| self.causer.clone())
            .unwrap_or_else(|| DEFAULT_STATUS_OWNER.to_string())
    }
}

/// How an invocation ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(SyncReport),
    /// A stop was requested; the report covers the passes that ran
    StoppedEarly(SyncReport),
    /// Another run holds the lock; nothing was attempted
    LockBusy(SyncStatus),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            RunOutcome::Completed(report) | RunOutcome::StoppedEarly(report) => Some(report),
            RunOutcome::LockBusy(_) => None,
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed(_) | RunOutcome::LockBusy(_) => 0,
            RunOutcome::StoppedEarly(_) => 130,
        }
    }
}

/// Releases the status lock when dropped, including on panic unwinding.
struct LockGuard {
    lock: Arc<SyncStatusLock>,
    released: bool,
}

impl LockGuard {
    fn new(lock: Arc<SyncStatusLock>) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    fn release(mut self) -> SyncResult<()> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.lock.release() {
                crate::log_lock_warn!("❌ Failed to release '{}': {}", self.lock.lock_name(), e);
            }
        }
    }
}

pub struct SyncCommand {
    orchestrator: SyncOrchestrator,
    listen_for_signals: bool,
    scopes: Option<(ScopeTracker, Vec<String>)>,
}

impl SyncCommand {
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self {
            orchestrator,
            listen_for_signals: true,
            scopes: None,
        }
    }

    /// Record `scopes` as the enabled set at the start of every run, once the
    /// lock is held. A changed set invalidates all cursors before any strategy
    /// reads one.
    pub fn with_scopes(mut self, tracker: ScopeTracker, scopes: Vec<String>) -> Self {
        self.scopes = Some((tracker, scopes));
        self
    }

    /// Do not install a termination signal listener (embedding, tests)
    pub fn without_signal_handler(mut self) -> Self {
        self.listen_for_signals = false;
        self
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Run a full sync. Returns `LockBusy` without doing any work when another
    /// run is in progress.
    pub async fn run(&self, request: &SyncRequest) -> SyncResult<RunOutcome> {
        if request.directions.is_empty() {
            return Err(SyncError::Configuration(
                "No sync method requested (expected push and/or pull)".to_string(),
            ));
        }
        // Unknown names are rejected before the lock is touched
        self.orchestrator.registry().resolve(&request.filter)?;

        self.locked(&request.owner_label(), |cancel| async move {
            self.orchestrator
                .sync(
                    request.directions,
                    &request.filter,
                    &request.correlation_id,
                    request.causer.as_deref(),
                    &cancel,
                )
                .await
        })
        .await
    }

    /// Run the strategies applicable to one local record
    pub async fn run_model(
        &self,
        directions: DirectionSet,
        model_type: ModelType,
        model_id: &str,
        causer: Option<&str>,
    ) -> SyncResult<RunOutcome> {
        let correlation_id = CorrelationId::new();
        let owner = causer.unwrap_or(DEFAULT_STATUS_OWNER).to_string();
        let correlation_id = &correlation_id;
        self.locked(&owner, |cancel| async move {
            self.orchestrator
                .sync_model(directions, model_type, model_id, correlation_id, causer, &cancel)
                .await
        })
        .await
    }

    async fn locked<F, Fut>(&self, owner: &str, work: F) -> SyncResult<RunOutcome>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = SyncResult<SyncReport>>,
    {
        let lock = Arc::clone(self.orchestrator.lock());
        lock.set_owner(owner)?;
        if !lock.acquire()? {
            let status = lock.status()?;
            crate::log_orchestrator_info!(
                "⏭️ Sync already in progress (owner: {}), skipping this run",
                status.owner.as_deref().unwrap_or("unknown")
            );
            return Ok(RunOutcome::LockBusy(status));
        }

        let guard = LockGuard::new(Arc::clone(&lock));
        if let Some((tracker, scopes)) = &self.scopes {
            if tracker.apply(scopes)? {
                crate::log_orchestrator_info!("🔄 Enabled scopes changed, cursors invalidated");
            }
        }
        let cancel = self.orchestrator.run_token();
        let signal = if self.listen_for_signals {
            CancellationSignal::register(Arc::clone(&lock), cancel.clone())
        } else {
            CancellationSignal::disabled()
        };

        let result = work(cancel).await;

        signal.disarm();
        let released = guard.release();

        let report = result?;
        released?;
        if report.stopped_early {
            Ok(RunOutcome::StoppedEarly(report))
        } else {
            Ok(RunOutcome::Completed(report))
        }
    }
}

/// Per-strategy result table for terminal output
pub fn render_table(report: &SyncReport) -> String {
    let width = report
        .applied
        .iter()
        .map(|r| r.strategy.qualified_name().len())
        .max()
        .unwrap_or(0)
        .max("Strategy".len());

    let mut out = format!(
        "{:<width$}  {:<9}  {:<6}  {:>6}  {:>7}  {:>6}\n",
        "Strategy",
        "Direction",
        "Result",
        "Synced",
        "Skipped",
        "Errors",
        width = width
    );
    for result in &report.applied {
        let status = if result.ok {
            format!("{:<6}", "ok").green()
        } else {
            format!("{:<6}", "fail").red()
        };
        out.push_str(&format!(
            "{:<width$}  {:<9}  {}  {:>6}  {:>7}  {:>6}\n",
            result.strategy.qualified_name(),
            result.direction.as_str(),
            status,
            result.synced,
            result.skipped.len(),
            result.errors.len(),
            width = width
        ));
        for error in &result.errors {
            out.push_str(&format!("    {} {}\n", "error:".red(), error));
        }
        for skip in &result.skipped {
            out.push_str(&format!("    {} {}\n", "skipped:".yellow(), skip));
        }
    }
    if report.stopped_early {
        out.push_str(&format!("{}\n", "Stopped early: remaining strategies were not started".yellow()));
    }
    out
}

/// One-line-per-field rendering of the lock record
pub fn render_status(status: &SyncStatus) -> String {
    let state = if status.is_live_at(chrono::Utc::now()) {
        "running".green()
    } else if status.is_held() {
        "expired".yellow()
    } else {
        "idle".normal()
    };
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    format!(
        "lock:        {}\nstate:       {}\nowner:       {}\nholder:      {}\nacquired at: {}\nexpires at:  {}\nreleased at: {}\n",
        status.lock_name,
        state,
        status.owner.as_deref().unwrap_or("-"),
        status.holder.as_deref().unwrap_or("-"),
        fmt_time(status.acquired_at),
        fmt_time(status.expires_at()),
        fmt_time(status.released_at),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::orchestration::{StrategyResult, SyncRun};
    use crate::strategy::{StrategyId, SyncDirection};
    use chrono::Utc;

    fn report(ok: bool) -> SyncReport {
        SyncReport {
            run: SyncRun {
                correlation_id: CorrelationId::from("run-1"),
                directions: vec![SyncDirection::Push],
                strategies: vec![StrategyId::push(EntityType::Contact)],
                causer: None,
                started_at: Utc::now(),
                finished_at: None,
            },
            applied: vec![StrategyResult {
                strategy: StrategyId::push(EntityType::Contact),
                direction: SyncDirection::Push,
                ok,
                synced: 2,
                skipped: vec!["contact #4: required field 'email' is missing".to_string()],
                errors: if ok { vec![] } else { vec!["contact #5: HTTP 500".to_string()] },
            }],
            stopped_early: false,
        }
    }

    #[test]
    fn table_lists_strategy_and_reasons() {
        let table = render_table(&report(false));
        assert!(table.contains("PushContactStrategy"));
        assert!(table.contains("fail"));
        assert!(table.contains("contact #5: HTTP 500"));
        assert!(table.contains("required field 'email'"));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunOutcome::Completed(report(true)).exit_code(), 0);
        assert_eq!(RunOutcome::StoppedEarly(report(true)).exit_code(), 130);
    }

    #[test]
    fn owner_label_falls_back_to_causer_then_system() {
        let request = SyncRequest::default();
        assert_eq!(request.owner_label(), DEFAULT_STATUS_OWNER);
        let request = request.with_causer("17");
        assert_eq!(request.owner_label(), "17");
        let request = request.with_status_owner("cron");
        assert_eq!(request.owner_label(), "cron");
    }
}
