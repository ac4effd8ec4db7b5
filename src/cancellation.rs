//! Termination signal handling.
//!
//! The listener's only job is to trip a [`CancellationToken`] and release the
//! status lock; the orchestrator polls the token at strategy boundaries and
//! strategies poll it between entities.

use crate::status::SyncStatusLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Completes on Ctrl-C, or SIGTERM on unix. A handler that cannot be
/// installed never fires.
pub async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            crate::log_lock_warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                crate::log_lock_warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => crate::log_lock_info!("📢 Received Ctrl+C"),
        _ = terminate => crate::log_lock_info!("📢 Received SIGTERM"),
    }
}

/// Cancel the run, then release the lock if this instance holds a live claim.
pub fn request_stop(lock: &SyncStatusLock, token: &CancellationToken) {
    token.cancel();
    match lock.is_held_by_me() {
        Ok(true) => match lock.release() {
            Ok(()) => crate::log_lock_info!(
                "🛑 Stop requested; released '{}', finishing current unit of work",
                lock.lock_name()
            ),
            Err(e) => crate::log_lock_warn!(
                "Stop requested but releasing '{}' failed: {}",
                lock.lock_name(),
                e
            ),
        },
        Ok(false) => {
            crate::log_lock_debug!("Stop requested; '{}' not held here", lock.lock_name())
        }
        Err(e) => crate::log_lock_warn!("Stop requested but lock state is unreadable: {}", e),
    }
}

/// Signal listener bound to one active run.
pub struct CancellationSignal {
    task: Option<JoinHandle<()>>,
}

impl CancellationSignal {
    /// Listen for termination while this instance owns a running sync.
    ///
    /// Registration is skipped (the returned signal is inert) when the lock is
    /// not held by this instance or no tokio runtime is available.
    pub fn register(lock: Arc<SyncStatusLock>, token: CancellationToken) -> Self {
        match lock.is_held_by_me() {
            Ok(true) => {}
            Ok(false) => {
                crate::log_lock_debug!(
                    "Not listening for signals: '{}' is not held by this process",
                    lock.lock_name()
                );
                return Self::disabled();
            }
            Err(e) => {
                crate::log_lock_warn!("Not listening for signals: {}", e);
                return Self::disabled();
            }
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            crate::log_lock_warn!("Not listening for signals: no async runtime");
            return Self::disabled();
        };

        let finished = token.clone();
        let task = runtime.spawn(async move {
            tokio::select! {
                _ = wait_for_termination() => request_stop(&lock, &token),
                _ = finished.cancelled() => {}
            }
        });
        Self { task: Some(task) }
    }

    /// A signal that never fires, for callers that manage stops themselves
    pub fn disabled() -> Self {
        Self { task: None }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop listening
    pub fn disarm(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CancellationSignal {
    fn drop(&mut self) {
        self.abort();
    }
}
