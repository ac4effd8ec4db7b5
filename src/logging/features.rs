//! Feature-specific logging macros and utilities
//!
//! Each component of the sync engine logs under its own target so runs can be
//! filtered per concern (`RUST_LOG=pipeliner_sync::lock=debug`).

/// Feature categories for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFeature {
    Orchestrator,
    Lock,
    Cursor,
    Strategy,
    Remote,
    Events,
}

impl LogFeature {
    pub const ALL: [LogFeature; 6] = [
        LogFeature::Orchestrator,
        LogFeature::Lock,
        LogFeature::Cursor,
        LogFeature::Strategy,
        LogFeature::Remote,
        LogFeature::Events,
    ];

    /// Get the target string for this feature
    pub fn target(&self) -> &'static str {
        match self {
            LogFeature::Orchestrator => "pipeliner_sync::orchestrator",
            LogFeature::Lock => "pipeliner_sync::lock",
            LogFeature::Cursor => "pipeliner_sync::cursor",
            LogFeature::Strategy => "pipeliner_sync::strategy",
            LogFeature::Remote => "pipeliner_sync::remote",
            LogFeature::Events => "pipeliner_sync::events",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|feature| feature.target().rsplit("::").next() == Some(name))
    }
}

// Orchestrator-specific logging macros
#[macro_export]
macro_rules! log_orchestrator_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pipeliner_sync::orchestrator", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_orchestrator_info {
    ($($arg:tt)*) => {
        log::info!(target: "pipeliner_sync::orchestrator", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_orchestrator_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pipeliner_sync::orchestrator", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_orchestrator_error {
    ($($arg:tt)*) => {
        log::error!(target: "pipeliner_sync::orchestrator", $($arg)*)
    };
}

// Lock-specific logging macros
#[macro_export]
macro_rules! log_lock_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pipeliner_sync::lock", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_lock_info {
    ($($arg:tt)*) => {
        log::info!(target: "pipeliner_sync::lock", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_lock_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pipeliner_sync::lock", $($arg)*)
    };
}

// Cursor-specific logging macros
#[macro_export]
macro_rules! log_cursor_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pipeliner_sync::cursor", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_cursor_info {
    ($($arg:tt)*) => {
        log::info!(target: "pipeliner_sync::cursor", $($arg)*)
    };
}

// Strategy-specific logging macros
#[macro_export]
macro_rules! log_strategy_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pipeliner_sync::strategy", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_strategy_info {
    ($($arg:tt)*) => {
        log::info!(target: "pipeliner_sync::strategy", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_strategy_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pipeliner_sync::strategy", $($arg)*)
    };
}

// Remote-specific logging macros
#[macro_export]
macro_rules! log_remote_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "pipeliner_sync::remote", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_remote_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pipeliner_sync::remote", $($arg)*)
    };
}

// Event-specific logging macros
#[macro_export]
macro_rules! log_events_info {
    ($($arg:tt)*) => {
        log::info!(target: "pipeliner_sync::events", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_events_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "pipeliner_sync::events", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_events_error {
    ($($arg:tt)*) => {
        log::error!(target: "pipeliner_sync::events", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_targets_are_unique() {
        let mut targets: Vec<_> = LogFeature::ALL.iter().map(|f| f.target()).collect();
        targets.sort();
        targets.dedup();
        assert_eq!(targets.len(), LogFeature::ALL.len());
    }

    #[test]
    fn feature_lookup_by_short_name() {
        assert_eq!(LogFeature::from_name("lock"), Some(LogFeature::Lock));
        assert_eq!(LogFeature::from_name("nope"), None);
    }
}
