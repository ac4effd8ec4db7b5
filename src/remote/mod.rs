//! Narrow contract with the remote CRM API.
//!
//! The engine never sees the wire protocol; strategies only call
//! [`RemoteClient::push`], [`RemoteClient::pull`] and [`RemoteClient::fetch`].
//! Every failure is tagged with a [`RemoteError`] kind so the caller can
//! decide between skipping one entity and aborting the run.

pub mod http;

pub use http::HttpRemoteClient;

use crate::cursor::ScrollCursor;
use crate::entity::{EntityType, RemoteRecord};
use async_trait::async_trait;
use thiserror::Error;

/// Where a pull starts reading the remote feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedPosition {
    /// Start-of-feed sentinel, used when no cursor is stored
    Start,
    After(String),
}

impl FeedPosition {
    pub fn from_cursor(cursor: Option<&ScrollCursor>) -> Self {
        match cursor {
            Some(cursor) => FeedPosition::After(cursor.token.clone()),
            None => FeedPosition::Start,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            FeedPosition::Start => None,
            FeedPosition::After(token) => Some(token),
        }
    }
}

/// One page of a paginated remote read.
#[derive(Debug, Clone, Default)]
pub struct PulledPage {
    pub records: Vec<RemoteRecord>,
    /// Position after this page; checkpointed once the page is processed
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Result of a successful push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub remote_id: String,
}

/// Failure kinds surfaced by a remote client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials rejected; every later call fails the same way
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote unreachable or timing out
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    #[error("Remote record not found: {0}")]
    NotFound(String),

    /// The remote refused this particular record (validation, conflict)
    #[error("Remote rejected record: {0}")]
    Rejected(String),

    #[error("Unexpected remote response: {0}")]
    Unexpected(String),
}

impl RemoteError {
    /// Errors that would make every subsequent call fail identically
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            RemoteError::Authentication(_) | RemoteError::Connectivity(_)
        )
    }

    /// Errors scoped to one record, reported as a skip
    pub fn is_skippable(&self) -> bool {
        matches!(self, RemoteError::NotFound(_) | RemoteError::Rejected(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Client for the remote CRM. Implementations bound each request with their
/// own timeout; the orchestrator does not.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Create or update one record. A record without `id` is created.
    async fn push(&self, entity: EntityType, record: &RemoteRecord) -> RemoteResult<PushReceipt>;

    /// Read one page of `entity` starting at `position`
    async fn pull(
        &self,
        entity: EntityType,
        position: &FeedPosition,
        page_size: usize,
    ) -> RemoteResult<PulledPage>;

    /// Read a single record by remote id
    async fn fetch(&self, entity: EntityType, remote_id: &str) -> RemoteResult<Option<RemoteRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn missing_cursor_starts_at_feed_start() {
        assert_eq!(FeedPosition::from_cursor(None), FeedPosition::Start);
        assert_eq!(FeedPosition::Start.token(), None);

        let cursor = ScrollCursor {
            key: "opportunity".to_string(),
            token: "c-42".to_string(),
            updated_at: Utc::now(),
        };
        let position = FeedPosition::from_cursor(Some(&cursor));
        assert_eq!(position, FeedPosition::After("c-42".to_string()));
        assert_eq!(position.token(), Some("c-42"));
    }

    #[test]
    fn error_classification() {
        assert!(RemoteError::Authentication("401".into()).is_run_fatal());
        assert!(RemoteError::Connectivity("timeout".into()).is_run_fatal());
        assert!(RemoteError::Rejected("422".into()).is_skippable());
        assert!(RemoteError::NotFound("x".into()).is_skippable());
        let unexpected = RemoteError::Unexpected("500".into());
        assert!(!unexpected.is_run_fatal());
        assert!(!unexpected.is_skippable());
    }
}
