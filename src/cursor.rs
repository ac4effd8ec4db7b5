//! Resumable pagination checkpoints for remote pulls.
//!
//! A [`ScrollCursor`] is only meaningful under the scope it was captured in.
//! [`ScopeTracker`] persists the enabled scope set and wipes every cursor
//! when that set changes, forcing a full resync of the new scope.

use crate::db_operations::SyncDb;
use crate::entity::EntityType;
use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Identifies one cursor: an entity type, optionally narrowed to a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorKey {
    pub entity: EntityType,
    pub scope: Option<String>,
}

impl CursorKey {
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            scope: None,
        }
    }

    pub fn scoped(entity: EntityType, scope: impl Into<String>) -> Self {
        Self {
            entity,
            scope: Some(scope.into()),
        }
    }

    /// Key under which the cursor is stored
    pub fn storage_key(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}@{}", self.entity, scope),
            None => self.entity.to_string(),
        }
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Opaque checkpoint token returned by the remote API after a page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollCursor {
    pub key: String,
    pub token: String,
    pub updated_at: DateTime<Utc>,
}

/// Read/write access to cursors as seen by a strategy.
pub trait CursorProvider: Send + Sync {
    /// Stored cursor for `key`; `None` means start from the beginning
    fn load(&self, key: &CursorKey) -> SyncResult<Option<ScrollCursor>>;

    /// Persist the position reached after a successfully processed page
    fn checkpoint(&self, key: &CursorKey, token: &str) -> SyncResult<()>;
}

/// Cursor store over the `scroll_cursors` tree. Writes are last-write-wins;
/// the status lock guarantees a single writer.
pub struct ScrollCursorStore {
    db: SyncDb,
}

impl ScrollCursorStore {
    pub fn new(db: SyncDb) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &CursorKey) -> SyncResult<Option<ScrollCursor>> {
        self.db.get_from_tree(self.db.cursor_tree(), &key.storage_key())
    }

    /// Upsert the cursor for `key`
    pub fn save(&self, key: &CursorKey, token: &str) -> SyncResult<ScrollCursor> {
        let cursor = ScrollCursor {
            key: key.storage_key(),
            token: token.to_string(),
            updated_at: Utc::now(),
        };
        self.db
            .store_in_tree(self.db.cursor_tree(), &cursor.key, &cursor)?;
        crate::log_cursor_debug!("💾 Saved cursor for {}: {}", cursor.key, cursor.token);
        Ok(cursor)
    }

    /// Delete every stored cursor. Returns how many were removed.
    pub fn invalidate_all(&self) -> SyncResult<usize> {
        let tree = self.db.cursor_tree();
        let removed = tree.len();
        tree.clear()?;
        tree.flush()?;
        crate::log_cursor_info!("🗑️ Invalidated {} scroll cursors", removed);
        Ok(removed)
    }

    pub fn list(&self) -> SyncResult<Vec<ScrollCursor>> {
        Ok(self
            .db
            .list_items_in_tree::<ScrollCursor>(self.db.cursor_tree())?
            .into_iter()
            .map(|(_, cursor)| cursor)
            .collect())
    }
}

impl CursorProvider for ScrollCursorStore {
    fn load(&self, key: &CursorKey) -> SyncResult<Option<ScrollCursor>> {
        self.get(key)
    }

    fn checkpoint(&self, key: &CursorKey, token: &str) -> SyncResult<()> {
        self.save(key, token).map(|_| ())
    }
}

const ENABLED_SCOPES_KEY: &str = "enabled_scopes";

/// Tracks the enabled scope set (organizational units) and invalidates
/// cursors whenever it changes.
pub struct ScopeTracker {
    db: SyncDb,
    cursors: Arc<ScrollCursorStore>,
}

impl ScopeTracker {
    pub fn new(db: SyncDb, cursors: Arc<ScrollCursorStore>) -> Self {
        Self { db, cursors }
    }

    /// Currently recorded scope set
    pub fn current(&self) -> SyncResult<Option<BTreeSet<String>>> {
        self.db.get_from_tree(self.db.scope_tree(), ENABLED_SCOPES_KEY)
    }

    /// Record `scopes` as the enabled set. Returns `true` if the set changed,
    /// in which case all cursors were invalidated.
    pub fn apply<S: AsRef<str>>(&self, scopes: &[S]) -> SyncResult<bool> {
        let next: BTreeSet<String> = scopes
            .iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if self.current()?.as_ref() == Some(&next) {
            return Ok(false);
        }

        let removed = self.cursors.invalidate_all()?;
        self.db
            .store_in_tree(self.db.scope_tree(), ENABLED_SCOPES_KEY, &next)?;
        crate::log_cursor_info!(
            "🔁 Enabled scopes changed to {:?}, dropped {} cursors",
            next,
            removed
        );
        Ok(true)
    }
}
