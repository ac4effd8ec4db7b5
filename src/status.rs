//! Durable, named mutual-exclusion record for sync runs.
//!
//! The record lives in the `sync_status` tree under the lock name and is
//! never deleted: releasing it clears the holder but keeps the row, so the
//! last owner and release time stay inspectable. Every state change goes
//! through a single `compare_and_swap` on that row, which makes acquisition
//! atomic across processes sharing the same database.

use crate::db_operations::SyncDb;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::IVec;
use std::sync::Mutex;
use uuid::Uuid;

/// Persisted state of the sync status lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub lock_name: String,
    /// Human-meaningful label of whoever started the run (observability only)
    pub owner: Option<String>,
    /// Process-unique token of the current holder; `None` when released
    pub holder: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub ttl_secs: u64,
    pub released_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    fn idle(lock_name: &str, ttl_secs: u64) -> Self {
        Self {
            lock_name: lock_name.to_string(),
            owner: None,
            holder: None,
            acquired_at: None,
            ttl_secs,
            released_at: None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.holder.is_some()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let acquired_at = self.acquired_at?;
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        acquired_at.checked_add_signed(Duration::seconds(ttl))
    }

    /// Held and not yet past its TTL at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_held() {
            return false;
        }
        match self.expires_at() {
            Some(expires_at) => now < expires_at,
            // An overflowing expiry means the TTL never elapses
            None => self.acquired_at.is_some(),
        }
    }

    fn held_by(&self, holder: &str) -> bool {
        self.holder.as_deref() == Some(holder)
    }
}

/// Ownable mutual-exclusion lock over the `sync_status` tree.
///
/// Each instance carries its own holder token, so two instances (in one
/// process or in two) exclude each other exactly like two processes would.
pub struct SyncStatusLock {
    tree: sled::Tree,
    lock_name: String,
    ttl_secs: u64,
    holder_id: String,
    owner: Mutex<Option<String>>,
}

impl SyncStatusLock {
    pub fn new(db: &SyncDb, lock_name: &str, ttl_secs: u64) -> Self {
        Self {
            tree: db.status_tree().clone(),
            lock_name: lock_name.to_string(),
            ttl_secs,
            holder_id: format!("{}:{}", std::process::id(), Uuid::new_v4()),
            owner: Mutex::new(None),
        }
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Token identifying this instance as a holder
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Atomically take the lock if nobody else holds a live claim on it.
    ///
    /// Returns `Ok(false)` whenever a live claim exists, including one held by
    /// this instance; that is the normal "another sync is in progress" signal,
    /// not an error. Never waits.
    pub fn acquire(&self) -> SyncResult<bool> {
        loop {
            let (current_bytes, current) = self.load_raw()?;
            let now = Utc::now();

            if let Some(status) = &current {
                if status.is_live_at(now) {
                    crate::log_lock_info!(
                        "🔒 Lock '{}' is held by {} (owner: {}), not acquiring",
                        self.lock_name,
                        status.holder.as_deref().unwrap_or("?"),
                        status.owner.as_deref().unwrap_or("unknown")
                    );
                    return Ok(false);
                }
                if status.is_held() && !status.held_by(&self.holder_id) {
                    crate::log_lock_warn!(
                        "⏰ Lock '{}' held by {} expired at {:?}, taking it over",
                        self.lock_name,
                        status.holder.as_deref().unwrap_or("?"),
                        status.expires_at()
                    );
                }
            }

            let next = SyncStatus {
                lock_name: self.lock_name.clone(),
                owner: self.owner_label(),
                holder: Some(self.holder_id.clone()),
                acquired_at: Some(now),
                ttl_secs: self.ttl_secs,
                released_at: current.as_ref().and_then(|s| s.released_at),
            };

            if self.swap(current_bytes, &next)? {
                crate::log_lock_info!(
                    "✅ Acquired lock '{}' as {} (owner: {})",
                    self.lock_name,
                    self.holder_id,
                    next.owner.as_deref().unwrap_or("unknown")
                );
                return Ok(true);
            }
            crate::log_lock_debug!("Lost acquire race on '{}', re-reading", self.lock_name);
        }
    }

    /// Clear ownership if this instance holds the lock; a no-op otherwise.
    pub fn release(&self) -> SyncResult<()> {
        loop {
            let (current_bytes, current) = self.load_raw()?;
            let status = match current {
                Some(status) if status.held_by(&self.holder_id) => status,
                _ => {
                    crate::log_lock_debug!(
                        "Release of '{}' requested but not held by {}",
                        self.lock_name,
                        self.holder_id
                    );
                    return Ok(());
                }
            };

            let next = SyncStatus {
                holder: None,
                released_at: Some(Utc::now()),
                ..status
            };
            if self.swap(current_bytes, &next)? {
                crate::log_lock_info!("🔓 Released lock '{}'", self.lock_name);
                return Ok(());
            }
        }
    }

    /// True if any live, non-expired holder exists.
    pub fn running(&self) -> SyncResult<bool> {
        let (_, current) = self.load_raw()?;
        Ok(current.map(|s| s.is_live_at(Utc::now())).unwrap_or(false))
    }

    /// True if this instance is the current holder and the claim is live.
    pub fn is_held_by_me(&self) -> SyncResult<bool> {
        let (_, current) = self.load_raw()?;
        Ok(current
            .map(|s| s.held_by(&self.holder_id) && s.is_live_at(Utc::now()))
            .unwrap_or(false))
    }

    /// Attach an owner label. Stored with the next acquire, and written to the
    /// row immediately when this instance already holds the lock.
    pub fn set_owner(&self, owner: &str) -> SyncResult<()> {
        {
            let mut label = self
                .owner
                .lock()
                .map_err(|_| SyncError::Storage("Failed to acquire owner label lock".to_string()))?;
            *label = Some(owner.to_string());
        }

        loop {
            let (current_bytes, current) = self.load_raw()?;
            let status = match current {
                Some(status) if status.held_by(&self.holder_id) => status,
                _ => return Ok(()),
            };
            let next = SyncStatus {
                owner: Some(owner.to_string()),
                ..status
            };
            if self.swap(current_bytes, &next)? {
                return Ok(());
            }
        }
    }

    /// Extend the claim of this instance. Returns `Ok(false)` when the lock is
    /// no longer held by this instance (released, or taken over after expiry).
    pub fn refresh(&self) -> SyncResult<bool> {
        loop {
            let (current_bytes, current) = self.load_raw()?;
            let status = match current {
                Some(status) if status.held_by(&self.holder_id) => status,
                _ => return Ok(false),
            };
            let next = SyncStatus {
                acquired_at: Some(Utc::now()),
                ..status
            };
            if self.swap(current_bytes, &next)? {
                return Ok(true);
            }
        }
    }

    /// Current persisted record, or an idle record if the lock was never taken.
    pub fn status(&self) -> SyncResult<SyncStatus> {
        let (_, current) = self.load_raw()?;
        Ok(current.unwrap_or_else(|| SyncStatus::idle(&self.lock_name, self.ttl_secs)))
    }

    fn owner_label(&self) -> Option<String> {
        self.owner.lock().ok().and_then(|label| label.clone())
    }

    fn load_raw(&self) -> SyncResult<(Option<IVec>, Option<SyncStatus>)> {
        let bytes = self.tree.get(self.lock_name.as_bytes())?;
        let status = match &bytes {
            Some(raw) => Some(serde_json::from_slice::<SyncStatus>(raw)?),
            None => None,
        };
        Ok((bytes, status))
    }

    /// Conditional write of `next` over `expected`. `Ok(false)` means another
    /// writer changed the row first.
    fn swap(&self, expected: Option<IVec>, next: &SyncStatus) -> SyncResult<bool> {
        let encoded = serde_json::to_vec(next)?;
        match self
            .tree
            .compare_and_swap(self.lock_name.as_bytes(), expected, Some(encoded))?
        {
            Ok(()) => {
                self.tree.flush()?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}
