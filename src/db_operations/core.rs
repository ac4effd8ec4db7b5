use crate::entity::EntityType;
use crate::error::{SyncError, SyncResult};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Unified access to the durable store shared by the status lock, the cursor
/// store, the scope tracker and the local entity store.
#[derive(Clone)]
pub struct SyncDb {
    /// The underlying sled database instance
    db: sled::Db,
    /// Cached trees for the shared sync state
    pub(crate) status_tree: sled::Tree,
    pub(crate) cursor_tree: sled::Tree,
    pub(crate) scope_tree: sled::Tree,
}

impl SyncDb {
    /// Opens (or creates) the database at `path` with all required trees
    pub fn open<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Opens a throwaway database that is removed when dropped
    pub fn temporary() -> SyncResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> SyncResult<Self> {
        let status_tree = db.open_tree("sync_status")?;
        let cursor_tree = db.open_tree("scroll_cursors")?;
        let scope_tree = db.open_tree("sync_scopes")?;

        Ok(Self {
            db,
            status_tree,
            cursor_tree,
            scope_tree,
        })
    }

    /// Gets a reference to the underlying database
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub fn status_tree(&self) -> &sled::Tree {
        &self.status_tree
    }

    pub fn cursor_tree(&self) -> &sled::Tree {
        &self.cursor_tree
    }

    pub fn scope_tree(&self) -> &sled::Tree {
        &self.scope_tree
    }

    /// Tree holding local records of one entity type, keyed by local id
    pub fn local_tree(&self, entity: EntityType) -> SyncResult<sled::Tree> {
        Ok(self.db.open_tree(format!("local:{}", entity))?)
    }

    /// Tree mapping remote ids to local ids for one entity type
    pub fn remote_index_tree(&self, entity: EntityType) -> SyncResult<sled::Tree> {
        Ok(self.db.open_tree(format!("remote_index:{}", entity))?)
    }

    /// Gets database statistics
    pub fn get_stats(&self) -> SyncResult<HashMap<String, u64>> {
        let mut stats = HashMap::new();
        stats.insert("sync_status".to_string(), self.status_tree.len() as u64);
        stats.insert("scroll_cursors".to_string(), self.cursor_tree.len() as u64);
        stats.insert("sync_scopes".to_string(), self.scope_tree.len() as u64);
        for entity in EntityType::ALL {
            stats.insert(format!("local:{}", entity), self.local_tree(entity)?.len() as u64);
        }
        Ok(stats)
    }

    // ========== GENERIC TREE OPERATIONS ==========

    /// Store any serializable item in a specific tree and flush it to disk
    pub fn store_in_tree<T: Serialize>(
        &self,
        tree: &sled::Tree,
        key: &str,
        item: &T,
    ) -> SyncResult<()> {
        let bytes = serde_json::to_vec(item)?;
        tree.insert(key.as_bytes(), bytes)?;
        tree.flush()?;
        Ok(())
    }

    /// Retrieve any deserializable item from a specific tree
    pub fn get_from_tree<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: &str,
    ) -> SyncResult<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all key-value pairs in a tree
    pub fn list_items_in_tree<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
    ) -> SyncResult<Vec<(String, T)>> {
        let mut items = Vec::new();
        for result in tree.iter() {
            let (key, value) = result?;
            let key_str = String::from_utf8_lossy(&key).to_string();
            let item = serde_json::from_slice(&value).map_err(|e| {
                SyncError::Serialization(format!(
                    "Deserialization failed for key '{}': {}",
                    key_str, e
                ))
            })?;
            items.push((key_str, item));
        }
        Ok(items)
    }

    /// Delete an item from a specific tree
    pub fn delete_from_tree(&self, tree: &sled::Tree, key: &str) -> SyncResult<bool> {
        let existed = tree.remove(key.as_bytes())?.is_some();
        tree.flush()?;
        Ok(existed)
    }
}
