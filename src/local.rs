//! Repository-style access to the local system of record.

use crate::db_operations::SyncDb;
use crate::entity::{EntityType, LocalRecord};
use crate::error::{SyncError, SyncResult};
use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Local persistence consumed by strategies.
///
/// Each method is one entity-level transaction; strategies never need a
/// wider boundary than a single record.
pub trait LocalStore: Send + Sync {
    fn find(&self, entity: EntityType, local_id: &str) -> SyncResult<Option<LocalRecord>>;

    /// Records changed locally since their last push
    fn pending_push(&self, entity: EntityType) -> SyncResult<Vec<LocalRecord>>;

    /// Link a pushed record to its remote id and clear its dirty flag
    fn mark_pushed(&self, entity: EntityType, local_id: &str, remote_id: &str) -> SyncResult<()>;

    /// Insert or update the local copy of a remote record. Returns the local id.
    fn upsert_remote(
        &self,
        entity: EntityType,
        remote_id: &str,
        fields: Map<String, JsonValue>,
    ) -> SyncResult<String>;

    fn save(&self, record: &LocalRecord) -> SyncResult<()>;
}

/// [`LocalStore`] over the `local:<entity>` trees of a [`SyncDb`], with a
/// `remote_index:<entity>` tree mapping remote ids back to local ids.
#[derive(Clone)]
pub struct SledLocalStore {
    db: SyncDb,
}

impl SledLocalStore {
    pub fn new(db: SyncDb) -> Self {
        Self { db }
    }

    fn local_id_for_remote(&self, entity: EntityType, remote_id: &str) -> SyncResult<Option<String>> {
        let index = self.db.remote_index_tree(entity)?;
        self.db.get_from_tree(&index, remote_id)
    }
}

impl LocalStore for SledLocalStore {
    fn find(&self, entity: EntityType, local_id: &str) -> SyncResult<Option<LocalRecord>> {
        let tree = self.db.local_tree(entity)?;
        self.db.get_from_tree(&tree, local_id)
    }

    fn pending_push(&self, entity: EntityType) -> SyncResult<Vec<LocalRecord>> {
        let tree = self.db.local_tree(entity)?;
        let mut records: Vec<LocalRecord> = self
            .db
            .list_items_in_tree::<LocalRecord>(&tree)?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| record.dirty)
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    fn mark_pushed(&self, entity: EntityType, local_id: &str, remote_id: &str) -> SyncResult<()> {
        let mut record = self.find(entity, local_id)?.ok_or_else(|| SyncError::NotFound {
            model_type: entity.to_string(),
            id: local_id.to_string(),
        })?;
        record.remote_id = Some(remote_id.to_string());
        record.dirty = false;
        self.save(&record)
    }

    fn upsert_remote(
        &self,
        entity: EntityType,
        remote_id: &str,
        fields: Map<String, JsonValue>,
    ) -> SyncResult<String> {
        let existing = match self.local_id_for_remote(entity, remote_id)? {
            Some(local_id) => self.find(entity, &local_id)?,
            None => None,
        };

        let record = match existing {
            Some(mut record) => {
                record.fields = fields;
                record.dirty = false;
                record.updated_at = Utc::now();
                record
            }
            None => {
                let mut record = LocalRecord::new(entity, Uuid::new_v4().to_string(), fields);
                record.remote_id = Some(remote_id.to_string());
                record.dirty = false;
                record
            }
        };
        self.save(&record)?;
        Ok(record.id)
    }

    fn save(&self, record: &LocalRecord) -> SyncResult<()> {
        let tree = self.db.local_tree(record.entity_type)?;
        self.db.store_in_tree(&tree, &record.id, record)?;
        if let Some(remote_id) = &record.remote_id {
            let index = self.db.remote_index_tree(record.entity_type)?;
            self.db.store_in_tree(&index, remote_id, &record.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(name: &str) -> Map<String, JsonValue> {
        let mut map = Map::new();
        map.insert("name".to_string(), json!(name));
        map
    }

    #[test]
    fn pushed_records_leave_pending_set() {
        let store = SledLocalStore::new(SyncDb::temporary().unwrap());
        store
            .save(&LocalRecord::new(EntityType::Company, "1", fields("Acme")))
            .unwrap();
        store
            .save(&LocalRecord::new(EntityType::Company, "2", fields("Globex")))
            .unwrap();
        assert_eq!(store.pending_push(EntityType::Company).unwrap().len(), 2);

        store.mark_pushed(EntityType::Company, "1", "r-1").unwrap();
        let pending = store.pending_push(EntityType::Company).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "2");

        let pushed = store.find(EntityType::Company, "1").unwrap().unwrap();
        assert_eq!(pushed.remote_id.as_deref(), Some("r-1"));
        assert!(!pushed.dirty);
    }

    #[test]
    fn mark_pushed_unknown_record_is_not_found() {
        let store = SledLocalStore::new(SyncDb::temporary().unwrap());
        assert!(matches!(
            store.mark_pushed(EntityType::Task, "404", "r"),
            Err(SyncError::NotFound { .. })
        ));
    }

    #[test]
    fn upsert_remote_updates_linked_record() {
        let store = SledLocalStore::new(SyncDb::temporary().unwrap());
        let first = store
            .upsert_remote(EntityType::Contact, "r-7", fields("Ann"))
            .unwrap();
        let second = store
            .upsert_remote(EntityType::Contact, "r-7", fields("Ann Lee"))
            .unwrap();
        assert_eq!(first, second);

        let record = store.find(EntityType::Contact, &first).unwrap().unwrap();
        assert_eq!(record.fields["name"], json!("Ann Lee"));
        assert!(store.pending_push(EntityType::Contact).unwrap().is_empty());
    }
}
