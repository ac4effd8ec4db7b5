//! Field mapping seam between local and remote records.

use crate::entity::{EntityType, LocalRecord, RemoteRecord};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Reasons a single record cannot be mapped. Both kinds are skips.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    /// The record fails domain validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// The record references something the other side does not have
    #[error("missing linkage: {0}")]
    MissingLinkage(String),
}

/// Business-specific translation of one entity type.
pub trait EntityMapper: Send + Sync {
    fn to_remote(&self, record: &LocalRecord) -> Result<RemoteRecord, MappingError>;

    fn to_local(
        &self,
        entity: EntityType,
        record: &RemoteRecord,
    ) -> Result<Map<String, JsonValue>, MappingError>;
}

/// Copies fields unchanged and only checks that required fields are present.
#[derive(Debug, Clone, Default)]
pub struct PassthroughMapper {
    required_fields: Vec<String>,
}

impl PassthroughMapper {
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }

    fn check_required(&self, fields: &Map<String, JsonValue>) -> Result<(), MappingError> {
        for name in &self.required_fields {
            let present = match fields.get(name) {
                None | Some(JsonValue::Null) => false,
                Some(JsonValue::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(MappingError::Validation(format!(
                    "required field '{}' is missing",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl EntityMapper for PassthroughMapper {
    fn to_remote(&self, record: &LocalRecord) -> Result<RemoteRecord, MappingError> {
        self.check_required(&record.fields)?;
        Ok(RemoteRecord {
            id: record.remote_id.clone(),
            fields: record.fields.clone(),
            modified_at: Some(record.updated_at),
        })
    }

    fn to_local(
        &self,
        entity: EntityType,
        record: &RemoteRecord,
    ) -> Result<Map<String, JsonValue>, MappingError> {
        if record.id.is_none() {
            return Err(MappingError::MissingLinkage(format!(
                "remote {} has no identifier",
                entity
            )));
        }
        self.check_required(&record.fields)?;
        Ok(record.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_required_field_fails_validation() {
        let mapper = PassthroughMapper::new(vec!["name".to_string()]);
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("  "));
        let record = LocalRecord::new(EntityType::Company, "1", fields);
        assert!(matches!(
            mapper.to_remote(&record),
            Err(MappingError::Validation(_))
        ));
    }

    #[test]
    fn remote_without_id_is_missing_linkage() {
        let mapper = PassthroughMapper::default();
        let record = RemoteRecord::new(None, Map::new());
        assert!(matches!(
            mapper.to_local(EntityType::Task, &record),
            Err(MappingError::MissingLinkage(_))
        ));
    }

    #[test]
    fn to_remote_carries_link() {
        let mapper = PassthroughMapper::default();
        let mut record = LocalRecord::new(EntityType::Note, "5", Map::new());
        record.remote_id = Some("r-5".to_string());
        assert_eq!(mapper.to_remote(&record).unwrap().id.as_deref(), Some("r-5"));
    }
}
