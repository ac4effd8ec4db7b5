//! Entity catalogue shared by strategies, stores and the remote client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Kinds of records reconciled between the local system and the remote CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Opportunity,
    Company,
    Contact,
    Note,
    Appointment,
    Task,
    User,
    CustomField,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Opportunity,
        EntityType::Company,
        EntityType::Contact,
        EntityType::Note,
        EntityType::Appointment,
        EntityType::Task,
        EntityType::User,
        EntityType::CustomField,
    ];

    /// Key used in cursor keys, tree names and strategy short names
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Opportunity => "opportunity",
            EntityType::Company => "company",
            EntityType::Contact => "contact",
            EntityType::Note => "note",
            EntityType::Appointment => "appointment",
            EntityType::Task => "task",
            EntityType::User => "user",
            EntityType::CustomField => "custom-field",
        }
    }

    /// Name used inside qualified strategy identities (`PushOpportunityStrategy`)
    pub fn pascal_name(&self) -> &'static str {
        match self {
            EntityType::Opportunity => "Opportunity",
            EntityType::Company => "Company",
            EntityType::Contact => "Contact",
            EntityType::Note => "Note",
            EntityType::Appointment => "Appointment",
            EntityType::Task => "Task",
            EntityType::User => "User",
            EntityType::CustomField => "CustomField",
        }
    }

    /// Users and custom fields are owned by the remote CRM and only pulled.
    pub fn is_remote_owned(&self) -> bool {
        matches!(self, EntityType::User | EntityType::CustomField)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|entity| entity.as_str() == s || entity.pascal_name() == s)
            .ok_or_else(|| format!("Unknown entity type: {}", s))
    }
}

/// Model types accepted by the single-entity invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    Opportunity,
    Company,
    Contact,
    Note,
    Appointment,
    Task,
}

impl ModelType {
    pub fn entity(&self) -> EntityType {
        match self {
            ModelType::Opportunity => EntityType::Opportunity,
            ModelType::Company => EntityType::Company,
            ModelType::Contact => EntityType::Contact,
            ModelType::Note => EntityType::Note,
            ModelType::Appointment => EntityType::Appointment,
            ModelType::Task => EntityType::Task,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity().as_str())
    }
}

/// Reference to one entity on either side of the sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
}

impl EntityRef {
    pub fn local(entity_type: EntityType, local_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            local_id: Some(local_id.into()),
            remote_id: None,
        }
    }

    pub fn remote(entity_type: EntityType, remote_id: Option<String>) -> Self {
        Self {
            entity_type,
            local_id: None,
            remote_id,
        }
    }

    pub fn with_remote_id(mut self, remote_id: Option<String>) -> Self {
        self.remote_id = remote_id;
        self
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.local_id, &self.remote_id) {
            (Some(local), Some(remote)) => {
                write!(f, "{} #{} (remote {})", self.entity_type, local, remote)
            }
            (Some(local), None) => write!(f, "{} #{}", self.entity_type, local),
            (None, Some(remote)) => write!(f, "{} (remote {})", self.entity_type, remote),
            (None, None) => write!(f, "{} (unidentified)", self.entity_type),
        }
    }
}

/// A record held by the local system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: String,
    pub entity_type: EntityType,
    /// Identifier of the remote counterpart once the record has been linked
    pub remote_id: Option<String>,
    pub fields: Map<String, JsonValue>,
    /// Set when the record changed locally since the last push
    pub dirty: bool,
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    pub fn new(entity_type: EntityType, id: impl Into<String>, fields: Map<String, JsonValue>) -> Self {
        Self {
            id: id.into(),
            entity_type,
            remote_id: None,
            fields,
            dirty: true,
            updated_at: Utc::now(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::local(self.entity_type, self.id.clone()).with_remote_id(self.remote_id.clone())
    }
}

/// A record as exchanged with the remote CRM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Remote identifier; absent when pushing a record the remote has never seen
    pub id: Option<String>,
    pub fields: Map<String, JsonValue>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteRecord {
    pub fn new(id: Option<String>, fields: Map<String, JsonValue>) -> Self {
        Self {
            id,
            fields,
            modified_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_names_parse_in_both_spellings() {
        assert_eq!("custom-field".parse::<EntityType>().unwrap(), EntityType::CustomField);
        assert_eq!("CustomField".parse::<EntityType>().unwrap(), EntityType::CustomField);
        assert!("widget".parse::<EntityType>().is_err());
    }

    #[test]
    fn entity_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&EntityType::CustomField).unwrap(),
            "\"custom-field\""
        );
    }

    #[test]
    fn model_types_map_to_entities() {
        assert_eq!(ModelType::Opportunity.entity(), EntityType::Opportunity);
        assert_eq!(ModelType::Task.to_string(), "task");
    }

    #[test]
    fn entity_ref_display() {
        let local = EntityRef::local(EntityType::Contact, "17");
        assert_eq!(local.to_string(), "contact #17");
        let linked = local.with_remote_id(Some("ab-1".to_string()));
        assert_eq!(linked.to_string(), "contact #17 (remote ab-1)");
        let remote = EntityRef::remote(EntityType::Note, None);
        assert_eq!(remote.to_string(), "note (unidentified)");
    }
}
