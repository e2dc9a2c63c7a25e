//! On-disk document shape.
//!
//! # Responsibility
//! - Define the serialized root, object record and foreign-key shapes.
//!
//! # Invariants
//! - The root always carries both `metadata` and `objects`.
//! - Relationship values are lists of `(entity, reference_id)` pairs; a
//!   to-one relationship holds zero or one pair.
//! - Unknown fields in object records are rejected, not ignored.

use crate::model::object::{ObjectId, ReferenceId, Value};
use crate::store::metadata::StoreMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Serialization-safe relationship target: `[entity, reference_id]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignKey(pub String, pub ReferenceId);

impl ForeignKey {
    pub fn entity(&self) -> &str {
        &self.0
    }

    pub fn reference_id(&self) -> ReferenceId {
        self.1
    }

    pub fn to_object_id(&self) -> ObjectId {
        ObjectId::new(self.0.clone(), self.1)
    }
}

impl From<&ObjectId> for ForeignKey {
    fn from(value: &ObjectId) -> Self {
        Self(value.entity().to_string(), value.reference_id())
    }
}

impl Display for ForeignKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.0, self.1)
    }
}

/// Encoded property map of one object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerializedRecord {
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub relationships: BTreeMap<String, Vec<ForeignKey>>,
}

impl SerializedRecord {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relationships.is_empty()
    }

    /// Overwrites properties present in `other`; others are left untouched.
    pub fn merge(&mut self, other: SerializedRecord) {
        self.attributes.extend(other.attributes);
        self.relationships.extend(other.relationships);
    }

    /// Every `(relationship, foreign key)` pair held by this record.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &ForeignKey)> {
        self.relationships
            .iter()
            .flat_map(|(name, keys)| keys.iter().map(move |key| (name.as_str(), key)))
    }
}

/// One persisted object: identity plus nested payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredObject {
    pub entity: String,
    pub reference_id: ReferenceId,
    pub payload: SerializedRecord,
}

impl StoredObject {
    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(self.entity.clone(), self.reference_id)
    }
}

/// Root of a store file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub metadata: StoreMetadata,
    pub objects: Vec<StoredObject>,
}

/// Root view used when only metadata is needed.
#[derive(Debug, Deserialize)]
pub(crate) struct MetadataOnly {
    pub metadata: StoreMetadata,
    #[allow(dead_code)]
    pub objects: serde::de::IgnoredAny,
}

#[cfg(test)]
mod tests {
    use super::{ForeignKey, SerializedRecord, StoreDocument};
    use crate::model::object::Value;

    #[test]
    fn foreign_keys_serialize_as_pairs() {
        let mut record = SerializedRecord::default();
        record.attributes.insert("title".to_string(), Value::from("Dune"));
        record.relationships.insert(
            "author".to_string(),
            vec![ForeignKey("Author".to_string(), 1)],
        );

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"attributes":{"title":"Dune"},"relationships":{"author":[["Author",1]]}}"#
        );
    }

    #[test]
    fn merge_replaces_only_present_properties() {
        let mut base = SerializedRecord::default();
        base.attributes.insert("title".to_string(), Value::from("Old"));
        base.attributes.insert("year".to_string(), Value::Integer(1965));

        let mut delta = SerializedRecord::default();
        delta.attributes.insert("title".to_string(), Value::from("New"));
        base.merge(delta);

        assert_eq!(base.attributes["title"], Value::from("New"));
        assert_eq!(base.attributes["year"], Value::Integer(1965));
    }

    #[test]
    fn document_requires_objects_field() {
        let err = serde_json::from_str::<StoreDocument>(r#"{"metadata":{}}"#).unwrap_err();
        assert!(err.to_string().contains("objects"));
    }
}
