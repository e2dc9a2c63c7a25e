//! Object identity, property values and the live managed object.
//!
//! # Responsibility
//! - Define the stable `ObjectId` used as the sole lookup key everywhere.
//! - Define scalar and relationship property values.
//! - Track which properties of a live object changed since the last push.
//!
//! # Invariants
//! - `ObjectId` equality and ordering are structural: entity, then reference id.
//! - A `ManagedObject` always carries a permanent `ObjectId`.
//! - Relationship values hold identities, never object references.

use crate::model::schema::{Cardinality, EntityDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// Store-local identifier assigned once per object.
pub type ReferenceId = u64;

/// Structural identity of one persisted object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    entity: String,
    reference_id: ReferenceId,
}

impl ObjectId {
    pub fn new(entity: impl Into<String>, reference_id: ReferenceId) -> Self {
        Self {
            entity: entity.into(),
            reference_id,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn reference_id(&self) -> ReferenceId {
        self.reference_id
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.entity, self.reference_id)
    }
}

/// Scalar attribute value.
///
/// Serialized untagged so documents stay plain JSON scalars. Timestamps are
/// carried as epoch milliseconds in `Integer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// `false` only for NaN and infinite floats.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Resolved value of one property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Attribute(Value),
    ToOne(Option<ObjectId>),
    ToMany(BTreeSet<ObjectId>),
}

impl PropertyValue {
    /// Empty value for a relationship of the given cardinality.
    pub fn empty_relationship(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::ToOne => Self::ToOne(None),
            Cardinality::ToMany => Self::ToMany(BTreeSet::new()),
        }
    }

    /// Identities referenced by this value, in ascending order.
    pub fn references(&self) -> Vec<&ObjectId> {
        match self {
            Self::Attribute(_) => Vec::new(),
            Self::ToOne(target) => target.iter().collect(),
            Self::ToMany(targets) => targets.iter().collect(),
        }
    }
}

/// Property map of one resolved object.
pub type ResolvedProperties = BTreeMap<String, PropertyValue>;

/// Read access to property values, independent of the concrete holder.
///
/// Implemented by live objects and by resolved property maps so encoding
/// never depends on one object type.
pub trait PropertySource {
    fn property(&self, name: &str) -> Option<&PropertyValue>;
}

impl PropertySource for ResolvedProperties {
    fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.get(name)
    }
}

/// Live, mutable object registered in an object context.
///
/// Mutation goes through `ObjectContext` so every change is validated
/// against the schema and recorded for the next push to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    id: ObjectId,
    values: ResolvedProperties,
    changed: BTreeSet<String>,
}

impl ManagedObject {
    /// Creates an object with every declared property at its empty value.
    pub(crate) fn new(id: ObjectId, entity: &EntityDescriptor) -> Self {
        let mut values = ResolvedProperties::new();
        for attribute in &entity.attributes {
            values.insert(attribute.clone(), PropertyValue::Attribute(Value::Null));
        }
        for relationship in &entity.relationships {
            values.insert(
                relationship.name.clone(),
                PropertyValue::empty_relationship(relationship.cardinality),
            );
        }
        Self {
            id,
            values,
            changed: BTreeSet::new(),
        }
    }

    /// Rebuilds an object from resolved store properties.
    pub(crate) fn from_properties(id: ObjectId, values: ResolvedProperties) -> Self {
        Self {
            id,
            values,
            changed: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn entity(&self) -> &str {
        self.id.entity()
    }

    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(PropertyValue::Attribute(value)) => Some(value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(Value::as_text)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.attribute(name).and_then(Value::as_integer)
    }

    pub fn to_one(&self, name: &str) -> Option<&ObjectId> {
        match self.values.get(name) {
            Some(PropertyValue::ToOne(target)) => target.as_ref(),
            _ => None,
        }
    }

    pub fn to_many(&self, name: &str) -> Option<&BTreeSet<ObjectId>> {
        match self.values.get(name) {
            Some(PropertyValue::ToMany(targets)) => Some(targets),
            _ => None,
        }
    }

    pub fn properties(&self) -> &ResolvedProperties {
        &self.values
    }

    /// Names of properties changed since the last push to the store.
    pub fn changed_properties(&self) -> &BTreeSet<String> {
        &self.changed
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Replaces one property value and records it as changed.
    ///
    /// Returns `false` when the value was already equal (nothing recorded).
    pub(crate) fn set_value(&mut self, name: &str, value: PropertyValue) -> bool {
        if self.values.get(name) == Some(&value) {
            return false;
        }
        self.values.insert(name.to_string(), value);
        self.changed.insert(name.to_string());
        true
    }

    pub(crate) fn clear_changes(&mut self) {
        self.changed.clear();
    }
}

impl PropertySource for ManagedObject {
    fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{ManagedObject, ObjectId, PropertyValue, Value};
    use crate::model::schema::EntityDescriptor;

    #[test]
    fn object_ids_order_by_entity_then_reference() {
        let mut ids = vec![
            ObjectId::new("Book", 2),
            ObjectId::new("Author", 9),
            ObjectId::new("Book", 1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ObjectId::new("Author", 9),
                ObjectId::new("Book", 1),
                ObjectId::new("Book", 2),
            ]
        );
        assert_eq!(ObjectId::new("Book", 1).to_string(), "Book#1");
    }

    #[test]
    fn value_json_shape_is_plain_scalar() {
        let encoded = serde_json::to_string(&vec![
            Value::Null,
            Value::Bool(true),
            Value::Integer(3),
            Value::Float(2.5),
            Value::from("x"),
        ])
        .unwrap();
        assert_eq!(encoded, r#"[null,true,3,2.5,"x"]"#);

        let decoded: Vec<Value> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded[2], Value::Integer(3));
        assert_eq!(decoded[3], Value::Float(2.5));
    }

    #[test]
    fn set_value_records_only_real_changes() {
        let entity = EntityDescriptor::new("Book").attribute("title");
        let mut object = ManagedObject::new(ObjectId::new("Book", 1), &entity);
        assert!(!object.has_changes());

        assert!(!object.set_value("title", PropertyValue::Attribute(Value::Null)));
        assert!(!object.has_changes());

        assert!(object.set_value("title", PropertyValue::Attribute(Value::from("Dune"))));
        assert!(object.changed_properties().contains("title"));
        assert_eq!(object.text("title"), Some("Dune"));

        object.clear_changes();
        assert!(!object.has_changes());
    }
}
