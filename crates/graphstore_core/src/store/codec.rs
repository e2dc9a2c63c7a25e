//! Plist-safe codec between live property values and serialized records.
//!
//! # Responsibility
//! - Encode attributes verbatim and relationships as foreign-key pairs.
//! - Decode records back, resolving every foreign key through a resolver.
//!
//! # Invariants
//! - Encoding and decoding are pure functions of their inputs.
//! - A foreign key that cannot be resolved is an error, never dropped.
//! - Every relationship target belongs to the declared destination entity.

use crate::model::object::{ObjectId, PropertySource, PropertyValue, ResolvedProperties, Value};
use crate::model::schema::{Cardinality, EntityDescriptor, PropertyKind, RelationshipDescriptor};
use crate::store::document::{ForeignKey, SerializedRecord};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CodecResult<T> = Result<T, CodecError>;

/// Maps a foreign key to the identity of an existing node.
pub trait ReferenceResolver {
    fn resolve(&self, key: &ForeignKey) -> Option<ObjectId>;
}

impl<F> ReferenceResolver for F
where
    F: Fn(&ForeignKey) -> Option<ObjectId>,
{
    fn resolve(&self, key: &ForeignKey) -> Option<ObjectId> {
        self(key)
    }
}

/// Resolver backed by a set of known identities.
impl ReferenceResolver for BTreeSet<ObjectId> {
    fn resolve(&self, key: &ForeignKey) -> Option<ObjectId> {
        let id = key.to_object_id();
        self.contains(&id).then_some(id)
    }
}

/// Errors raised while encoding or decoding one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Property name is not declared on the entity.
    UnknownProperty { entity: String, property: String },
    /// Value shape does not match the declared property kind.
    KindMismatch { entity: String, property: String },
    /// NaN or infinite float; JSON has no representation for it.
    NonFiniteFloat { entity: String, property: String },
    /// To-one relationship holds more than one target.
    CardinalityMismatch {
        entity: String,
        relationship: String,
        count: usize,
    },
    /// Target belongs to another entity than the relationship destination.
    WrongDestination {
        entity: String,
        relationship: String,
        target: ForeignKey,
    },
    /// Target is not present in the resolver.
    DanglingReference {
        entity: String,
        relationship: String,
        target: ObjectId,
    },
}

impl CodecError {
    /// Whether this error reports a reference to a missing object.
    pub fn is_dangling_reference(&self) -> bool {
        matches!(self, Self::DanglingReference { .. })
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProperty { entity, property } => {
                write!(f, "unknown property `{entity}.{property}`")
            }
            Self::KindMismatch { entity, property } => {
                write!(f, "value of `{entity}.{property}` has the wrong kind")
            }
            Self::NonFiniteFloat { entity, property } => {
                write!(f, "value of `{entity}.{property}` is not a finite number")
            }
            Self::CardinalityMismatch {
                entity,
                relationship,
                count,
            } => write!(
                f,
                "to-one relationship `{entity}.{relationship}` holds {count} targets"
            ),
            Self::WrongDestination {
                entity,
                relationship,
                target,
            } => write!(
                f,
                "relationship `{entity}.{relationship}` cannot target {target}"
            ),
            Self::DanglingReference {
                entity,
                relationship,
                target,
            } => write!(
                f,
                "relationship `{entity}.{relationship}` references missing object {target}"
            ),
        }
    }
}

impl Error for CodecError {}

/// Encodes every declared property of `object`.
pub fn encode(
    object: &impl PropertySource,
    entity: &EntityDescriptor,
) -> CodecResult<SerializedRecord> {
    encode_properties(object, entity, entity.property_names())
}

/// Encodes only the named properties of `object`.
///
/// Missing attribute values encode as `null`, missing relationships as an
/// empty key list.
pub fn encode_properties<'a>(
    object: &impl PropertySource,
    entity: &EntityDescriptor,
    names: impl IntoIterator<Item = &'a str>,
) -> CodecResult<SerializedRecord> {
    let mut record = SerializedRecord::default();
    for name in names {
        match entity.property_kind(name) {
            None => return Err(unknown_property(entity, name)),
            Some(PropertyKind::Attribute) => {
                let value = match object.property(name) {
                    None => Value::Null,
                    Some(PropertyValue::Attribute(value)) => value.clone(),
                    Some(_) => return Err(kind_mismatch(entity, name)),
                };
                if !value.is_finite() {
                    return Err(CodecError::NonFiniteFloat {
                        entity: entity.name.clone(),
                        property: name.to_string(),
                    });
                }
                record.attributes.insert(name.to_string(), value);
            }
            Some(PropertyKind::Relationship(relationship)) => {
                let keys = encode_relationship(object.property(name), entity, relationship)?;
                record.relationships.insert(name.to_string(), keys);
            }
        }
    }
    Ok(record)
}

fn encode_relationship(
    value: Option<&PropertyValue>,
    entity: &EntityDescriptor,
    relationship: &RelationshipDescriptor,
) -> CodecResult<Vec<ForeignKey>> {
    let targets: Vec<&ObjectId> = match (relationship.cardinality, value) {
        (_, None) => Vec::new(),
        (Cardinality::ToOne, Some(PropertyValue::ToOne(target))) => target.iter().collect(),
        (Cardinality::ToMany, Some(PropertyValue::ToMany(targets))) => targets.iter().collect(),
        _ => return Err(kind_mismatch(entity, &relationship.name)),
    };

    targets
        .into_iter()
        .map(|target| {
            let key = ForeignKey::from(target);
            if target.entity() != relationship.destination {
                return Err(CodecError::WrongDestination {
                    entity: entity.name.clone(),
                    relationship: relationship.name.clone(),
                    target: key,
                });
            }
            Ok(key)
        })
        .collect()
}

/// Decodes a full record: every declared property gets a value.
///
/// Absent attributes decode as `null`, absent relationships as empty.
pub fn decode(
    record: &SerializedRecord,
    entity: &EntityDescriptor,
    resolver: &impl ReferenceResolver,
) -> CodecResult<ResolvedProperties> {
    check_record_shape(record, entity)?;

    let mut properties = ResolvedProperties::new();
    for attribute in &entity.attributes {
        let value = record.attributes.get(attribute).cloned().unwrap_or_default();
        properties.insert(attribute.clone(), PropertyValue::Attribute(value));
    }
    for relationship in &entity.relationships {
        let keys = record
            .relationships
            .get(&relationship.name)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let value = decode_relationship(keys, entity, relationship, resolver)?;
        properties.insert(relationship.name.clone(), value);
    }
    Ok(properties)
}

/// Decodes only the properties present in `record`.
pub fn decode_partial(
    record: &SerializedRecord,
    entity: &EntityDescriptor,
    resolver: &impl ReferenceResolver,
) -> CodecResult<ResolvedProperties> {
    check_record_shape(record, entity)?;

    let mut properties = ResolvedProperties::new();
    for (name, value) in &record.attributes {
        properties.insert(name.clone(), PropertyValue::Attribute(value.clone()));
    }
    for (name, keys) in &record.relationships {
        let relationship = entity
            .relationship_named(name)
            .ok_or_else(|| unknown_property(entity, name))?;
        let value = decode_relationship(keys, entity, relationship, resolver)?;
        properties.insert(name.clone(), value);
    }
    Ok(properties)
}

fn check_record_shape(record: &SerializedRecord, entity: &EntityDescriptor) -> CodecResult<()> {
    for name in record.attributes.keys() {
        match entity.property_kind(name) {
            Some(PropertyKind::Attribute) => {}
            Some(PropertyKind::Relationship(_)) => return Err(kind_mismatch(entity, name)),
            None => return Err(unknown_property(entity, name)),
        }
    }
    for name in record.relationships.keys() {
        match entity.property_kind(name) {
            Some(PropertyKind::Relationship(_)) => {}
            Some(PropertyKind::Attribute) => return Err(kind_mismatch(entity, name)),
            None => return Err(unknown_property(entity, name)),
        }
    }
    Ok(())
}

fn decode_relationship(
    keys: &[ForeignKey],
    entity: &EntityDescriptor,
    relationship: &RelationshipDescriptor,
    resolver: &impl ReferenceResolver,
) -> CodecResult<PropertyValue> {
    if relationship.cardinality == Cardinality::ToOne && keys.len() > 1 {
        return Err(CodecError::CardinalityMismatch {
            entity: entity.name.clone(),
            relationship: relationship.name.clone(),
            count: keys.len(),
        });
    }

    let mut targets = BTreeSet::new();
    for key in keys {
        if key.entity() != relationship.destination {
            return Err(CodecError::WrongDestination {
                entity: entity.name.clone(),
                relationship: relationship.name.clone(),
                target: key.clone(),
            });
        }
        let target = resolver
            .resolve(key)
            .ok_or_else(|| CodecError::DanglingReference {
                entity: entity.name.clone(),
                relationship: relationship.name.clone(),
                target: key.to_object_id(),
            })?;
        targets.insert(target);
    }

    Ok(match relationship.cardinality {
        Cardinality::ToOne => PropertyValue::ToOne(targets.into_iter().next()),
        Cardinality::ToMany => PropertyValue::ToMany(targets),
    })
}

fn unknown_property(entity: &EntityDescriptor, property: &str) -> CodecError {
    CodecError::UnknownProperty {
        entity: entity.name.clone(),
        property: property.to_string(),
    }
}

fn kind_mismatch(entity: &EntityDescriptor, property: &str) -> CodecError {
    CodecError::KindMismatch {
        entity: entity.name.clone(),
        property: property.to_string(),
    }
}
