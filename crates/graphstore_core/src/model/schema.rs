//! Entity schema shared by the codec, the store and the result-set observer.
//!
//! # Responsibility
//! - Describe entity types, their attributes and their relationships.
//! - Reject structurally invalid schemas at construction time.
//!
//! # Invariants
//! - Every relationship destination names an entity in the same schema.
//! - Attribute and relationship names share one namespace per entity.
//! - An inverse, when declared, exists on the destination and points back.
//! - A `Schema` is immutable once built.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns whether `value` is usable as an entity or property name.
pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

/// Relationship arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// One relationship declared on an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub name: String,
    /// Entity name every target of this relationship must belong to.
    pub destination: String,
    pub cardinality: Cardinality,
    /// Relationship on `destination` kept in sync with this one.
    pub inverse: Option<String>,
}

/// Static description of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub name: String,
    /// Attribute names in declaration order.
    pub attributes: Vec<String>,
    pub relationships: Vec<RelationshipDescriptor>,
}

/// Kind of a named property on one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind<'a> {
    Attribute,
    Relationship(&'a RelationshipDescriptor),
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Declares one scalar attribute.
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    /// Declares a to-one relationship without an inverse.
    pub fn to_one(self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.relationship(name, destination, Cardinality::ToOne, None)
    }

    /// Declares a to-many relationship without an inverse.
    pub fn to_many(self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.relationship(name, destination, Cardinality::ToMany, None)
    }

    /// Declares a relationship with full control over cardinality and inverse.
    pub fn relationship(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        cardinality: Cardinality,
        inverse: Option<&str>,
    ) -> Self {
        self.relationships.push(RelationshipDescriptor {
            name: name.into(),
            destination: destination.into(),
            cardinality,
            inverse: inverse.map(str::to_string),
        });
        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attribute| attribute == name)
    }

    pub fn relationship_named(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships
            .iter()
            .find(|relationship| relationship.name == name)
    }

    /// Looks up a property by name across attributes and relationships.
    pub fn property_kind(&self, name: &str) -> Option<PropertyKind<'_>> {
        if self.has_attribute(name) {
            return Some(PropertyKind::Attribute);
        }
        self.relationship_named(name).map(PropertyKind::Relationship)
    }

    /// All property names: attributes first, then relationships.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .map(String::as_str)
            .chain(self.relationships.iter().map(|r| r.name.as_str()))
    }
}

/// Errors raised while building a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    InvalidName(String),
    DuplicateEntity(String),
    DuplicateProperty {
        entity: String,
        property: String,
    },
    UnknownDestination {
        entity: String,
        relationship: String,
        destination: String,
    },
    InvalidInverse {
        entity: String,
        relationship: String,
        details: String,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid schema identifier: `{name}`"),
            Self::DuplicateEntity(name) => write!(f, "entity declared twice: `{name}`"),
            Self::DuplicateProperty { entity, property } => {
                write!(f, "property `{property}` declared twice on `{entity}`")
            }
            Self::UnknownDestination {
                entity,
                relationship,
                destination,
            } => write!(
                f,
                "relationship `{entity}.{relationship}` targets unknown entity `{destination}`"
            ),
            Self::InvalidInverse {
                entity,
                relationship,
                details,
            } => write!(
                f,
                "relationship `{entity}.{relationship}` has an invalid inverse: {details}"
            ),
        }
    }
}

impl Error for SchemaError {}

/// Validated, immutable set of entity descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    entities: BTreeMap<String, EntityDescriptor>,
}

impl Schema {
    /// Builds a schema after validating names, destinations and inverses.
    pub fn new(entities: Vec<EntityDescriptor>) -> Result<Self, SchemaError> {
        let mut by_name = BTreeMap::new();
        for entity in entities {
            if !is_valid_identifier(&entity.name) {
                return Err(SchemaError::InvalidName(entity.name));
            }
            let mut seen = BTreeSet::new();
            for property in entity.property_names() {
                if !is_valid_identifier(property) {
                    return Err(SchemaError::InvalidName(property.to_string()));
                }
                if !seen.insert(property) {
                    return Err(SchemaError::DuplicateProperty {
                        entity: entity.name.clone(),
                        property: property.to_string(),
                    });
                }
            }
            if by_name.contains_key(&entity.name) {
                return Err(SchemaError::DuplicateEntity(entity.name));
            }
            by_name.insert(entity.name.clone(), entity);
        }

        let schema = Self { entities: by_name };
        schema.check_relationships()?;
        Ok(schema)
    }

    fn check_relationships(&self) -> Result<(), SchemaError> {
        for entity in self.entities.values() {
            for relationship in &entity.relationships {
                let Some(destination) = self.entities.get(&relationship.destination) else {
                    return Err(SchemaError::UnknownDestination {
                        entity: entity.name.clone(),
                        relationship: relationship.name.clone(),
                        destination: relationship.destination.clone(),
                    });
                };
                let Some(inverse_name) = relationship.inverse.as_deref() else {
                    continue;
                };
                let invalid = |details: String| SchemaError::InvalidInverse {
                    entity: entity.name.clone(),
                    relationship: relationship.name.clone(),
                    details,
                };
                let inverse = destination
                    .relationship_named(inverse_name)
                    .ok_or_else(|| {
                        invalid(format!(
                            "`{}` has no relationship `{inverse_name}`",
                            destination.name
                        ))
                    })?;
                if inverse.destination != entity.name {
                    return Err(invalid(format!(
                        "`{}.{inverse_name}` targets `{}`",
                        destination.name, inverse.destination
                    )));
                }
                if inverse.inverse.as_deref() != Some(relationship.name.as_str()) {
                    return Err(invalid(format!(
                        "`{}.{inverse_name}` does not name `{}` as its inverse",
                        destination.name, relationship.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    /// Entities in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }
}
