//! Object context: live objects, change tracking and save.
//!
//! # Responsibility
//! - Register new objects and hand them their permanent identity.
//! - Keep both sides of inverse relationships in step.
//! - Turn pending changes into cache nodes, one atomic write and one
//!   change notification.
//!
//! # Invariants
//! - Every live object has a reference id from the store counter.
//! - Deleting an object removes every reference to it, so a saved graph
//!   never contains a dangling foreign key.
//! - An object inserted and deleted before the same save never reaches
//!   the store or the notification.

use crate::model::graph::ObjectGraph;
use crate::model::object::{ManagedObject, ObjectId, PropertyValue, Value};
use crate::model::schema::{Cardinality, PropertyKind, RelationshipDescriptor, Schema};
use crate::notify::{BusError, ChangeNotification, NotificationBus};
use crate::store::{AtomicStore, StoreError};
use log::{debug, info};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

pub type ContextResult<T> = Result<T, ContextError>;

#[derive(Debug)]
pub enum ContextError {
    Store(StoreError),
    /// Saved batch was rejected by at least one observer.
    Bus(BusError),
    UnknownEntity(String),
    ObjectNotFound(ObjectId),
    UnknownProperty {
        entity: String,
        property: String,
    },
    /// Property exists but is not of the kind the operation needs.
    WrongPropertyKind {
        entity: String,
        property: String,
        expected: &'static str,
    },
    /// NaN or infinite float cannot be persisted.
    NonFiniteFloat {
        entity: String,
        property: String,
    },
    /// Relationship target belongs to another entity.
    WrongTarget {
        relationship: String,
        expected: String,
        target: ObjectId,
    },
}

impl ContextError {
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            Self::Store(err) => err.is_integrity_violation(),
            Self::Bus(err) => err.is_integrity_violation(),
            _ => false,
        }
    }
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Bus(err) => write!(f, "{err}"),
            Self::UnknownEntity(name) => write!(f, "entity not in schema: `{name}`"),
            Self::ObjectNotFound(id) => write!(f, "object not found: {id}"),
            Self::UnknownProperty { entity, property } => {
                write!(f, "entity `{entity}` has no property `{property}`")
            }
            Self::WrongPropertyKind {
                entity,
                property,
                expected,
            } => write!(f, "`{entity}.{property}` is not {expected}"),
            Self::NonFiniteFloat { entity, property } => {
                write!(f, "`{entity}.{property}` cannot hold a non-finite number")
            }
            Self::WrongTarget {
                relationship,
                expected,
                target,
            } => write!(
                f,
                "relationship `{relationship}` expects `{expected}`, got {target}"
            ),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Bus(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ContextError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<BusError> for ContextError {
    fn from(value: BusError) -> Self {
        Self::Bus(value)
    }
}

/// In-memory unit of work over one atomic store.
pub struct ObjectContext {
    store: AtomicStore,
    graph: ObjectGraph,
    inserted: BTreeSet<ObjectId>,
    deleted: BTreeSet<ObjectId>,
    bus: NotificationBus,
}

impl ObjectContext {
    /// Wraps `store`, materializing a live object for every cached node.
    ///
    /// # Errors
    /// - Store integrity errors when cached nodes do not resolve.
    pub fn new(mut store: AtomicStore) -> ContextResult<Self> {
        store.resolve_nodes()?;
        let mut graph = ObjectGraph::new(Arc::clone(store.schema()));
        for node in store.cache_nodes() {
            if let Some(properties) = node.properties() {
                graph.insert(ManagedObject::from_properties(
                    node.object_id().clone(),
                    properties.clone(),
                ));
            }
        }
        Ok(Self {
            store,
            graph,
            inserted: BTreeSet::new(),
            deleted: BTreeSet::new(),
            bus: NotificationBus::new(),
        })
    }

    /// Loads the configured store file, then wraps the store.
    pub fn open(mut store: AtomicStore) -> ContextResult<Self> {
        store.load()?;
        Self::new(store)
    }

    pub fn store(&self) -> &AtomicStore {
        &self.store
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.graph.schema()
    }

    pub fn bus_mut(&mut self) -> &mut NotificationBus {
        &mut self.bus
    }

    pub fn object(&self, id: &ObjectId) -> Option<&ManagedObject> {
        self.graph.object(id)
    }

    /// Live objects of `entity` in reference-id order.
    pub fn objects_of<'a>(
        &'a self,
        entity: &'a str,
    ) -> impl Iterator<Item = &'a ManagedObject> + 'a {
        self.graph.objects_of(entity)
    }

    pub fn fetch<'a>(
        &'a self,
        entity: &'a str,
        predicate: impl Fn(&ManagedObject) -> bool,
    ) -> ContextResult<Vec<&'a ManagedObject>> {
        self.require_entity(entity)?;
        Ok(self
            .graph
            .objects_of(entity)
            .filter(|object| predicate(object))
            .collect())
    }

    pub fn count(&self, entity: &str) -> ContextResult<usize> {
        self.require_entity(entity)?;
        Ok(self.graph.objects_of(entity).count())
    }

    pub fn has_changes(&self) -> bool {
        !self.inserted.is_empty()
            || !self.deleted.is_empty()
            || self.graph.objects().any(ManagedObject::has_changes)
    }

    /// Creates a new object with empty properties and a permanent identity.
    pub fn insert_object(&mut self, entity: &str) -> ContextResult<ObjectId> {
        let schema = Arc::clone(self.graph.schema());
        let descriptor = schema
            .entity(entity)
            .ok_or_else(|| ContextError::UnknownEntity(entity.to_string()))?;
        let reference_id = self.store.assign_reference_id(entity)?;
        let id = ObjectId::new(entity, reference_id);
        self.graph.insert(ManagedObject::new(id.clone(), descriptor));
        self.inserted.insert(id.clone());
        debug!(
            "event=object_insert module=context status=ok object={}",
            id
        );
        Ok(id)
    }

    pub fn set_attribute(
        &mut self,
        id: &ObjectId,
        name: &str,
        value: impl Into<Value>,
    ) -> ContextResult<()> {
        let schema = Arc::clone(self.graph.schema());
        match self.property_kind(&schema, id, name)? {
            PropertyKind::Attribute => {}
            PropertyKind::Relationship(_) => {
                return Err(wrong_kind(id, name, "an attribute"));
            }
        }
        let value = value.into();
        if !value.is_finite() {
            return Err(ContextError::NonFiniteFloat {
                entity: id.entity().to_string(),
                property: name.to_string(),
            });
        }
        if let Some(object) = self.graph.get_mut(id) {
            object.set_value(name, PropertyValue::Attribute(value));
        }
        Ok(())
    }

    /// Points a to-one relationship at `target`, or clears it with `None`.
    pub fn set_to_one(
        &mut self,
        id: &ObjectId,
        name: &str,
        target: Option<&ObjectId>,
    ) -> ContextResult<()> {
        let schema = Arc::clone(self.graph.schema());
        let relationship = self.relationship(&schema, id, name, Cardinality::ToOne)?;
        if let Some(target) = target {
            self.check_target(relationship, target)?;
        }
        let inverse = inverse_of(&schema, relationship);

        let previous = self
            .graph
            .object(id)
            .and_then(|object| object.to_one(name))
            .cloned();
        if previous.as_ref() == target {
            return Ok(());
        }
        if let Some(previous) = &previous {
            self.unlink(id, name, previous);
            if let Some(inverse) = inverse {
                self.unlink(previous, &inverse.name, id);
            }
        }
        if let Some(target) = target {
            self.attach(id, relationship, inverse, target);
        }
        Ok(())
    }

    pub fn add_to_many(&mut self, id: &ObjectId, name: &str, target: &ObjectId) -> ContextResult<()> {
        let schema = Arc::clone(self.graph.schema());
        let relationship = self.relationship(&schema, id, name, Cardinality::ToMany)?;
        self.check_target(relationship, target)?;
        let already_linked = self
            .graph
            .object(id)
            .and_then(|object| object.to_many(name))
            .is_some_and(|targets| targets.contains(target));
        if !already_linked {
            self.attach(id, relationship, inverse_of(&schema, relationship), target);
        }
        Ok(())
    }

    pub fn remove_to_many(
        &mut self,
        id: &ObjectId,
        name: &str,
        target: &ObjectId,
    ) -> ContextResult<()> {
        let schema = Arc::clone(self.graph.schema());
        let relationship = self.relationship(&schema, id, name, Cardinality::ToMany)?;
        self.unlink(id, name, target);
        if let Some(inverse) = inverse_of(&schema, relationship) {
            self.unlink(target, &inverse.name, id);
        }
        Ok(())
    }

    /// Deletes an object and nullifies every relationship pointing at it.
    pub fn delete_object(&mut self, id: &ObjectId) -> ContextResult<()> {
        if !self.graph.contains(id) {
            return Err(ContextError::ObjectNotFound(id.clone()));
        }

        let mut holders = Vec::new();
        for object in self.graph.objects().filter(|object| object.id() != id) {
            for (name, value) in object.properties() {
                if value.references().contains(&id) {
                    holders.push((object.id().clone(), name.clone()));
                }
            }
        }
        for (holder, name) in &holders {
            self.unlink(holder, name, id);
        }

        self.graph.remove(id);
        if !self.inserted.remove(id) {
            self.deleted.insert(id.clone());
        }
        debug!(
            "event=object_delete module=context status=ok object={} nullified={}",
            id,
            holders.len()
        );
        Ok(())
    }

    /// Pushes pending changes, writes the store and publishes the batch.
    ///
    /// The batch is published even when the write fails; the cache already
    /// holds the pushed state and the next save writes it again.
    ///
    /// # Errors
    /// - Store errors from pushing, resolving or writing.
    /// - `Bus` when an observer rejects the batch.
    pub fn save(&mut self) -> ContextResult<ChangeNotification> {
        let started_at = Instant::now();
        let notification = self.push_changes()?;
        let written = self.store.save();
        let published = self.bus.publish(&self.graph, &notification);
        written?;
        published?;
        info!(
            "event=context_save module=context status=ok inserted={} deleted={} updated={} duration_ms={}",
            notification.inserted.len(),
            notification.deleted.len(),
            notification.updated.len(),
            started_at.elapsed().as_millis()
        );
        Ok(notification)
    }

    fn push_changes(&mut self) -> ContextResult<ChangeNotification> {
        let mut notification = ChangeNotification::new();
        notification.inserted = self.inserted.clone();
        notification.deleted = self.deleted.clone();
        notification.updated = self
            .graph
            .objects()
            .filter(|object| object.has_changes() && !self.inserted.contains(object.id()))
            .map(|object| object.id().clone())
            .collect();

        for id in &notification.inserted {
            let object = self
                .graph
                .object(id)
                .ok_or_else(|| ContextError::ObjectNotFound(id.clone()))?;
            // Left over from a push that failed part way; pending state wins.
            self.store.remove_node(id);
            self.store.create_node(object)?;
        }
        for id in &notification.updated {
            let object = self
                .graph
                .object(id)
                .ok_or_else(|| ContextError::ObjectNotFound(id.clone()))?;
            self.store.update_node(object)?;
        }
        for id in &notification.deleted {
            self.store.remove_node(id);
        }
        self.store.resolve_nodes()?;

        self.inserted.clear();
        self.deleted.clear();
        for object in self.graph.objects_mut() {
            object.clear_changes();
        }
        Ok(notification)
    }

    fn require_entity(&self, entity: &str) -> ContextResult<()> {
        match self.graph.schema().entity(entity) {
            Some(_) => Ok(()),
            None => Err(ContextError::UnknownEntity(entity.to_string())),
        }
    }

    fn property_kind<'s>(
        &self,
        schema: &'s Schema,
        id: &ObjectId,
        name: &str,
    ) -> ContextResult<PropertyKind<'s>> {
        if !self.graph.contains(id) {
            return Err(ContextError::ObjectNotFound(id.clone()));
        }
        schema
            .entity(id.entity())
            .ok_or_else(|| ContextError::UnknownEntity(id.entity().to_string()))?
            .property_kind(name)
            .ok_or_else(|| ContextError::UnknownProperty {
                entity: id.entity().to_string(),
                property: name.to_string(),
            })
    }

    fn relationship<'s>(
        &self,
        schema: &'s Schema,
        id: &ObjectId,
        name: &str,
        cardinality: Cardinality,
    ) -> ContextResult<&'s RelationshipDescriptor> {
        let expected = match cardinality {
            Cardinality::ToOne => "a to-one relationship",
            Cardinality::ToMany => "a to-many relationship",
        };
        match self.property_kind(schema, id, name)? {
            PropertyKind::Relationship(relationship) if relationship.cardinality == cardinality => {
                Ok(relationship)
            }
            _ => Err(wrong_kind(id, name, expected)),
        }
    }

    fn check_target(
        &self,
        relationship: &RelationshipDescriptor,
        target: &ObjectId,
    ) -> ContextResult<()> {
        if target.entity() != relationship.destination {
            return Err(ContextError::WrongTarget {
                relationship: relationship.name.clone(),
                expected: relationship.destination.clone(),
                target: target.clone(),
            });
        }
        if !self.graph.contains(target) {
            return Err(ContextError::ObjectNotFound(target.clone()));
        }
        Ok(())
    }

    /// Links `holder` to `target` on both sides, detaching a previous holder
    /// when the inverse side is to-one.
    fn attach(
        &mut self,
        holder: &ObjectId,
        relationship: &RelationshipDescriptor,
        inverse: Option<&RelationshipDescriptor>,
        target: &ObjectId,
    ) {
        if let Some(inverse) = inverse {
            if inverse.cardinality == Cardinality::ToOne {
                let previous_holder = self
                    .graph
                    .object(target)
                    .and_then(|object| object.to_one(&inverse.name))
                    .cloned();
                if let Some(previous_holder) = previous_holder.filter(|other| other != holder) {
                    self.unlink(&previous_holder, &relationship.name, target);
                }
            }
        }
        self.link(holder, &relationship.name, target);
        if let Some(inverse) = inverse {
            self.link(target, &inverse.name, holder);
        }
    }

    fn link(&mut self, holder: &ObjectId, name: &str, target: &ObjectId) {
        let Some(object) = self.graph.get_mut(holder) else {
            return;
        };
        let next = match object.value(name) {
            Some(PropertyValue::ToOne(_)) => PropertyValue::ToOne(Some(target.clone())),
            Some(PropertyValue::ToMany(targets)) => {
                let mut targets = targets.clone();
                targets.insert(target.clone());
                PropertyValue::ToMany(targets)
            }
            _ => return,
        };
        object.set_value(name, next);
    }

    fn unlink(&mut self, holder: &ObjectId, name: &str, target: &ObjectId) {
        let Some(object) = self.graph.get_mut(holder) else {
            return;
        };
        let next = match object.value(name) {
            Some(PropertyValue::ToOne(Some(current))) if current == target => {
                PropertyValue::ToOne(None)
            }
            Some(PropertyValue::ToMany(targets)) if targets.contains(target) => {
                let mut targets = targets.clone();
                targets.remove(target);
                PropertyValue::ToMany(targets)
            }
            _ => return,
        };
        object.set_value(name, next);
    }
}

fn inverse_of<'s>(
    schema: &'s Schema,
    relationship: &RelationshipDescriptor,
) -> Option<&'s RelationshipDescriptor> {
    let inverse = relationship.inverse.as_deref()?;
    schema
        .entity(&relationship.destination)?
        .relationship_named(inverse)
}

fn wrong_kind(id: &ObjectId, name: &str, expected: &'static str) -> ContextError {
    ContextError::WrongPropertyKind {
        entity: id.entity().to_string(),
        property: name.to_string(),
        expected,
    }
}
