//! In-memory graph of live objects.
//!
//! # Invariants
//! - Objects are keyed and iterated by `ObjectId`.
//! - Every object belongs to an entity of `schema`.

use crate::model::object::{ManagedObject, ObjectId};
use crate::model::schema::Schema;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only view handed to observers while a change batch is delivered.
#[derive(Debug, Clone)]
pub struct ObjectGraph {
    schema: Arc<Schema>,
    objects: BTreeMap<ObjectId, ManagedObject>,
}

impl ObjectGraph {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            objects: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn object(&self, id: &ObjectId) -> Option<&ManagedObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// All objects in `ObjectId` order.
    pub fn objects(&self) -> impl Iterator<Item = &ManagedObject> {
        self.objects.values()
    }

    /// Objects of one entity in ascending reference-id order.
    pub fn objects_of<'a>(
        &'a self,
        entity: &'a str,
    ) -> impl Iterator<Item = &'a ManagedObject> + 'a {
        self.objects
            .range(ObjectId::new(entity, 0)..)
            .map(|(_, object)| object)
            .take_while(move |object| object.entity() == entity)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub(crate) fn insert(&mut self, object: ManagedObject) {
        self.objects.insert(object.id().clone(), object);
    }

    pub(crate) fn remove(&mut self, id: &ObjectId) -> Option<ManagedObject> {
        self.objects.remove(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ObjectId) -> Option<&mut ManagedObject> {
        self.objects.get_mut(id)
    }

    pub(crate) fn objects_mut(&mut self) -> impl Iterator<Item = &mut ManagedObject> {
        self.objects.values_mut()
    }
}
