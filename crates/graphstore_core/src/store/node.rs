//! Cache node: the store-side representation of one persisted object.
//!
//! # Invariants
//! - A node never changes its `ObjectId`.
//! - A resolved node only references identities present in the cache at
//!   resolution time.

use crate::model::object::{ObjectId, PropertySource, PropertyValue, ResolvedProperties};
use crate::store::document::SerializedRecord;

/// Lifecycle state of a node's property map.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    /// Raw serialized record; relationships are foreign-key pairs.
    Unresolved(SerializedRecord),
    /// Decoded properties; relationships are verified identities.
    Resolved(ResolvedProperties),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheNode {
    object_id: ObjectId,
    state: NodeState,
}

impl CacheNode {
    pub(crate) fn unresolved(object_id: ObjectId, record: SerializedRecord) -> Self {
        Self {
            object_id,
            state: NodeState::Unresolved(record),
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, NodeState::Resolved(_))
    }

    /// Resolved properties, or `None` while the node is unresolved.
    pub fn properties(&self) -> Option<&ResolvedProperties> {
        match &self.state {
            NodeState::Resolved(properties) => Some(properties),
            NodeState::Unresolved(_) => None,
        }
    }

    pub(crate) fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    pub(crate) fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }
}

impl PropertySource for CacheNode {
    fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties().and_then(|properties| properties.get(name))
    }
}
