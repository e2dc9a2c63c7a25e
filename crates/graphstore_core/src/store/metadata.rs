//! Store-level metadata.
//!
//! # Responsibility
//! - Hold the store type, store instance UUID and reference-id counter.
//! - Keep unknown keys so documents round-trip verbatim.
//!
//! # Invariants
//! - `object_counter` is the next reference id to hand out and only grows.
//! - Metadata is created per store instance, never shared globally.

use crate::model::object::{ReferenceId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const STORE_TYPE_KEY: &str = "store_type";
pub const STORE_UUID_KEY: &str = "store_uuid";
pub const OBJECT_COUNTER_KEY: &str = "object_counter";
pub const LAST_SAVED_KEY: &str = "last_saved_ms";

/// First reference id handed out by a fresh store.
pub const FIRST_REFERENCE_ID: ReferenceId = 1;

/// Ordered mapping of metadata keys to scalar values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreMetadata {
    entries: BTreeMap<String, Value>,
}

impl StoreMetadata {
    /// Metadata for a brand-new store instance.
    pub fn fresh(store_type: &str) -> Self {
        let mut metadata = Self::default();
        metadata.insert(STORE_TYPE_KEY, Value::from(store_type));
        metadata.insert(STORE_UUID_KEY, Value::from(Uuid::new_v4().to_string()));
        metadata.insert(
            OBJECT_COUNTER_KEY,
            Value::Integer(FIRST_REFERENCE_ID as i64),
        );
        metadata
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn store_type(&self) -> Option<&str> {
        self.get(STORE_TYPE_KEY).and_then(Value::as_text)
    }

    pub fn store_uuid(&self) -> Option<&str> {
        self.get(STORE_UUID_KEY).and_then(Value::as_text)
    }

    /// Next reference id, or `None` when the counter is absent or invalid.
    pub fn object_counter(&self) -> Option<ReferenceId> {
        let raw = self.get(OBJECT_COUNTER_KEY)?.as_integer()?;
        let counter = ReferenceId::try_from(raw).ok()?;
        (counter >= FIRST_REFERENCE_ID).then_some(counter)
    }

    pub fn last_saved_ms(&self) -> Option<i64> {
        self.get(LAST_SAVED_KEY).and_then(Value::as_integer)
    }

    /// Hands out the current counter value and advances it by one.
    ///
    /// Returns `None` when the counter is missing, invalid or exhausted;
    /// the counter is left untouched in that case.
    pub(crate) fn take_reference_id(&mut self) -> Option<ReferenceId> {
        let current = self.object_counter()?;
        let next = current.checked_add(1)?;
        let stored = i64::try_from(next).ok()?;
        self.insert(OBJECT_COUNTER_KEY, Value::Integer(stored));
        Some(current)
    }

    pub(crate) fn stamp_saved(&mut self) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default();
        self.insert(LAST_SAVED_KEY, Value::Integer(now_ms));
    }
}
