//! Unit-of-work services over the atomic store.
//!
//! # Responsibility
//! - Own live objects and validate every mutation against the schema.
//! - Push pending changes to the store, save, and publish the batch.

pub mod context;
