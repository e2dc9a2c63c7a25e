//! Schema and object model shared by every layer.
//!
//! # Responsibility
//! - Describe entities, attributes and relationships.
//! - Define object identity and property values.
//!
//! # Invariants
//! - `ObjectId` is the only key used to look objects up.
//! - Schemas are validated once and never mutated afterwards.

pub mod graph;
pub mod object;
pub mod schema;
