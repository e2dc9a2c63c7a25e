//! Synchronous change notification after a save.
//!
//! # Responsibility
//! - Describe one saved change batch as three identity sets.
//! - Deliver each batch to every live subscriber in subscription order.
//!
//! # Invariants
//! - The inserted, deleted and updated sets of one batch are disjoint.
//! - Observers see the graph read-only while a batch is delivered.

mod bus;

pub use bus::{BusError, ChangeNotification, ChangeObserver, NotificationBus, SubscriptionId};
