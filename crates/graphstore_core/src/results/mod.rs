//! Sectioned, sorted result sets kept current by change notifications.
//!
//! # Responsibility
//! - Fetch the objects of one entity into named, sorted sections.
//! - Turn a saved change batch into ordered section and row events.
//! - Call back per observed object when a saved batch updates it.
//!
//! # Invariants
//! - Every section is non-empty and holds objects of one section name.
//! - Rows inside a section follow the sort comparator, ties broken by
//!   `ObjectId`.
//! - A batch that fails validation changes nothing and emits nothing.

use crate::model::object::{ManagedObject, ObjectId};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod controller;
mod listener;
mod object_observer;
mod section;

pub use controller::{FetchSpec, ResultSetController};
pub use listener::{ChangeEvent, ChangeLog, ChangeType, ResultSetListener};
pub use object_observer::ObjectObserver;
pub use section::{IndexPath, Section, DEFAULT_SECTION_NAME};

pub type ObserverResult<T> = Result<T, ObserverError>;

/// Typed view over a live object, built when it enters a result set.
pub trait ResultWrapper: Sized {
    fn from_persisted_object(object: &ManagedObject) -> Result<Self, WrapperError>;

    fn object_id(&self) -> &ObjectId;
}

/// A live object could not be wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperError {
    object: ObjectId,
    message: String,
}

impl WrapperError {
    pub fn new(object: &ObjectId, message: impl Into<String>) -> Self {
        Self {
            object: object.clone(),
            message: message.into(),
        }
    }

    pub fn object(&self) -> &ObjectId {
        &self.object
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for WrapperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot wrap {}: {}", self.object, self.message)
    }
}

impl Error for WrapperError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverError {
    /// Fetch request cannot be executed.
    Fetch(String),
    Wrap(WrapperError),
    /// Deleted or updated identity is not in the result set.
    MissingObject(ObjectId),
    /// Inserted identity is already in the result set.
    DuplicateObject(ObjectId),
    /// Identity appears in more than one set of the same batch.
    OverlappingChange(ObjectId),
}

impl ObserverError {
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingObject(_) | Self::DuplicateObject(_) | Self::OverlappingChange(_)
        )
    }
}

impl Display for ObserverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(message) => write!(f, "fetch failed: {message}"),
            Self::Wrap(err) => write!(f, "{err}"),
            Self::MissingObject(id) => write!(f, "object {id} is not in the result set"),
            Self::DuplicateObject(id) => write!(f, "object {id} is already in the result set"),
            Self::OverlappingChange(id) => {
                write!(f, "object {id} appears in more than one change set")
            }
        }
    }
}

impl Error for ObserverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Wrap(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WrapperError> for ObserverError {
    fn from(value: WrapperError) -> Self {
        Self::Wrap(value)
    }
}
