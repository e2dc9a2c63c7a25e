//! Atomic single-file object store.
//!
//! # Responsibility
//! - Keep every persisted object as a cache node keyed by `ObjectId`.
//! - Load and save the whole graph as one document.
//! - Resolve cross-object references in one pass after a bulk load.
//!
//! # Invariants
//! - Integrity violations (malformed documents, dangling references) are
//!   reported as errors and leave in-memory state untouched.
//! - A missing store file is an empty store, not an error.
//! - A saved document can always be loaded back.

use crate::config::ConfigError;
use crate::model::object::ObjectId;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod atomic_store;
pub mod codec;
pub mod document;
pub mod metadata;
pub mod node;

pub use atomic_store::{AtomicStore, LoadOutcome};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Store configuration is unset or invalid.
    Config(ConfigError),
    /// Reading, writing or renaming the store file failed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Encoding the document failed.
    Serialize(serde_json::Error),
    /// Document on disk does not have the expected structure.
    Malformed(String),
    /// A record could not be encoded or resolved.
    Codec(crate::store::codec::CodecError),
    /// Entity is not part of the store schema.
    UnknownEntity(String),
    /// A node with this identity is already cached.
    DuplicateNode(ObjectId),
    /// No node is cached for this identity.
    NodeNotFound(ObjectId),
    /// Metadata key is managed by the store itself.
    ReservedMetadataKey(String),
    /// The reference-id counter is missing or cannot advance.
    CounterExhausted,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the object graph itself is inconsistent.
    ///
    /// Callers must not continue working with the affected document.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::Codec(_) | Self::DuplicateNode(_)
        )
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid store configuration: {err}"),
            Self::Io { path, source } => write!(f, "store file `{}`: {source}", path.display()),
            Self::Serialize(err) => write!(f, "failed to encode store document: {err}"),
            Self::Malformed(message) => write!(f, "malformed store document: {message}"),
            Self::Codec(err) => write!(f, "store integrity violation: {err}"),
            Self::UnknownEntity(name) => write!(f, "entity not in schema: `{name}`"),
            Self::DuplicateNode(id) => write!(f, "cache node already exists: {id}"),
            Self::NodeNotFound(id) => write!(f, "cache node not found: {id}"),
            Self::ReservedMetadataKey(key) => write!(f, "metadata key `{key}` is reserved"),
            Self::CounterExhausted => write!(f, "reference id counter is unavailable"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Serialize(err) => Some(err),
            Self::Codec(err) => Some(err),
            Self::Malformed(_)
            | Self::UnknownEntity(_)
            | Self::DuplicateNode(_)
            | Self::NodeNotFound(_)
            | Self::ReservedMetadataKey(_)
            | Self::CounterExhausted => None,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<crate::store::codec::CodecError> for StoreError {
    fn from(value: crate::store::codec::CodecError) -> Self {
        Self::Codec(value)
    }
}
