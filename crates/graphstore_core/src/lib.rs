//! Persistent object graph with atomic single-file storage.
//! Live objects are saved as one document and observed through sectioned
//! result sets.

pub mod config;
pub mod logging;
pub mod model;
pub mod notify;
pub mod results;
pub mod service;
pub mod store;

pub use config::{ConfigError, LoggingConfig, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::graph::ObjectGraph;
pub use model::object::{ManagedObject, ObjectId, PropertyValue, ReferenceId, Value};
pub use model::schema::{Cardinality, EntityDescriptor, Schema, SchemaError};
pub use notify::{BusError, ChangeNotification, ChangeObserver, NotificationBus, SubscriptionId};
pub use results::{
    ChangeEvent, ChangeLog, ChangeType, FetchSpec, IndexPath, ObjectObserver, ObserverError,
    ObserverResult, ResultSetController, ResultSetListener, ResultWrapper, Section, WrapperError,
};
pub use service::context::{ContextError, ContextResult, ObjectContext};
pub use store::{AtomicStore, LoadOutcome, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
