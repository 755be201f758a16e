//! Error types and result types for versioned collections and query compilation.
//!
//! Every fallible operation in this crate returns [`DocumentStoreResult<T>`]. Errors are
//! never swallowed: driver failures are wrapped with context rather than replaced, and the
//! originating error can always be recovered with [`DocumentStoreError::root`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error used for wrapped sources and converter failures.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Represents all possible errors raised while reconciling, migrating or querying collections.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Invalid static configuration: a malformed index name, conflicting projection lists,
    /// a missing constructor argument or a malformed query spec.
    #[error("Configuration error: {0}")]
    Config(String),
    /// An externally supplied value could not be converted, or a converter produced
    /// the wrong shape.
    #[error("Conversion error for key '{key}': value {value} of type {type_name}: {reason}")]
    Conversion {
        /// The external parameter key.
        key: String,
        /// The raw value as received.
        value: String,
        /// The runtime type of the raw value.
        type_name: String,
        /// Why the conversion failed.
        reason: String,
    },
    /// An input value has the wrong shape for the operator it feeds.
    #[error("Validation error: {0}")]
    Validation(String),
    /// The collection holds documents written by a newer schema than the running code knows.
    #[error("Collection {collection} contains documents newer than version {target}")]
    IncompatibleVersion {
        /// The collection name.
        collection: String,
        /// The version the running code declares.
        target: i64,
    },
    /// A store/driver call failed. The driver error is kept as the source.
    #[error("{context}: {source}")]
    Driver {
        /// What was being attempted.
        context: String,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A backend rejected the request for a reason of its own (e.g. an unsupported operator).
    #[error("Backend error: {0}")]
    Backend(String),
    /// A write or index build collided with a unique index.
    #[error("Duplicate key in {namespace} for index {index}")]
    DuplicateKey {
        /// The namespace (`database.collection`) written to.
        namespace: String,
        /// The unique index that rejected the write.
        index: String,
    },
    /// No document matched where one was required.
    #[error("Document not found in collection {0}")]
    DocumentNotFound(String),
    /// Migrating the lower-versioned documents of a collection failed.
    #[error("Migration of collection {collection} failed: {source}")]
    Migration {
        /// The collection name.
        collection: String,
        /// The failure that aborted the migration.
        #[source]
        source: Box<DocumentStoreError>,
    },
    /// Starting a collection (index reconciliation or version activation) failed.
    #[error("Activation of collection {collection} failed: {source}")]
    Activation {
        /// The collection name.
        collection: String,
        /// The failure that aborted activation.
        #[source]
        source: Box<DocumentStoreError>,
    },
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl DocumentStoreError {
    /// Wraps any error as a [`DocumentStoreError::Driver`] with the given context.
    pub fn driver<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        DocumentStoreError::Driver { context: context.into(), source: source.into() }
    }

    /// Returns the originating error, looking through `Migration` and `Activation` wrappers.
    pub fn root(&self) -> &DocumentStoreError {
        match self {
            DocumentStoreError::Migration { source, .. }
            | DocumentStoreError::Activation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error, or the error it wraps, is a unique-index collision.
    ///
    /// Looks through `Migration`, `Activation` and `Driver` wrappers, so a duplicate key
    /// raised by an upgrader's write still classifies after activation wrapped it.
    pub fn is_duplicate_key(&self) -> bool {
        match self.root() {
            DocumentStoreError::DuplicateKey { .. } => true,
            DocumentStoreError::Driver { source, .. } => source
                .downcast_ref::<DocumentStoreError>()
                .is_some_and(DocumentStoreError::is_duplicate_key),
            _ => false,
        }
    }
}

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
