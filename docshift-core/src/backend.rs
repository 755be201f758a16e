//! Store capability required by the reconciler, the versioned collections and the table query.
//!
//! This module defines the traits that abstract over concrete drivers, so that index
//! reconciliation, schema migration and query execution work the same against an
//! in-memory store or a MongoDB deployment.
//!
//! # Traits
//!
//! - [`StoreBackend`]: resolves collection handles and manages collections
//! - [`CollectionHandle`]: the per-collection operations (indexes, counting, cursors, writes)
//! - [`StoreBackendBuilder`]: factory trait for creating backend instances
//!
//! # Cancellation
//!
//! Every operation is an `async fn`. Dropping the returned future cancels the call; a deadline
//! is applied by wrapping the caller's future (for example with `tokio::time::timeout`).
//! Work already applied by the store before cancellation is left as-is.
//!
//! # Examples
//!
//! ```ignore
//! use docshift::backend::StoreBackend;
//! use bson::doc;
//!
//! let articles = backend.collection("articles");
//! let newer = articles
//!     .count_documents(doc! { "meta.version": { "$gt": 2 } })
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;
use std::{fmt::Debug, sync::Arc, time::Duration};

use crate::error::DocumentStoreResult;

/// A lazy, forward-only, at-most-once stream of raw documents.
pub type DocumentCursor = BoxStream<'static, DocumentStoreResult<Document>>;

/// Shared handle to a live collection.
pub type CollectionRef = Arc<dyn CollectionHandle>;

/// Driver-independent description of a secondary index.
///
/// Backends translate this into their native index model. The index name is not part of
/// the definition: it is derived from the declaration's name and version at creation time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexDefinition {
    /// Key specification, e.g. `{ "title": 1, "created": -1 }`.
    pub keys: Document,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Whether documents lacking the indexed fields are skipped.
    pub sparse: bool,
    /// TTL for documents, if this is an expiring index.
    pub expire_after: Option<Duration>,
}

impl IndexDefinition {
    /// Creates a plain index on the given keys.
    pub fn new(keys: Document) -> Self {
        Self { keys, ..Default::default() }
    }

    /// Marks the index as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index as sparse.
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Makes documents expire the given duration after the indexed date.
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }
}

/// A live index as reported by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// The stored index name.
    pub name: String,
    /// The namespace (`database.collection`) the index belongs to.
    pub namespace: String,
}

/// Options applied to a [`CollectionHandle::find`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification, e.g. `{ "created": -1 }`.
    pub sort: Option<Document>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Projection, e.g. `{ "body": 0 }`.
    pub projection: Option<Document>,
    /// Collation in the server's document form, e.g. `{ "locale": "en", "strength": 2 }`.
    pub collation: Option<Document>,
}

/// Per-collection operations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; handles are shared between the orchestrator,
/// the upgraders and request handlers.
#[async_trait]
pub trait CollectionHandle: Send + Sync + Debug {
    /// Returns the name of this collection.
    fn name(&self) -> &str;

    /// Lists all indexes currently defined on the collection, including `_id_`.
    async fn list_indexes(&self) -> DocumentStoreResult<Vec<IndexInfo>>;

    /// Creates an index with the given definition under the given name.
    async fn create_index(&self, definition: IndexDefinition, name: &str) -> DocumentStoreResult<()>;

    /// Drops the index stored under `name`.
    async fn drop_index(&self, name: &str) -> DocumentStoreResult<()>;

    /// Counts documents matching `filter`.
    async fn count_documents(&self, filter: Document) -> DocumentStoreResult<u64>;

    /// Opens a cursor over documents matching `filter`.
    ///
    /// The cursor is lazy: documents are fetched and decoded as the stream is polled.
    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<DocumentCursor>;

    /// Inserts new documents. Documents without an `_id` are assigned one.
    async fn insert_documents(&self, documents: Vec<Document>) -> DocumentStoreResult<()>;

    /// Replaces the first document matching `filter`, returning the number of matched documents.
    async fn replace_one(&self, filter: Document, replacement: Document) -> DocumentStoreResult<u64>;
}

/// Abstract interface for document storage backends.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Resolves a handle to the named collection. The collection need not exist yet.
    fn collection(&self, name: &str) -> CollectionRef;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Drops a collection with all its documents and indexes.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    fn collection(&self, name: &str) -> CollectionRef {
        (**self).collection(name)
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).drop_collection(name).await
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        (**self).shutdown().await
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
