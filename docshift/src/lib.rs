//! Main docshift crate: schema-versioned collections and dynamic queries for document stores.
//!
//! This crate is the primary entry point of the docshift framework. It re-exports the core
//! types from the sub-crates and gives access to the storage backends.
//!
//! # Features
//!
//! - **Versioned indexes** - Indexes declared with a version are created, rebuilt or kept at startup
//! - **Schema versions** - Newer data is refused, older documents are upgraded in place
//! - **Query compiler** - Untyped request parameters become store filters with conversion and AND/OR groups
//! - **Multiple backends** - In-memory and MongoDB implementations of one capability trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docshift::{prelude::*, memory::InMemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! pub struct Article {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     pub id: Option<bson::oid::ObjectId>,
//!     pub title: String,
//!     pub meta: Meta,
//! }
//!
//! struct ArticleV2;
//!
//! #[async_trait::async_trait]
//! impl Upgrader<Article> for ArticleV2 {
//!     async fn upgrade(&self, collection: &dyn CollectionHandle, mut article: Article) -> DocumentStoreResult<()> {
//!         article.title = article.title.trim().to_string();
//!         article.meta.version = 2;
//!         let replacement = bson::serialize_to_document(&article)?;
//!         collection.replace_one(doc! { "_id": article.id }, replacement).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = InMemoryStore::builder().build().await?;
//!
//!     let mut blog = Component::new("blog").with(
//!         ManagedCollection::new("articles")
//!             .with_index(IndexDeclaration::new("title", 1, IndexDefinition::new(doc! { "title": 1 }))?)
//!             .versioned(VersionedCollection::new(2, SerdePrototype::<Article>::new(), ArticleV2)?),
//!     );
//!     blog.start(&store).await?;
//!
//!     let specs = QuerySpecSet::new().with("q", FieldSpec::field("title", "$eq"));
//!     let request = TableRequest { query: doc! { "q": "Hello" }, limit: 20, ..Default::default() };
//!     let page = table_query(
//!         store.collection("articles").as_ref(),
//!         &request,
//!         &specs,
//!         true,
//!         &SerdePrototype::<Article>::new(),
//!     )
//!     .await?;
//!
//!     println!("{} articles", page.count);
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docshift_core::{
    backend, bson_ext, component, convert, document, error, index, query, select, table, version,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docshift_memory::{InMemoryCollection, InMemoryStore, InMemoryStoreBuilder, IndexEvent};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docshift_mongodb::{MongoDbCollection, MongoDbStore, MongoDbStoreBuilder};
}
