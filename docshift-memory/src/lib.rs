//! In-memory document storage backend for docshift.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` and
//! `CollectionHandle` traits. It uses async-aware read-write locks for concurrent access and
//! is meant for development and tests.
//!
//! # Features
//!
//! - **Filter evaluation** - Dotted paths, comparison, membership, logical operators and `$regex`
//! - **Find options** - Multi-key sort, skip, limit and include/exclude projections
//! - **Index bookkeeping** - Named indexes with unique enforcement and an event log
//!
//! # Quick Start
//!
//! ```ignore
//! use docshift::prelude::*;
//! use docshift::memory::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = InMemoryStore::builder().build().await?;
//!     let mut component = Component::new("blog").with(
//!         ManagedCollection::new("articles")
//!             .with_index(IndexDeclaration::new("slug", 1, IndexDefinition::new(doc! { "slug": 1 }).unique())?),
//!     );
//!
//!     component.start(&store).await?;
//!     Ok(())
//! }
//! ```

mod evaluator;
pub mod store;

pub use store::{InMemoryCollection, InMemoryStore, InMemoryStoreBuilder, IndexEvent};
