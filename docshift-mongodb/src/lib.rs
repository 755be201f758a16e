//! MongoDB backend implementation for docshift.
//!
//! This crate implements the `StoreBackend` and `CollectionHandle` traits on the official
//! MongoDB driver. Filters compiled by the query compiler are passed to the server as-is,
//! index declarations become named driver index models, and cursors are streamed lazily.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docshift = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docshift::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "blog")
//!         .build()
//!         .await?;
//!
//!     component.start(&store).await?;
//!     Ok(())
//! }
//! ```

pub mod store;

pub use store::{MongoDbCollection, MongoDbStore, MongoDbStoreBuilder};
