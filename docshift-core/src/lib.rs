//! Schema-versioned collections and a dynamic query compiler for document stores.
//!
//! This crate is the core of the docshift project and provides:
//!
//! - **Store capability** ([`backend`]) - Traits implemented by the in-memory and MongoDB backends
//! - **Index reconciliation** ([`index`]) - Versioned index declarations kept in sync at startup
//! - **Schema versions** ([`version`]) - Version guard and lazy migration of older documents
//! - **Decode targets** ([`document`]) - Prototypes that decode raw rows into fresh values
//! - **Query compiler** ([`query`]) - Flat parameter maps compiled into filter documents
//! - **Projection and sort** ([`select`]) - Include/exclude projections and sort documents
//! - **Table queries** ([`table`]) - Paged, compiled queries over a collection
//! - **Converters** ([`convert`]) - Built-in string converters for query parameters
//! - **Startup** ([`component`]) - Reconcile and activate all collections of a component
//! - **Error handling** ([`error`]) - Error taxonomy and result type
//!
//! # Example
//!
//! ```ignore
//! use docshift::prelude::*;
//! use bson::doc;
//!
//! let specs = QuerySpecSet::new()
//!     .with("name", FieldSpec::field("name", "$eq"))
//!     .with("minAge", FieldSpec::field("age", "$gte").convert(convert::int));
//!
//! let compiled = compile(doc! { "name": "Bob", "minAge": "18" }, &specs, true)?;
//! let adults = users.count_documents(compiled.filter_or_all()).await?;
//! ```

pub mod backend;
pub mod bson_ext;
pub mod component;
pub mod convert;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod select;
pub mod table;
pub mod version;
