//! Convenient re-exports of commonly used types from docshift.
//!
//! ```ignore
//! use docshift::prelude::*;
//! ```
//!
//! This provides access to:
//! - Store capability traits and builders
//! - Index declarations and reconciliation
//! - Versioned collections, prototypes and upgraders
//! - The query compiler, projection and table helpers
//! - Component startup and error types

pub use bson::doc;

pub use docshift_core::{
    backend::{
        CollectionHandle, CollectionRef, DocumentCursor, FindOptions, IndexDefinition, StoreBackend,
        StoreBackendBuilder,
    },
    component::{Component, ManagedCollection},
    convert,
    document::{DocumentPrototype, RawPrototype, SerdePrototype, VERSION_KEY},
    error::{DocumentStoreError, DocumentStoreResult},
    index::{IndexDeclaration, reconcile},
    query::{Compiled, DynamicSpec, FieldSpec, LogicNode, ParamMap, QuerySpecSet, compile, compile_with_logic},
    select::{convert_sort, make_select, validate_select},
    table::{TableRequest, TableResult, base_query, table_query},
    version::{ActivationState, Upgrader, VersionSpec, VersionedCollection},
};
