//! Decode targets for raw documents read from a collection.
//!
//! A [`DocumentPrototype`] knows how to allocate an empty value of one document type and
//! how to fill it from a raw BSON document. The versioned collections and the table query
//! decode every row through a prototype, so each row lands in its own freshly allocated
//! value.

use bson::{Document, de::deserialize_from_document};
use serde::de::DeserializeOwned;
use std::{fmt, marker::PhantomData};

use crate::error::DocumentStoreResult;

/// Path of the schema version marker carried by every managed document.
pub const VERSION_KEY: &str = "meta.version";

/// Factory and decoder for one document type.
///
/// # Example
///
/// ```ignore
/// use docshift::document::{DocumentPrototype, SerdePrototype};
///
/// #[derive(Debug, Default, serde::Deserialize)]
/// struct Article { title: String }
///
/// let prototype = SerdePrototype::<Article>::new();
/// let mut article = prototype.new_instance();
/// prototype.decode_into(bson::doc! { "title": "Hello" }, &mut article)?;
/// ```
pub trait DocumentPrototype: Send + Sync {
    /// The in-memory document type.
    type Target: Send;

    /// Allocates a fresh, independently owned value.
    fn new_instance(&self) -> Self::Target;

    /// Decodes `raw` into `instance`, overwriting its contents.
    fn decode_into(&self, raw: Document, instance: &mut Self::Target) -> DocumentStoreResult<()>;
}

/// A [`DocumentPrototype`] for any serde-deserializable type with a `Default`.
pub struct SerdePrototype<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdePrototype<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for SerdePrototype<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SerdePrototype<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdePrototype")
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> DocumentPrototype for SerdePrototype<T>
where
    T: DeserializeOwned + Default + Send,
{
    type Target = T;

    fn new_instance(&self) -> T {
        T::default()
    }

    fn decode_into(&self, raw: Document, instance: &mut T) -> DocumentStoreResult<()> {
        *instance = deserialize_from_document(raw)?;
        Ok(())
    }
}

/// A [`DocumentPrototype`] that keeps rows as raw documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawPrototype;

impl DocumentPrototype for RawPrototype {
    type Target = Document;

    fn new_instance(&self) -> Document {
        Document::new()
    }

    fn decode_into(&self, raw: Document, instance: &mut Document) -> DocumentStoreResult<()> {
        *instance = raw;
        Ok(())
    }
}

/// Reads the version marker of a raw document. An absent marker is version 0.
pub fn version_of(document: &Document) -> i64 {
    document
        .get_document("meta")
        .ok()
        .and_then(|meta| match meta.get("version") {
            Some(bson::Bson::Int32(v)) => Some(*v as i64),
            Some(bson::Bson::Int64(v)) => Some(*v),
            Some(bson::Bson::Double(v)) => Some(*v as i64),
            _ => None,
        })
        .unwrap_or(0)
}
