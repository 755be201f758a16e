//! Schema-versioned collections with lazy, startup-time migration.
//!
//! A [`VersionedCollection`] declares the schema version the running code writes, a
//! [`DocumentPrototype`] to decode stored documents, and an [`Upgrader`] that brings one
//! older document up to date. Activation runs once per process start:
//!
//! 1. **Guard**: if any document carries a version marker greater than the target, the
//!    running code is older than the data and activation fails with
//!    [`DocumentStoreError::IncompatibleVersion`]. Nothing is migrated.
//! 2. **Migration**: every document whose marker is lower than the target, or absent, is
//!    streamed through a single cursor, decoded into a fresh instance and handed to the
//!    upgrader, which persists the new shape and stamps the new marker itself.
//!
//! A failing document aborts the migration. Documents already upgraded stay upgraded, and
//! since the cursor only selects documents below the target, re-running is safe.
//!
//! # Example
//!
//! ```ignore
//! use docshift::version::{Upgrader, VersionedCollection};
//! use docshift::document::SerdePrototype;
//!
//! struct StampV2;
//!
//! #[async_trait::async_trait]
//! impl Upgrader<Article> for StampV2 {
//!     async fn upgrade(&self, collection: &dyn CollectionHandle, mut article: Article) -> DocumentStoreResult<()> {
//!         article.meta.version = 2;
//!         collection.replace_one(doc! { "_id": article.id }, serialize_to_document(&article)?).await?;
//!         Ok(())
//!     }
//! }
//!
//! let mut spec = VersionedCollection::new(2, SerdePrototype::<Article>::new(), StampV2)?;
//! spec.activate(store.collection("articles")).await?;
//! ```

use async_trait::async_trait;
use bson::{Document, doc};
use futures::TryStreamExt;
use std::fmt;
use tracing::info;

use crate::{
    backend::{CollectionHandle, CollectionRef, FindOptions},
    document::{DocumentPrototype, VERSION_KEY},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Activation state of a versioned collection. Transitions happen only at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Not yet checked against the store.
    Unchecked,
    /// The guard found documents newer than the target version.
    Fatal,
    /// The guard passed; lower-versioned documents are being upgraded.
    Migrating,
    /// Every document is at the target version.
    Migrated,
}

/// Upgrades one decoded record to the current shape and persists it.
#[async_trait]
pub trait Upgrader<T>: Send + Sync {
    /// Transforms `record` and writes it back through `collection`, stamping the new
    /// version marker.
    async fn upgrade(&self, collection: &dyn CollectionHandle, record: T) -> DocumentStoreResult<()>;
}

/// Object-safe view of a versioned collection, used by the component orchestrator to hold
/// collections of different document types side by side.
#[async_trait]
pub trait VersionSpec: Send + Sync {
    /// The schema version the running code writes.
    fn target_version(&self) -> i64;

    /// The current activation state.
    fn state(&self) -> ActivationState;

    /// Attaches `collection`, runs the guard and migrates lower versions.
    ///
    /// Returns the number of documents handed to the upgrader.
    async fn activate(&mut self, collection: CollectionRef) -> DocumentStoreResult<u64>;
}

/// A logical collection with a declared schema version.
pub struct VersionedCollection<P, U> {
    target_version: i64,
    prototype: P,
    upgrader: U,
    collection: Option<CollectionRef>,
    state: ActivationState,
}

impl<P, U> VersionedCollection<P, U>
where
    P: DocumentPrototype,
    U: Upgrader<P::Target>,
{
    /// Creates a new versioned collection declaration.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Config`] if `target_version` is lower than 1.
    pub fn new(target_version: i64, prototype: P, upgrader: U) -> DocumentStoreResult<Self> {
        if target_version < 1 {
            return Err(DocumentStoreError::Config(format!(
                "target version must be >= 1, got {}",
                target_version
            )));
        }

        Ok(Self {
            target_version,
            prototype,
            upgrader,
            collection: None,
            state: ActivationState::Unchecked,
        })
    }

    /// The attached live collection, once activated.
    pub fn collection(&self) -> Option<&CollectionRef> {
        self.collection.as_ref()
    }

    /// Streams every document below the target version through the upgrader.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Config`] if no collection is attached, or the first
    /// cursor, decode or upgrade failure.
    pub async fn migrate_lower_versions(&self) -> DocumentStoreResult<u64> {
        let collection = self.collection.as_deref().ok_or_else(|| {
            DocumentStoreError::Config("versioned collection has no attached collection".to_string())
        })?;

        let mut cursor = collection
            .find(lower_versions_filter(self.target_version), FindOptions::default())
            .await
            .map_err(|e| DocumentStoreError::driver("query lower-versioned documents", e))?;

        let mut migrated = 0_u64;
        while let Some(raw) = cursor
            .try_next()
            .await
            .map_err(|e| DocumentStoreError::driver("read lower-versioned document", e))?
        {
            let mut record = self.prototype.new_instance();
            self.prototype.decode_into(raw, &mut record)?;
            self.upgrader.upgrade(collection, record).await?;

            migrated += 1;
        }

        Ok(migrated)
    }
}

#[async_trait]
impl<P, U> VersionSpec for VersionedCollection<P, U>
where
    P: DocumentPrototype,
    U: Upgrader<P::Target>,
{
    fn target_version(&self) -> i64 {
        self.target_version
    }

    fn state(&self) -> ActivationState {
        self.state
    }

    async fn activate(&mut self, collection: CollectionRef) -> DocumentStoreResult<u64> {
        let name = collection.name().to_string();
        self.collection = Some(collection.clone());

        info!(collection = %name, target = self.target_version, "checking document versions");

        if has_higher_version(collection.as_ref(), self.target_version)
            .await
            .map_err(|e| DocumentStoreError::driver("check for higher-versioned documents", e))?
        {
            self.state = ActivationState::Fatal;
            return Err(DocumentStoreError::IncompatibleVersion {
                collection: name,
                target: self.target_version,
            });
        }

        self.state = ActivationState::Migrating;
        let migrated = self
            .migrate_lower_versions()
            .await
            .map_err(|e| DocumentStoreError::Migration {
                collection: name.clone(),
                source: Box::new(e),
            })?;

        self.state = ActivationState::Migrated;
        info!(collection = %name, migrated, "document versions up to date");

        Ok(migrated)
    }
}

impl<P, U> fmt::Debug for VersionedCollection<P, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedCollection")
            .field("target_version", &self.target_version)
            .field("collection", &self.collection.as_ref().map(|c| c.name().to_string()))
            .field("state", &self.state)
            .finish()
    }
}

/// Returns whether `collection` holds any document with a version marker above `target`.
pub async fn has_higher_version(
    collection: &dyn CollectionHandle,
    target: i64,
) -> DocumentStoreResult<bool> {
    Ok(collection
        .count_documents(doc! { VERSION_KEY: { "$gt": target } })
        .await?
        > 0)
}

/// Filter selecting documents whose marker is below `target` or absent.
pub fn lower_versions_filter(target: i64) -> Document {
    doc! {
        "$or": [
            { VERSION_KEY: { "$lt": target } },
            { VERSION_KEY: { "$exists": false } },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RawPrototype;

    struct Noop;

    #[async_trait]
    impl Upgrader<Document> for Noop {
        async fn upgrade(&self, _: &dyn CollectionHandle, _: Document) -> DocumentStoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn rejects_target_below_one() {
        for target in [0, -1] {
            let err = VersionedCollection::new(target, RawPrototype, Noop).unwrap_err();
            assert!(matches!(err, DocumentStoreError::Config(_)));
        }
    }

    #[test]
    fn starts_unchecked_and_detached() {
        let spec = VersionedCollection::new(1, RawPrototype, Noop).unwrap();

        assert_eq!(spec.state(), ActivationState::Unchecked);
        assert_eq!(spec.target_version(), 1);
        assert!(spec.collection().is_none());
    }

    #[test]
    fn lower_versions_filter_includes_missing_markers() {
        assert_eq!(
            lower_versions_filter(3),
            doc! {
                "$or": [
                    { "meta.version": { "$lt": 3_i64 } },
                    { "meta.version": { "$exists": false } },
                ]
            }
        );
    }
}
