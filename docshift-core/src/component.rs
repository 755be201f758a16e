//! Startup orchestration for the collections owned by one component.
//!
//! A [`Component`] declares, for each collection it owns, the indexes to maintain and an
//! optional schema version. [`Component::start`] binds every collection to the store and then,
//! collection by collection in name order, reconciles the indexes and activates the version.
//! The first failure aborts startup, wrapped in [`DocumentStoreError::Activation`] with the
//! collection name; [`DocumentStoreError::root`] recovers the underlying error.
//!
//! # Example
//!
//! ```ignore
//! let mut component = Component::new("blog")
//!     .with(
//!         ManagedCollection::new("articles")
//!             .with_index(IndexDeclaration::new("title", 1, IndexDefinition::new(doc! { "title": 1 }))?)
//!             .versioned(VersionedCollection::new(2, SerdePrototype::<Article>::new(), ArticleV2)?),
//!     );
//!
//! tokio::time::timeout(Duration::from_secs(30), component.start(&store)).await??;
//! let articles = component.collection("articles");
//! ```

use std::{collections::BTreeMap, fmt};
use tracing::info;

use crate::{
    backend::{CollectionRef, StoreBackend},
    error::{DocumentStoreError, DocumentStoreResult},
    index::{IndexDeclaration, reconcile},
    version::{ActivationState, VersionSpec},
};

/// One collection owned by a component.
pub struct ManagedCollection {
    name: String,
    indexes: Vec<IndexDeclaration>,
    version: Option<Box<dyn VersionSpec>>,
    handle: Option<CollectionRef>,
}

impl ManagedCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
            version: None,
            handle: None,
        }
    }

    pub fn with_index(mut self, declaration: IndexDeclaration) -> Self {
        self.indexes.push(declaration);
        self
    }

    pub fn with_indexes(mut self, declarations: impl IntoIterator<Item = IndexDeclaration>) -> Self {
        self.indexes.extend(declarations);
        self
    }

    /// Attaches a schema version to activate on start.
    pub fn versioned(mut self, version: impl VersionSpec + 'static) -> Self {
        self.version = Some(Box::new(version));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indexes(&self) -> &[IndexDeclaration] {
        &self.indexes
    }

    /// The bound collection, once [`Component::start`] has run.
    pub fn handle(&self) -> Option<&CollectionRef> {
        self.handle.as_ref()
    }

    /// Activation state of the attached version, if any.
    pub fn version_state(&self) -> Option<ActivationState> {
        self.version.as_ref().map(|version| version.state())
    }
}

impl fmt::Debug for ManagedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCollection")
            .field("name", &self.name)
            .field("indexes", &self.indexes)
            .field("version", &self.version.as_ref().map(|v| v.target_version()))
            .field("bound", &self.handle.is_some())
            .finish()
    }
}

/// The set of collections one component owns.
#[derive(Debug)]
pub struct Component {
    name: String,
    collections: BTreeMap<String, ManagedCollection>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: BTreeMap::new(),
        }
    }

    /// Declares a collection, replacing any earlier declaration of the same name.
    pub fn with(mut self, collection: ManagedCollection) -> Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds, reconciles and activates every declared collection.
    ///
    /// Collections already processed when a failure occurs keep their changes.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Activation`] wrapping the first reconcile or activation
    /// failure.
    pub async fn start<B>(&mut self, store: &B) -> DocumentStoreResult<()>
    where
        B: StoreBackend + ?Sized,
    {
        info!(component = %self.name, collections = self.collections.len(), "starting component");

        for managed in self.collections.values_mut() {
            managed.handle = Some(store.collection(&managed.name));
        }

        for managed in self.collections.values_mut() {
            let handle = managed
                .handle
                .clone()
                .unwrap_or_else(|| store.collection(&managed.name));
            let wrap = |e| DocumentStoreError::Activation {
                collection: managed.name.clone(),
                source: Box::new(e),
            };

            reconcile(handle.as_ref(), &managed.indexes).await.map_err(wrap)?;

            if let Some(version) = managed.version.as_mut() {
                version.activate(handle).await.map_err(wrap)?;
            }
        }

        info!(component = %self.name, "component started");
        Ok(())
    }

    /// The bound handle of a declared collection.
    pub fn collection(&self, name: &str) -> Option<CollectionRef> {
        self.collections.get(name).and_then(|managed| managed.handle.clone())
    }

    pub fn managed(&self, name: &str) -> Option<&ManagedCollection> {
        self.collections.get(name)
    }

    /// Declared collection names, in start order.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}
