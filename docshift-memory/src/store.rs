//! In-memory storage implementation of the store capability.
//!
//! Collections are vectors of BSON documents kept in insertion order behind an async-aware
//! read-write lock. Index definitions are recorded per collection and unique indexes are
//! enforced on writes. Every index creation and drop is appended to an event log, which
//! makes reconciliation observable in tests.
//!
//! Of a find collation only `strength` is honoured, and only for sorting: strength 1 or 2
//! orders strings case-insensitively. Filters always compare strings exactly.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};
use tracing::debug;

use docshift_core::{
    backend::{
        CollectionHandle, CollectionRef, DocumentCursor, FindOptions, IndexDefinition, IndexInfo,
        StoreBackend, StoreBackendBuilder,
    },
    error::{DocumentStoreError, DocumentStoreResult},
    index::PRIMARY_KEY_INDEX,
};

use crate::evaluator::{Comparable, lookup, matches};

/// Database name used in index namespaces when none is configured.
pub const DEFAULT_DATABASE: &str = "memory";

/// An index change applied to an in-memory collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    Created(String),
    Dropped(String),
}

#[derive(Debug, Default)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: BTreeMap<String, IndexDefinition>,
    events: Vec<IndexEvent>,
}

type StoreMap = HashMap<String, CollectionState>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state; clones share the
/// same data. Queries scan every document of a collection.
///
/// # Example
///
/// ```ignore
/// use docshift_memory::InMemoryStore;
/// use docshift::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let users = store.collection("users");
/// users.insert_documents(vec![doc! { "name": "Alice", "age": 30 }]).await?;
/// assert_eq!(users.count_documents(doc! { "age": { "$gte": 18 } }).await?, 1);
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    database: String,
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::with_database(DEFAULT_DATABASE)
    }

    fn with_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// The database name used in index namespaces.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Index creations and drops applied to `collection`, oldest first.
    pub async fn index_events(&self, collection: &str) -> Vec<IndexEvent> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|state| state.events.clone())
            .unwrap_or_default()
    }

    /// A copy of every document in `collection`, in insertion order.
    pub async fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    fn collection(&self, name: &str) -> CollectionRef {
        Arc::new(InMemoryCollection {
            name: name.to_string(),
            namespace: format!("{}.{}", self.database, name),
            store: self.store.clone(),
        })
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.store.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store.write().await.remove(name);
        Ok(())
    }
}

/// A handle to one in-memory collection. The collection is created on first write.
pub struct InMemoryCollection {
    name: String,
    namespace: String,
    store: Arc<RwLock<StoreMap>>,
}

impl fmt::Debug for InMemoryCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCollection")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// The values a unique index compares, or `None` when a sparse index skips the document.
fn index_key(document: &Document, definition: &IndexDefinition) -> Option<Bson> {
    let values = definition
        .keys
        .keys()
        .map(|field| lookup(document, field).cloned())
        .collect::<Vec<_>>();

    if definition.sparse && values.iter().all(Option::is_none) {
        return None;
    }

    Some(Bson::Array(
        values
            .into_iter()
            .map(|value| value.unwrap_or(Bson::Null))
            .collect(),
    ))
}

fn duplicate_key(namespace: &str, index: &str) -> DocumentStoreError {
    DocumentStoreError::DuplicateKey {
        namespace: namespace.to_string(),
        index: index.to_string(),
    }
}

impl CollectionState {
    /// Checks `candidate` against every unique index, ignoring the document at `skip`.
    fn check_unique(&self, namespace: &str, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        let id = candidate.get("_id").map(Comparable::from);
        for (position, existing) in self.documents.iter().enumerate() {
            if Some(position) == skip {
                continue;
            }
            if id.is_some() && existing.get("_id").map(Comparable::from) == id {
                return Err(duplicate_key(namespace, PRIMARY_KEY_INDEX));
            }
        }

        for (name, definition) in self.indexes.iter().filter(|(_, d)| d.unique) {
            let Some(key) = index_key(candidate, definition) else {
                continue;
            };
            let key = Comparable::from(&key);

            let collides = self
                .documents
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .filter_map(|(_, existing)| index_key(existing, definition))
                .any(|existing| Comparable::from(&existing) == key);

            if collides {
                return Err(duplicate_key(namespace, name));
            }
        }

        Ok(())
    }

    fn matching(&self, filter: &Document) -> DocumentStoreResult<Vec<&Document>> {
        let mut found = Vec::new();
        for document in &self.documents {
            if matches(document, filter)? {
                found.push(document);
            }
        }
        Ok(found)
    }
}

/// Whether `collation` compares strings without regard to case (strength 1 or 2).
fn folds_case(collation: Option<&Document>) -> bool {
    match collation.and_then(|c| c.get("strength")) {
        Some(Bson::Int32(strength)) => *strength <= 2,
        Some(Bson::Int64(strength)) => *strength <= 2,
        _ => false,
    }
}

fn sort_documents(documents: &mut [Document], sort: &Document, fold_case: bool) {
    documents.sort_by(|a, b| {
        for (field, direction) in sort {
            let null = Bson::Null;
            let left = Comparable::from(lookup(a, field).unwrap_or(&null));
            let right = Comparable::from(lookup(b, field).unwrap_or(&null));

            let descending = matches!(direction, Bson::Int32(d) if *d < 0)
                || matches!(direction, Bson::Int64(d) if *d < 0)
                || matches!(direction, Bson::Double(d) if *d < 0.0);

            let (first, second) = if descending { (&right, &left) } else { (&left, &right) };
            let ordering = match (first, second) {
                (Comparable::String(x), Comparable::String(y)) if fold_case => {
                    x.to_lowercase().cmp(&y.to_lowercase())
                }
                _ => first.sort_cmp(second),
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn project(document: Document, projection: &Document) -> Document {
    let include = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .any(|(_, flag)| !matches!(flag, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false)));
    let hide_id = matches!(
        projection.get("_id"),
        Some(Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false))
    );

    document
        .into_iter()
        .filter(|(field, _)| {
            if field == "_id" {
                !hide_id
            } else if include {
                projection.contains_key(field)
            } else {
                !projection.contains_key(field)
            }
        })
        .collect()
}

#[async_trait]
impl CollectionHandle for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_indexes(&self) -> DocumentStoreResult<Vec<IndexInfo>> {
        let store = self.store.read().await;
        let mut indexes = vec![IndexInfo {
            name: PRIMARY_KEY_INDEX.to_string(),
            namespace: self.namespace.clone(),
        }];

        if let Some(state) = store.get(&self.name) {
            indexes.extend(state.indexes.keys().map(|name| IndexInfo {
                name: name.clone(),
                namespace: self.namespace.clone(),
            }));
        }

        Ok(indexes)
    }

    async fn create_index(&self, definition: IndexDefinition, name: &str) -> DocumentStoreResult<()> {
        if name == PRIMARY_KEY_INDEX {
            return Err(DocumentStoreError::Backend(format!(
                "cannot create reserved index {} in {}",
                name, self.namespace
            )));
        }

        let mut store = self.store.write().await;
        let state = store.entry(self.name.clone()).or_default();

        match state.indexes.get(name) {
            Some(existing) if *existing == definition => return Ok(()),
            Some(_) => {
                return Err(DocumentStoreError::Backend(format!(
                    "index {} already exists in {} with different options",
                    name, self.namespace
                )));
            }
            None => {}
        }

        if definition.unique {
            let mut seen: Vec<Bson> = Vec::new();
            for document in &state.documents {
                let Some(key) = index_key(document, &definition) else {
                    continue;
                };
                if seen.iter().any(|other| Comparable::from(other) == Comparable::from(&key)) {
                    return Err(duplicate_key(&self.namespace, name));
                }
                seen.push(key);
            }
        }

        state.indexes.insert(name.to_string(), definition);
        state.events.push(IndexEvent::Created(name.to_string()));
        debug!(namespace = %self.namespace, index = name, "created in-memory index");

        Ok(())
    }

    async fn drop_index(&self, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;

        let removed = store
            .get_mut(&self.name)
            .and_then(|state| {
                state.indexes.remove(name)?;
                state.events.push(IndexEvent::Dropped(name.to_string()));
                Some(())
            });

        match removed {
            Some(()) => {
                debug!(namespace = %self.namespace, index = name, "dropped in-memory index");
                Ok(())
            }
            None => Err(DocumentStoreError::Backend(format!(
                "index {} not found in {}",
                name, self.namespace
            ))),
        }
    }

    async fn count_documents(&self, filter: Document) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;
        match store.get(&self.name) {
            Some(state) => Ok(state.matching(&filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<DocumentCursor> {
        let mut documents = {
            let store = self.store.read().await;
            match store.get(&self.name) {
                Some(state) => state
                    .matching(&filter)?
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>(),
                None => Vec::new(),
            }
        };

        if let Some(sort) = &options.sort {
            sort_documents(&mut documents, sort, folds_case(options.collation.as_ref()));
        }

        let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let take = match options.limit {
            Some(limit) if limit != 0 => usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX),
            _ => usize::MAX,
        };
        let projection = options.projection;

        let rows = documents
            .into_iter()
            .skip(skip)
            .take(take)
            .map(move |document| match &projection {
                Some(projection) => Ok(project(document, projection)),
                None => Ok(document),
            })
            .collect::<Vec<_>>();

        Ok(stream::iter(rows).boxed())
    }

    async fn insert_documents(&self, documents: Vec<Document>) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(self.name.clone()).or_default();

        for mut document in documents {
            if !document.contains_key("_id") {
                let mut with_id = Document::new();
                with_id.insert("_id", ObjectId::new());
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                document = with_id;
            }

            state.check_unique(&self.namespace, &document, None)?;
            state.documents.push(document);
        }

        Ok(())
    }

    async fn replace_one(&self, filter: Document, mut replacement: Document) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(&self.name) else {
            return Ok(0);
        };

        let mut position = None;
        for (i, document) in state.documents.iter().enumerate() {
            if matches(document, &filter)? {
                position = Some(i);
                break;
            }
        }
        let Some(position) = position else {
            return Ok(0);
        };

        match (state.documents[position].get("_id"), replacement.get("_id")) {
            (Some(current), Some(requested)) if Comparable::from(current) != Comparable::from(requested) => {
                return Err(DocumentStoreError::Backend(format!(
                    "replacement would change the _id of a document in {}",
                    self.namespace
                )));
            }
            (Some(current), None) => {
                let mut with_id = Document::new();
                with_id.insert("_id", current.clone());
                for (key, value) in replacement {
                    with_id.insert(key, value);
                }
                replacement = with_id;
            }
            _ => {}
        }

        state.check_unique(&self.namespace, &replacement, Some(position))?;
        state.documents[position] = replacement;

        Ok(1)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docshift_memory::InMemoryStore;
/// use docshift::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().database("blog").build().await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    database: Option<String>,
}

impl InMemoryStoreBuilder {
    /// Sets the database name reported in index namespaces.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(match self.database {
            Some(database) => InMemoryStore::with_database(database),
            None => InMemoryStore::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;

    async fn rows(collection: &CollectionRef, filter: Document, options: FindOptions) -> Vec<Document> {
        collection
            .find(filter, options)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_counts() {
        let store = InMemoryStore::new();
        let users = store.collection("users");

        users
            .insert_documents(vec![doc! { "name": "Al", "age": 17 }, doc! { "name": "Bob", "age": 30 }])
            .await
            .unwrap();

        assert_eq!(users.count_documents(doc! {}).await.unwrap(), 2);
        assert_eq!(users.count_documents(doc! { "age": { "$gte": 18 } }).await.unwrap(), 1);
        assert!(store.snapshot("users").await.iter().all(|d| d.get_object_id("_id").is_ok()));
        assert_eq!(store.list_collections().await.unwrap(), vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn find_sorts_pages_and_projects() {
        let store = InMemoryStore::new();
        let users = store.collection("users");
        users
            .insert_documents(vec![
                doc! { "_id": 1, "name": "Cy", "age": 20 },
                doc! { "_id": 2, "name": "Al", "age": 30 },
                doc! { "_id": 3, "name": "Bo", "age": 20 },
            ])
            .await
            .unwrap();

        let sorted = rows(
            &users,
            doc! {},
            FindOptions {
                sort: Some(doc! { "age": -1, "name": 1 }),
                ..Default::default()
            },
        )
        .await;
        let names = sorted.iter().map(|d| d.get_str("name").unwrap()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Al", "Bo", "Cy"]);

        let page = rows(
            &users,
            doc! {},
            FindOptions {
                sort: Some(doc! { "name": 1 }),
                skip: Some(1),
                limit: Some(1),
                projection: Some(doc! { "name": 1 }),
                collation: None,
            },
        )
        .await;
        assert_eq!(page, vec![doc! { "_id": 3, "name": "Bo" }]);

        let hidden = rows(
            &users,
            doc! { "_id": 2 },
            FindOptions {
                projection: Some(doc! { "age": 0, "_id": 0 }),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(hidden, vec![doc! { "name": "Al" }]);
    }

    #[tokio::test]
    async fn collation_strength_folds_case_when_sorting() {
        let store = InMemoryStore::new();
        let users = store.collection("users");
        users
            .insert_documents(vec![doc! { "name": "bea" }, doc! { "name": "Cy" }, doc! { "name": "Al" }])
            .await
            .unwrap();

        let names = |rows: Vec<Document>| {
            rows.iter()
                .map(|d| d.get_str("name").unwrap().to_string())
                .collect::<Vec<_>>()
        };
        let sort = Some(doc! { "name": 1 });

        let binary = rows(&users, doc! {}, FindOptions { sort: sort.clone(), ..Default::default() }).await;
        assert_eq!(names(binary), vec!["Al", "Cy", "bea"]);

        let folded = rows(
            &users,
            doc! {},
            FindOptions {
                sort,
                collation: Some(doc! { "locale": "en", "strength": 2 }),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(names(folded), vec!["Al", "bea", "Cy"]);
    }

    #[tokio::test]
    async fn replace_one_keeps_id() {
        let store = InMemoryStore::new();
        let users = store.collection("users");
        users.insert_documents(vec![doc! { "_id": 7, "name": "Al" }]).await.unwrap();

        let matched = users.replace_one(doc! { "_id": 7 }, doc! { "name": "Alan" }).await.unwrap();
        assert_eq!(matched, 1);
        assert_eq!(store.snapshot("users").await, vec![doc! { "_id": 7, "name": "Alan" }]);

        let matched = users.replace_one(doc! { "_id": 8 }, doc! { "name": "Nobody" }).await.unwrap();
        assert_eq!(matched, 0);
    }

    #[tokio::test]
    async fn indexes_are_listed_and_logged() {
        let store = InMemoryStore::builder().database("blog").build().await.unwrap();
        let articles = store.collection("articles");

        articles
            .create_index(IndexDefinition::new(doc! { "slug": 1 }).unique(), "slug-1")
            .await
            .unwrap();

        let listed = articles.list_indexes().await.unwrap();
        assert_eq!(
            listed.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            vec!["_id_", "slug-1"]
        );
        assert!(listed.iter().all(|i| i.namespace == "blog.articles"));

        articles.drop_index("slug-1").await.unwrap();
        assert!(articles.drop_index("slug-1").await.is_err());
        assert_eq!(
            store.index_events("articles").await,
            vec![IndexEvent::Created("slug-1".into()), IndexEvent::Dropped("slug-1".into())]
        );
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let store = InMemoryStore::new();
        let articles = store.collection("articles");
        articles
            .create_index(IndexDefinition::new(doc! { "slug": 1 }).unique(), "slug-1")
            .await
            .unwrap();

        articles.insert_documents(vec![doc! { "_id": 1, "slug": "a" }]).await.unwrap();
        let err = articles.insert_documents(vec![doc! { "slug": "a" }]).await.unwrap_err();

        assert!(
            matches!(err, DocumentStoreError::DuplicateKey { ref namespace, ref index }
                if namespace == "memory.articles" && index == "slug-1"),
            "{err}"
        );
        assert_eq!(articles.count_documents(doc! {}).await.unwrap(), 1);

        let err = articles.insert_documents(vec![doc! { "_id": 1, "slug": "b" }]).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::DuplicateKey { ref index, .. } if index == "_id_"));
        assert!(err.is_duplicate_key());
    }
}
