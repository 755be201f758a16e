//! Version guard and lazy migration against the in-memory store.

use async_trait::async_trait;
use docshift::{
    memory::InMemoryStore,
    prelude::*,
    version::lower_versions_filter,
};
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Meta {
    version: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Article {
    #[serde(rename = "_id")]
    id: i32,
    title: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    meta: Meta,
}

/// Derives the slug introduced in version 2.
#[derive(Default)]
struct AddSlug {
    calls: Arc<AtomicUsize>,
    fail_on: Option<i32>,
}

#[async_trait]
impl Upgrader<Article> for AddSlug {
    async fn upgrade(&self, collection: &dyn CollectionHandle, mut article: Article) -> DocumentStoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(article.id) {
            return Err(DocumentStoreError::Validation(format!("article {} has no title", article.id)));
        }

        article.slug = article.title.to_lowercase().replace(' ', "-");
        article.meta.version = 2;
        collection
            .replace_one(doc! { "_id": article.id }, bson::serialize_to_document(&article)?)
            .await?;

        Ok(())
    }
}

/// Counts cursors opened through it.
#[derive(Debug)]
struct CountingFinds {
    inner: CollectionRef,
    finds: AtomicUsize,
}

#[async_trait]
impl CollectionHandle for CountingFinds {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_indexes(&self) -> DocumentStoreResult<Vec<docshift::backend::IndexInfo>> {
        self.inner.list_indexes().await
    }

    async fn create_index(&self, definition: IndexDefinition, name: &str) -> DocumentStoreResult<()> {
        self.inner.create_index(definition, name).await
    }

    async fn drop_index(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.drop_index(name).await
    }

    async fn count_documents(&self, filter: bson::Document) -> DocumentStoreResult<u64> {
        self.inner.count_documents(filter).await
    }

    async fn find(&self, filter: bson::Document, options: FindOptions) -> DocumentStoreResult<DocumentCursor> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(filter, options).await
    }

    async fn insert_documents(&self, documents: Vec<bson::Document>) -> DocumentStoreResult<()> {
        self.inner.insert_documents(documents).await
    }

    async fn replace_one(&self, filter: bson::Document, replacement: bson::Document) -> DocumentStoreResult<u64> {
        self.inner.replace_one(filter, replacement).await
    }
}

async fn seeded(documents: Vec<bson::Document>) -> (InMemoryStore, CollectionRef) {
    let store = InMemoryStore::new();
    let articles = store.collection("articles");
    articles.insert_documents(documents).await.unwrap();
    (store, articles)
}

#[tokio::test]
async fn migrates_unmarked_and_older_documents() {
    let (store, articles) = seeded(vec![
        doc! { "_id": 1, "title": "Hello World" },
        doc! { "_id": 2, "title": "Second Post", "meta": { "version": 1 } },
        doc! { "_id": 3, "title": "Current", "slug": "kept", "meta": { "version": 2 } },
    ])
    .await;

    let upgrader = AddSlug::default();
    let calls = upgrader.calls.clone();
    let mut spec = VersionedCollection::new(2, SerdePrototype::<Article>::new(), upgrader).unwrap();

    let migrated = spec.activate(articles.clone()).await.unwrap();

    assert_eq!(migrated, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(spec.state(), ActivationState::Migrated);
    assert_eq!(articles.count_documents(lower_versions_filter(2)).await.unwrap(), 0);

    let documents = store.snapshot("articles").await;
    assert_eq!(documents[0].get_str("slug").unwrap(), "hello-world");
    assert_eq!(documents[1].get_str("slug").unwrap(), "second-post");
    assert_eq!(documents[2].get_str("slug").unwrap(), "kept");
}

#[tokio::test]
async fn newer_documents_fail_before_any_cursor_opens() {
    let (store, articles) = seeded(vec![
        doc! { "_id": 1, "title": "Old" },
        doc! { "_id": 2, "title": "From the future", "meta": { "version": 3 } },
    ])
    .await;
    let counting = Arc::new(CountingFinds { inner: articles, finds: AtomicUsize::new(0) });

    let upgrader = AddSlug::default();
    let calls = upgrader.calls.clone();
    let mut spec = VersionedCollection::new(2, SerdePrototype::<Article>::new(), upgrader).unwrap();

    let err = spec.activate(counting.clone()).await.unwrap_err();

    assert!(
        matches!(err, DocumentStoreError::IncompatibleVersion { ref collection, target: 2 } if collection == "articles"),
        "{err}"
    );
    assert_eq!(spec.state(), ActivationState::Fatal);
    assert_eq!(counting.finds.load(Ordering::SeqCst), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.snapshot("articles").await[0], doc! { "_id": 1, "title": "Old" });
}

#[tokio::test]
async fn failed_upgrade_keeps_partial_progress_and_rerun_finishes() {
    let (store, articles) = seeded(vec![
        doc! { "_id": 1, "title": "One" },
        doc! { "_id": 2, "title": "Two" },
        doc! { "_id": 3, "title": "Three" },
    ])
    .await;

    let failing = AddSlug { fail_on: Some(2), ..Default::default() };
    let mut spec = VersionedCollection::new(2, SerdePrototype::<Article>::new(), failing).unwrap();

    let err = spec.activate(articles.clone()).await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::Migration { ref collection, .. } if collection == "articles"));
    assert!(matches!(err.root(), DocumentStoreError::Validation(_)));
    assert_eq!(spec.state(), ActivationState::Migrating);

    let documents = store.snapshot("articles").await;
    assert_eq!(documents[0].get_str("slug").unwrap(), "one");
    assert!(documents[1].get("slug").is_none());
    assert!(documents[2].get("slug").is_none());

    let mut retry = VersionedCollection::new(2, SerdePrototype::<Article>::new(), AddSlug::default()).unwrap();
    assert_eq!(retry.activate(articles.clone()).await.unwrap(), 2);
    assert_eq!(articles.count_documents(lower_versions_filter(2)).await.unwrap(), 0);
}

#[tokio::test]
async fn undecodable_document_aborts_migration() {
    let (_store, articles) = seeded(vec![doc! { "_id": 1, "title": 42 }]).await;

    let mut spec = VersionedCollection::new(2, SerdePrototype::<Article>::new(), AddSlug::default()).unwrap();
    let err = spec.activate(articles).await.unwrap_err();

    assert!(matches!(err.root(), DocumentStoreError::Serialization(_)), "{err}");
}

#[tokio::test]
async fn empty_collection_activates_immediately() {
    let store = InMemoryStore::new();

    let mut spec = VersionedCollection::new(1, RawPrototype, NoopUpgrade).unwrap();

    assert_eq!(spec.activate(store.collection("empty")).await.unwrap(), 0);
    assert_eq!(spec.state(), ActivationState::Migrated);
    assert!(spec.collection().is_some());
}

struct NoopUpgrade;

#[async_trait]
impl Upgrader<bson::Document> for NoopUpgrade {
    async fn upgrade(&self, _: &dyn CollectionHandle, _: bson::Document) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn migrate_without_collection_is_config_error() {
    let spec = VersionedCollection::new(1, RawPrototype, NoopUpgrade).unwrap();

    let err = spec.migrate_lower_versions().await.unwrap_err();

    assert!(matches!(err, DocumentStoreError::Config(_)));
}
