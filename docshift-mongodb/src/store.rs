use async_trait::async_trait;
use bson::{Document, de::deserialize_from_document};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, Collation, FindOptions as MongoFindOptions, IndexOptions},
};
use std::sync::Arc;
use tracing::debug;

use docshift_core::{
    backend::{
        CollectionHandle, CollectionRef, DocumentCursor, FindOptions, IndexDefinition, IndexInfo,
        StoreBackend, StoreBackendBuilder,
    },
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Server error code for a missing namespace, returned when listing the indexes of a
/// collection that does not exist yet.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Server error code for a unique index collision.
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    fn collection(&self, name: &str) -> CollectionRef {
        Arc::new(MongoDbCollection {
            name: name.to_string(),
            namespace: format!("{}.{}", self.database, name),
            inner: self.client.database(&self.database).collection(name),
        })
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| DocumentStoreError::driver(format!("list collections of {}", self.database), e))
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.client
            .database(&self.database)
            .collection::<Document>(name)
            .drop()
            .await
            .map_err(|e| DocumentStoreError::driver(format!("drop collection {}.{}", self.database, name), e))
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// One MongoDB collection of raw documents.
#[derive(Debug)]
pub struct MongoDbCollection {
    name: String,
    namespace: String,
    inner: MongoCollection<Document>,
}

fn is_namespace_not_found(error: &MongoError) -> bool {
    matches!(error.kind.as_ref(), ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND)
}

fn is_duplicate_key(error: &MongoError) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .iter()
            .flatten()
            .any(|write| write.code == DUPLICATE_KEY),
        _ => false,
    }
}

/// Extracts the index name from a server message such as
/// `E11000 duplicate key error collection: blog.articles index: slug-1 dup key: { ... }`.
fn duplicate_index_name(message: &str) -> Option<&str> {
    message.split_once(" index: ")?.1.split_whitespace().next()
}

/// Translates a driver-independent index definition into the driver's index model.
pub fn index_model(definition: IndexDefinition, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(definition.keys)
        .options(
            IndexOptions::builder()
                .name(name.to_string())
                .unique(definition.unique)
                .sparse(definition.sparse)
                .expire_after(definition.expire_after)
                .build(),
        )
        .build()
}

/// Translates find options into the driver's options.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Serialization`] when the collation document does not
/// describe a valid collation.
pub fn find_options(options: FindOptions) -> DocumentStoreResult<MongoFindOptions> {
    let mut translated = MongoFindOptions::default();
    translated.sort = options.sort;
    translated.skip = options.skip;
    translated.limit = options.limit;
    translated.projection = options.projection;
    translated.collation = options
        .collation
        .map(deserialize_from_document::<Collation>)
        .transpose()?;
    Ok(translated)
}

impl MongoDbCollection {
    /// Maps a failed write onto [`DocumentStoreError::DuplicateKey`] when a unique index
    /// rejected it, and onto a driver error with `context` otherwise.
    fn write_error(&self, context: String, error: MongoError) -> DocumentStoreError {
        if !is_duplicate_key(&error) {
            return DocumentStoreError::driver(context, error);
        }

        let message = error.to_string();
        DocumentStoreError::DuplicateKey {
            namespace: self.namespace.clone(),
            index: duplicate_index_name(&message).unwrap_or("unknown").to_string(),
        }
    }
}

#[async_trait]
impl CollectionHandle for MongoDbCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_indexes(&self) -> DocumentStoreResult<Vec<IndexInfo>> {
        let names = match self.inner.list_index_names().await {
            Ok(names) => names,
            Err(e) if is_namespace_not_found(&e) => Vec::new(),
            Err(e) => return Err(DocumentStoreError::driver(format!("list indexes of {}", self.namespace), e)),
        };

        Ok(names
            .into_iter()
            .map(|name| IndexInfo {
                name,
                namespace: self.namespace.clone(),
            })
            .collect())
    }

    async fn create_index(&self, definition: IndexDefinition, name: &str) -> DocumentStoreResult<()> {
        self.inner
            .create_index(index_model(definition, name))
            .await
            .map_err(|e| self.write_error(format!("create index {} on {}", name, self.namespace), e))?;

        debug!(namespace = %self.namespace, index = name, "created index");
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner
            .drop_index(name)
            .await
            .map_err(|e| DocumentStoreError::driver(format!("drop index {} on {}", name, self.namespace), e))?;

        debug!(namespace = %self.namespace, index = name, "dropped index");
        Ok(())
    }

    async fn count_documents(&self, filter: Document) -> DocumentStoreResult<u64> {
        self.inner
            .count_documents(filter)
            .await
            .map_err(|e| DocumentStoreError::driver(format!("count documents of {}", self.namespace), e))
    }

    async fn find(&self, filter: Document, options: FindOptions) -> DocumentStoreResult<DocumentCursor> {
        let namespace = self.namespace.clone();
        let cursor = self
            .inner
            .find(filter)
            .with_options(find_options(options)?)
            .await
            .map_err(|e| DocumentStoreError::driver(format!("find in {}", self.namespace), e))?;

        Ok(cursor
            .map_err(move |e| DocumentStoreError::driver(format!("read cursor of {}", namespace), e))
            .boxed())
    }

    async fn insert_documents(&self, documents: Vec<Document>) -> DocumentStoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        self.inner
            .insert_many(documents)
            .await
            .map_err(|e| self.write_error(format!("insert into {}", self.namespace), e))?;

        Ok(())
    }

    async fn replace_one(&self, filter: Document, replacement: Document) -> DocumentStoreResult<u64> {
        Ok(self
            .inner
            .replace_one(filter, replacement)
            .await
            .map_err(|e| self.write_error(format!("replace in {}", self.namespace), e))?
            .matched_count)
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::driver("parse connection string", e))?;

        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| DocumentStoreError::driver("create client", e))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::time::Duration;

    #[test]
    fn index_model_carries_name_and_options() {
        let definition = IndexDefinition::new(doc! { "created": 1 })
            .sparse()
            .expire_after(Duration::from_secs(3600));

        let model = index_model(definition, "created-2");
        let options = model.options.unwrap();

        assert_eq!(model.keys, doc! { "created": 1 });
        assert_eq!(options.name.as_deref(), Some("created-2"));
        assert_eq!(options.unique, Some(false));
        assert_eq!(options.sparse, Some(true));
        assert_eq!(options.expire_after, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn find_options_are_translated() {
        let translated = find_options(FindOptions {
            sort: Some(doc! { "created": -1 }),
            skip: Some(20),
            limit: Some(10),
            projection: Some(doc! { "body": 0 }),
            collation: Some(doc! { "locale": "en", "strength": 2 }),
        })
        .unwrap();

        assert_eq!(translated.sort, Some(doc! { "created": -1 }));
        assert_eq!(translated.skip, Some(20));
        assert_eq!(translated.limit, Some(10));
        assert_eq!(translated.projection, Some(doc! { "body": 0 }));
        assert_eq!(translated.collation.map(|c| c.locale), Some("en".to_string()));
    }

    #[test]
    fn malformed_collation_is_rejected() {
        let err = find_options(FindOptions {
            collation: Some(doc! { "locale": 5 }),
            ..Default::default()
        })
        .unwrap_err();

        assert!(matches!(err, DocumentStoreError::Serialization(_)));
    }

    #[test]
    fn duplicate_index_name_is_read_from_the_server_message() {
        let message = r#"E11000 duplicate key error collection: blog.articles index: slug-1 dup key: { slug: "a" }"#;

        assert_eq!(duplicate_index_name(message), Some("slug-1"));
        assert_eq!(duplicate_index_name("connection reset"), None);
    }
}
