//! Versioned index declarations and their reconciliation against a live collection.
//!
//! Every managed index is stored under the name `<name>-<version>`. On startup the
//! reconciler compares the declared set with the live set by bare name: a missing index
//! is created, an index whose stored version differs is dropped and recreated, and an
//! index with the same version is left untouched. The primary-key index `_id_` is never
//! managed.
//!
//! # Example
//!
//! ```ignore
//! use docshift::index::{IndexDeclaration, reconcile};
//! use docshift::backend::IndexDefinition;
//! use bson::doc;
//!
//! let declarations = vec![
//!     IndexDeclaration::new("title", 2, IndexDefinition::new(doc! { "title": 1 }).unique())?,
//! ];
//! reconcile(articles.as_ref(), &declarations).await?;
//! ```

use std::collections::HashMap;
use tracing::{debug, info};

use crate::{
    backend::{CollectionHandle, IndexDefinition},
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Joins an index name and its version in the stored index name.
pub const INDEX_VERSION_DELIMITER: &str = "-";

/// Name of the primary-key index, which is never reconciled.
pub const PRIMARY_KEY_INDEX: &str = "_id_";

/// A named, versioned secondary index to be maintained on a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDeclaration {
    /// Bare index name, without version.
    pub name: String,
    /// Declared version; bump it to have the index rebuilt.
    pub version: i64,
    /// Keys and options of the index.
    pub definition: IndexDefinition,
}

impl IndexDeclaration {
    /// Declares an index stored as `<name>-<version>`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Config`] for an empty name, a name containing
    /// [`INDEX_VERSION_DELIMITER`], or a version below `1`. Such names could not be parsed
    /// back on the next reconciliation.
    pub fn new(name: impl Into<String>, version: i64, definition: IndexDefinition) -> DocumentStoreResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(DocumentStoreError::Config("index name must not be empty".to_string()));
        }
        if name.contains(INDEX_VERSION_DELIMITER) {
            return Err(DocumentStoreError::Config(format!(
                "index name [{}] must not contain [{}]",
                name, INDEX_VERSION_DELIMITER
            )));
        }
        if version < 1 {
            return Err(DocumentStoreError::Config(format!(
                "index [{}] must have a version >= 1, got {}",
                name, version
            )));
        }

        Ok(Self { name, version, definition })
    }

    /// The name this index is stored under, e.g. `title-2`.
    pub fn wire_name(&self) -> String {
        format!("{}{}{}", self.name, INDEX_VERSION_DELIMITER, self.version)
    }
}

/// A live index, parsed from its stored name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingIndexRecord {
    pub namespace: String,
    /// The full stored name, used to drop the index.
    pub name: String,
    pub version: i64,
}

impl ExistingIndexRecord {
    /// Parses a stored index name into `(bare name, record)`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Config`] unless the name has exactly two
    /// delimiter-separated parts with an integer version.
    pub fn parse(namespace: &str, stored: &str) -> DocumentStoreResult<(String, Self)> {
        let parts = stored
            .split(INDEX_VERSION_DELIMITER)
            .collect::<Vec<_>>();

        let [bare, version] = parts.as_slice() else {
            return Err(DocumentStoreError::Config(format!(
                "index name must be [name{}version], found [{}] in {}",
                INDEX_VERSION_DELIMITER, stored, namespace
            )));
        };

        let version = version.parse::<i64>().map_err(|_| {
            DocumentStoreError::Config(format!(
                "index [{}] in {} has a non-integer version [{}]",
                stored, namespace, version
            ))
        })?;

        Ok((
            bare.to_string(),
            Self {
                namespace: namespace.to_string(),
                name: stored.to_string(),
                version,
            },
        ))
    }
}

/// Lists the managed indexes of `collection`, keyed by bare name.
pub async fn existing_indexes(
    collection: &dyn CollectionHandle,
) -> DocumentStoreResult<HashMap<String, ExistingIndexRecord>> {
    let listed = collection
        .list_indexes()
        .await
        .map_err(|e| DocumentStoreError::driver(format!("list indexes of {}", collection.name()), e))?;

    listed
        .into_iter()
        .filter(|index| index.name != PRIMARY_KEY_INDEX)
        .map(|index| {
            let parsed = ExistingIndexRecord::parse(&index.namespace, &index.name)?;
            debug!(
                collection = collection.name(),
                index = %index.name,
                version = parsed.1.version,
                "found existing index"
            );
            Ok(parsed)
        })
        .collect()
}

/// Makes the live index set of `collection` match `declarations`.
///
/// Aborts on the first failure; indexes already created or dropped stay that way.
/// Re-running with unchanged declarations performs no create or drop calls.
pub async fn reconcile(
    collection: &dyn CollectionHandle,
    declarations: &[IndexDeclaration],
) -> DocumentStoreResult<()> {
    let existing = existing_indexes(collection).await?;

    for declaration in declarations {
        let wire_name = declaration.wire_name();

        match existing.get(&declaration.name) {
            Some(record) if record.version == declaration.version => {
                debug!(collection = collection.name(), index = %wire_name, "index up to date");
            }
            Some(record) => {
                info!(
                    collection = collection.name(),
                    index = %declaration.name,
                    from = record.version,
                    to = declaration.version,
                    "rebuilding index with new version"
                );

                collection
                    .drop_index(&record.name)
                    .await
                    .map_err(|e| {
                        DocumentStoreError::driver(
                            format!(
                                "update index [{}.v{}], drop old version [{}]",
                                declaration.name, declaration.version, record.version
                            ),
                            e,
                        )
                    })?;

                create(collection, declaration, &wire_name).await?;
            }
            None => {
                info!(
                    collection = collection.name(),
                    index = %wire_name,
                    "creating missing index"
                );

                create(collection, declaration, &wire_name).await?;
            }
        }
    }

    Ok(())
}

async fn create(
    collection: &dyn CollectionHandle,
    declaration: &IndexDeclaration,
    wire_name: &str,
) -> DocumentStoreResult<()> {
    collection
        .create_index(declaration.definition.clone(), wire_name)
        .await
        .map_err(|e| {
            DocumentStoreError::driver(
                format!("create index [{}.v{}]", declaration.name, declaration.version),
                e,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_name_joins_name_and_version() {
        let declaration = IndexDeclaration::new("title", 3, IndexDefinition::default()).unwrap();

        assert_eq!(declaration.wire_name(), "title-3");
    }

    #[test]
    fn declarations_must_round_trip_through_parse() {
        for (name, version) in [("", 1), ("created-at", 1), ("title", 0), ("t", -1)] {
            let err = IndexDeclaration::new(name, version, IndexDefinition::default()).unwrap_err();
            assert!(matches!(err, DocumentStoreError::Config(_)), "{name:?} v{version}: {err}");
        }

        let declaration = IndexDeclaration::new("created_at", 1, IndexDefinition::default()).unwrap();
        let (bare, record) = ExistingIndexRecord::parse("blog.articles", &declaration.wire_name()).unwrap();
        assert_eq!((bare.as_str(), record.version), ("created_at", 1));
    }

    #[test]
    fn parse_splits_stored_name() {
        let (bare, record) = ExistingIndexRecord::parse("blog.articles", "title-3").unwrap();

        assert_eq!(bare, "title");
        assert_eq!(record.name, "title-3");
        assert_eq!(record.version, 3);
        assert_eq!(record.namespace, "blog.articles");
    }

    #[test]
    fn parse_rejects_unversioned_and_over_split_names() {
        for stored in ["title_1", "created-at-2", "title-"] {
            let err = ExistingIndexRecord::parse("blog.articles", stored).unwrap_err();
            assert!(matches!(err, DocumentStoreError::Config(_)), "{stored}: {err}");
        }
    }

    #[test]
    fn parse_rejects_non_integer_version() {
        let err = ExistingIndexRecord::parse("blog.articles", "title-v2").unwrap_err();

        assert!(matches!(err, DocumentStoreError::Config(_)));
    }
}
