//! Paged table queries: request and result types, and the find/decode helper behind them.
//!
//! A [`TableRequest`] is what a list endpoint receives from its client: a flat parameter
//! map, sort keys and a `start`/`limit` window. [`table_query`] compiles the parameter map
//! through a [`QuerySpecSet`] and runs [`base_query`], which decodes each row into a fresh
//! value through a [`DocumentPrototype`].
//!
//! # Example
//!
//! ```ignore
//! let request: TableRequest = serde_json::from_str(
//!     r#"{ "query": { "minAge": "18" }, "sort": ["-created"], "start": 0, "limit": 20 }"#,
//! )?;
//! let page = table_query(users.as_ref(), &request, &specs, true, &SerdePrototype::<User>::new()).await?;
//! println!("{} of {}", page.result.len(), page.count);
//! ```

use bson::Document;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    backend::{CollectionHandle, FindOptions},
    document::DocumentPrototype,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{QuerySpecSet, compile},
    select::{convert_sort, make_select},
};

/// Parameters of a paged table query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TableRequest {
    /// Raw filter parameters, compiled through a [`QuerySpecSet`].
    pub query: Document,
    /// Sort keys; a leading `-` sorts descending.
    pub sort: Vec<String>,
    /// Zero-based offset of the first row.
    pub start: i64,
    /// Maximum number of rows; `0` means no limit.
    pub limit: i64,
}

impl TableRequest {
    /// Rejects a negative `start` or `limit`.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.limit < 0 {
            return Err(DocumentStoreError::Validation(format!(
                "limit must be >= 0, got {}",
                self.limit
            )));
        }
        if self.start < 0 {
            return Err(DocumentStoreError::Validation(format!(
                "start must be >= 0, got {}",
                self.start
            )));
        }
        Ok(())
    }
}

/// One page of a table query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TableResult<T> {
    /// Number of documents matching the filter, across all pages.
    pub count: u64,
    /// The rows of this page.
    pub result: Vec<T>,
}

impl<T> TableResult<T> {
    pub fn new(count: u64, result: Vec<T>) -> Self {
        Self { count, result }
    }
}

impl<T> Default for TableResult<T> {
    fn default() -> Self {
        Self { count: 0, result: Vec::new() }
    }
}

/// Finds the documents matching `filter` in the `start`/`limit` window and decodes them.
///
/// Returns the decoded rows together with the number of documents matching `filter` across
/// all pages, not the number of rows returned. `collation` is passed to the store as-is.
///
/// # Errors
///
/// - [`DocumentStoreError::Validation`] for a negative window,
/// - [`DocumentStoreError::Config`] when both `include` and `exclude` are given,
/// - [`DocumentStoreError::Driver`] when the store fails,
/// - the prototype's error when a row cannot be decoded.
#[allow(clippy::too_many_arguments)]
pub async fn base_query<P, S>(
    collection: &dyn CollectionHandle,
    filter: Document,
    sort: &[S],
    start: i64,
    limit: i64,
    include: &[S],
    exclude: &[S],
    collation: Option<Document>,
    prototype: &P,
) -> DocumentStoreResult<(Vec<P::Target>, u64)>
where
    P: DocumentPrototype,
    S: AsRef<str>,
{
    let skip = u64::try_from(start)
        .map_err(|_| DocumentStoreError::Validation(format!("start must be >= 0, got {}", start)))?;
    if limit < 0 {
        return Err(DocumentStoreError::Validation(format!(
            "limit must be >= 0, got {}",
            limit
        )));
    }

    let options = FindOptions {
        sort: convert_sort(sort),
        skip: (skip > 0).then_some(skip),
        limit: (limit > 0).then_some(limit),
        projection: make_select(include, exclude)?,
        collation,
    };

    let count = collection
        .count_documents(filter.clone())
        .await
        .map_err(|e| DocumentStoreError::driver(format!("count documents of {}", collection.name()), e))?;

    let mut cursor = collection
        .find(filter, options)
        .await
        .map_err(|e| DocumentStoreError::driver(format!("find in {}", collection.name()), e))?;

    let mut rows = Vec::new();
    while let Some(raw) = cursor
        .try_next()
        .await
        .map_err(|e| DocumentStoreError::driver(format!("read from {}", collection.name()), e))?
    {
        let mut row = prototype.new_instance();
        prototype.decode_into(raw, &mut row)?;
        rows.push(row);
    }

    debug!(collection = collection.name(), rows = rows.len(), count, "table query finished");

    Ok((rows, count))
}

/// Validates and compiles `request`, then runs it with [`base_query`].
pub async fn table_query<P>(
    collection: &dyn CollectionHandle,
    request: &TableRequest,
    specs: &QuerySpecSet,
    strict: bool,
    prototype: &P,
) -> DocumentStoreResult<TableResult<P::Target>>
where
    P: DocumentPrototype,
{
    request.validate()?;

    let compiled = compile(request.query.clone(), specs, strict)?;
    let none: &[String] = &[];

    let (result, count) = base_query(
        collection,
        compiled.filter.unwrap_or_default(),
        request.sort.as_slice(),
        request.start,
        request.limit,
        none,
        none,
        None,
        prototype,
    )
    .await?;

    Ok(TableResult::new(count, result))
}
