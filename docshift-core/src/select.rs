//! Projection and sort documents built from field name lists.

use bson::{Bson, Document};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Rejects a projection that both includes and excludes fields.
pub fn validate_select<I, E>(include: &[I], exclude: &[E]) -> DocumentStoreResult<()>
where
    I: AsRef<str>,
    E: AsRef<str>,
{
    if !include.is_empty() && !exclude.is_empty() {
        return Err(DocumentStoreError::Config(
            "a projection cannot both include and exclude fields".to_string(),
        ));
    }
    Ok(())
}

/// Builds a projection document: included fields map to `1`, excluded fields to `0`.
///
/// Returns `None` when both lists are empty, meaning the whole document is returned.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Config`] when both lists are non-empty.
pub fn make_select<I, E>(include: &[I], exclude: &[E]) -> DocumentStoreResult<Option<Document>>
where
    I: AsRef<str>,
    E: AsRef<str>,
{
    validate_select(include, exclude)?;

    let (fields, flag) = if !include.is_empty() {
        (include.iter().map(|f| f.as_ref().to_string()).collect::<Vec<_>>(), 1)
    } else if !exclude.is_empty() {
        (exclude.iter().map(|f| f.as_ref().to_string()).collect::<Vec<_>>(), 0)
    } else {
        return Ok(None);
    };

    Ok(Some(fields.into_iter().map(|field| (field, Bson::Int32(flag))).collect()))
}

/// Converts `["-created", "name"]` into `{ created: -1, name: 1 }`.
///
/// A leading `-` sorts that key in descending order; `+` or no prefix sorts ascending.
/// Empty keys are skipped. Returns `None` when no key remains.
pub fn convert_sort<S: AsRef<str>>(keys: &[S]) -> Option<Document> {
    let mut sort = Document::new();

    for key in keys {
        let key = key.as_ref().trim();
        let (field, direction) = match key.strip_prefix('-') {
            Some(field) => (field, -1),
            None => (key.strip_prefix('+').unwrap_or(key), 1),
        };
        if field.is_empty() {
            continue;
        }
        sort.insert(field, direction);
    }

    if sort.is_empty() { None } else { Some(sort) }
}
