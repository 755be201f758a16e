//! Filter document evaluation for in-memory collections.
//!
//! Supports dotted field paths, implicit equality, the logical operators `$and`, `$or`
//! and `$nor`, and the field operators `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`,
//! `$nin`, `$exists`, `$not` and `$regex` (with the `i`, `m`, `s` and `x` flags of a sibling
//! `$options`). Other operators are rejected with a backend error.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;
use std::{cmp::Ordering, collections::HashMap};

use docshift_core::error::{DocumentStoreError, DocumentStoreResult};

/// Comparable representation of BSON values. Numbers are normalized to `f64`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            // Other types are not comparable
            _ => Comparable::Null,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: by type rank first, then by value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path such as `meta.version`.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }

    Some(current)
}

fn unsupported(operator: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!(
        "operator {} is not supported by the in-memory store",
        operator
    ))
}

fn is_operator_map(condition: &Bson) -> bool {
    matches!(condition, Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn values_equal(value: Option<&Bson>, expected: &Bson) -> bool {
    let Some(value) = value else {
        return matches!(expected, Bson::Null);
    };

    let expected = Comparable::from(expected);
    match Comparable::from(value) {
        Comparable::Array(items) if !matches!(expected, Comparable::Array(_)) => {
            items.iter().any(|item| item == &expected)
        }
        actual => actual == expected,
    }
}

fn compare(value: Option<&Bson>, bound: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };

    let bound = Comparable::from(bound);
    match Comparable::from(value) {
        Comparable::Array(items) => items
            .iter()
            .any(|item| item.partial_cmp(&bound).is_some_and(accept)),
        actual => actual.partial_cmp(&bound).is_some_and(accept),
    }
}

fn array_operand<'a>(operator: &str, operand: &'a Bson) -> DocumentStoreResult<&'a Vec<Bson>> {
    match operand {
        Bson::Array(values) => Ok(values),
        _ => Err(DocumentStoreError::Backend(format!("{} needs an array", operator))),
    }
}

fn regex_matches(value: Option<&Bson>, pattern: &Bson, options: Option<&Bson>) -> DocumentStoreResult<bool> {
    let Bson::String(pattern) = pattern else {
        return Err(DocumentStoreError::Backend("$regex needs a string pattern".to_string()));
    };
    let flags = match options {
        None => "",
        Some(Bson::String(flags)) => flags.as_str(),
        Some(_) => return Err(DocumentStoreError::Backend("$options must be a string".to_string())),
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| DocumentStoreError::Backend(format!("invalid $regex [{}]: {}", pattern, e)))?;

    Ok(match value {
        Some(Bson::String(text)) => regex.is_match(text),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(text) if regex.is_match(text))),
        _ => false,
    })
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> DocumentStoreResult<bool> {
    let operators = match condition {
        Bson::Document(operators) if is_operator_map(condition) => operators,
        _ => return Ok(values_equal(value, condition)),
    };

    for (operator, operand) in operators {
        let holds = match operator.as_str() {
            "$eq" => values_equal(value, operand),
            "$ne" => !values_equal(value, operand),
            "$gt" => compare(value, operand, |o| o == Ordering::Greater),
            "$gte" => compare(value, operand, |o| o != Ordering::Less),
            "$lt" => compare(value, operand, |o| o == Ordering::Less),
            "$lte" => compare(value, operand, |o| o != Ordering::Greater),
            "$in" => array_operand(operator, operand)?
                .iter()
                .any(|candidate| values_equal(value, candidate)),
            "$nin" => !array_operand(operator, operand)?
                .iter()
                .any(|candidate| values_equal(value, candidate)),
            "$exists" => {
                let should_exist = match operand {
                    Bson::Boolean(b) => *b,
                    Bson::Int32(n) => *n != 0,
                    Bson::Int64(n) => *n != 0,
                    _ => true,
                };
                value.is_some() == should_exist
            }
            "$not" => !field_matches(value, operand)?,
            "$regex" => regex_matches(value, operand, operators.get("$options"))?,
            "$options" if operators.contains_key("$regex") => true,
            other => return Err(unsupported(other)),
        };

        if !holds {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(operator: &str, operand: &'a Bson) -> DocumentStoreResult<Vec<&'a Document>> {
    array_operand(operator, operand)?
        .iter()
        .map(|clause| match clause {
            Bson::Document(clause) => Ok(clause),
            _ => Err(DocumentStoreError::Backend(format!(
                "{} clauses must be documents",
                operator
            ))),
        })
        .collect()
}

/// Returns whether `document` matches `filter`. An empty filter matches everything.
pub(crate) fn matches(document: &Document, filter: &Document) -> DocumentStoreResult<bool> {
    for (key, condition) in filter {
        let holds = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" { any } else { !any }
            }
            operator if operator.starts_with('$') => return Err(unsupported(operator)),
            path => field_matches(lookup(document, path), condition)?,
        };

        if !holds {
            return Ok(false);
        }
    }

    Ok(true)
}
