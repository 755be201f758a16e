//! Built-in string converters for [`FieldSpec::convert`](crate::query::FieldSpec::convert).
//!
//! Each converter parses the raw external string into a typed BSON value and reports
//! failures as a boxed error, which the compiler wraps into a conversion error naming the
//! offending key.

use bson::{Bson, DateTime, oid::ObjectId};
use chrono::{NaiveDate, NaiveDateTime, Utc};

use crate::error::BoxError;

/// Layouts accepted by [`datetime`], tried in order after RFC 3339.
pub const DATETIME_LAYOUTS: [&str; 1] = ["%Y-%m-%d %H:%M:%S"];
pub const DATE_LAYOUT: &str = "%Y-%m-%d";

pub fn int(raw: &str) -> Result<Bson, BoxError> {
    Ok(Bson::Int64(raw.trim().parse::<i64>()?))
}

pub fn float(raw: &str) -> Result<Bson, BoxError> {
    Ok(Bson::Double(raw.trim().parse::<f64>()?))
}

/// Accepts `true`/`false`, `1`/`0` and `yes`/`no`, case-insensitively.
pub fn boolean(raw: &str) -> Result<Bson, BoxError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Bson::Boolean(true)),
        "false" | "0" | "no" => Ok(Bson::Boolean(false)),
        other => Err(format!("invalid boolean [{}]", other).into()),
    }
}

pub fn object_id(raw: &str) -> Result<Bson, BoxError> {
    Ok(Bson::ObjectId(ObjectId::parse_str(raw.trim())?))
}

/// Parses RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (midnight) as UTC.
pub fn datetime(raw: &str) -> Result<Bson, BoxError> {
    let raw = raw.trim();

    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(Bson::DateTime(DateTime::from_chrono(parsed.with_timezone(&Utc))));
    }

    for layout in DATETIME_LAYOUTS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, layout) {
            return Ok(Bson::DateTime(DateTime::from_chrono(parsed.and_utc())));
        }
    }

    let date = NaiveDate::parse_from_str(raw, DATE_LAYOUT)
        .map_err(|e| format!("invalid date [{}]: {}", raw, e))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid date [{}]", raw))?;

    Ok(Bson::DateTime(DateTime::from_chrono(midnight.and_utc())))
}

/// Splits a comma-separated list into an array of trimmed strings. An empty string is an
/// empty array, which suits `$in`/`$nin`.
pub fn string_list(raw: &str) -> Result<Bson, BoxError> {
    if raw.trim().is_empty() {
        return Ok(Bson::Array(Vec::new()));
    }

    Ok(Bson::Array(
        raw.split(',')
            .map(|item| Bson::String(item.trim().to_string()))
            .collect(),
    ))
}
