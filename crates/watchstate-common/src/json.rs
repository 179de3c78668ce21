//! Canonical JSON helpers.
//!
//! `State`'s array-valued columns (`guids`, `parent`, `metadata`, `extra`)
//! are persisted as JSON text with sorted keys so that two semantically
//! equal maps always serialize to the same bytes (useful for equality
//! checks and for building `JSON_EXTRACT` predicates deterministically).
//! Callers are expected to hold these fields in a `BTreeMap`, which already
//! iterates in sorted key order; `serde_json` preserves that iteration
//! order when serializing a map, so no extra sorting step is needed here.

use crate::{Error, Result};
use serde::Serialize;

/// Serialize a value (expected to be backed by `BTreeMap`s) to JSON text
/// with deterministic, sorted-key output.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::internal(format!("json encode: {e}")))
}

/// Deserialize JSON text produced by [`to_canonical_json`].
pub fn from_canonical_json<T: for<'de> serde::Deserialize<'de>>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::internal(format!("json decode: {e}")))
}

/// Validate that a string is safe to splice into a `JSON_EXTRACT(col,'$.key')`
/// path expression. GUID namespaces and backend names are the only strings
/// ever interpolated this way; this rejects anything that isn't a plain
/// identifier so a maliciously-shaped namespace can't break out of the
/// JSON path literal.
pub fn validate_json_path_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "unsafe json path key: {key:?}"
        )))
    }
}
