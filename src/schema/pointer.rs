//! JSON Pointer helpers for schema locations (`#/properties/a`) and data paths
//!
//! Schema locations are always kept in canonical fragment form: `#` for the
//! document root, followed by `/`-separated, `~0`/`~1`-escaped segments.

use crate::error::FlattenError;
use serde_json::Value;
use std::fmt;

/// Upper bound of `$ref` hops followed before a chain is considered cyclic
const MAX_REF_HOPS: usize = 64;

pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

pub fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Appends already-unescaped segments to a canonical schema pointer
pub fn child(base: &str, segments: &[&str]) -> String {
    let mut pointer = base.to_string();
    for segment in segments {
        pointer.push('/');
        pointer.push_str(&escape(segment));
    }
    pointer
}

/// Normalizes a local `$ref` value to canonical form
pub fn normalize_ref(reference: &str) -> Result<String, FlattenError> {
    let Some(fragment) = reference.strip_prefix('#') else {
        return Err(FlattenError::schema(format!(
            "Not supported: non-local reference '{}'",
            reference
        )));
    };
    let fragment = fragment.trim_end_matches('/');
    if fragment.is_empty() {
        return Ok("#".to_string());
    }
    if !fragment.starts_with('/') {
        return Err(FlattenError::schema(format!(
            "Not supported: reference '{}' is not a JSON Pointer",
            reference
        )));
    }
    Ok(format!("#{}", fragment))
}

/// Looks up the schema node at a canonical pointer
pub fn lookup<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    let fragment = pointer.strip_prefix('#').unwrap_or(pointer);
    root.pointer(fragment)
}

/// Resolves a schema pointer, following `$ref` chains to the final definition
///
/// Returns the canonical pointer of the definition together with the definition.
pub fn resolve<'a>(root: &'a Value, pointer: &str) -> Result<(String, &'a Value), FlattenError> {
    let mut pointer = pointer.to_string();
    for _ in 0..MAX_REF_HOPS {
        let definition = lookup(root, &pointer).ok_or_else(|| {
            FlattenError::schema(format!("Failed to resolve reference '{}'", pointer))
        })?;
        match definition.get("$ref").and_then(Value::as_str) {
            Some(reference) => pointer = normalize_ref(reference)?,
            None => return Ok((pointer, definition)),
        }
    }
    Err(FlattenError::schema(format!(
        "Not supported: circular reference chain at '{}'",
        pointer
    )))
}

/// One step of a path into a data document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    /// Name of the segment, as used for recovered dynamic keys
    pub fn name(&self) -> String {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(index) => index.to_string(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", escape(key)),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Formats a data path as a JSON Pointer (`/a/0/b`)
pub fn data_pointer(path: &[PathSegment]) -> String {
    path.iter().map(|segment| format!("/{}", segment)).collect()
}

/// Follows a data path from the document root
pub fn locate<'a>(root: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(root, |value, segment| match (segment, value) {
        (PathSegment::Key(key), Value::Object(map)) => map.get(key),
        (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
        _ => None,
    })
}
