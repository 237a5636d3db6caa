//! The entity contract.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::AppResult;
use crate::types::Value;

/// A persistable entity.
///
/// Entities round-trip through serde; backends use the serialized form to
/// store rows, resolve field-name sorts and apply partial updates.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Set (table) name.
    const NAME: &'static str;

    /// Primary key.
    fn key(&self) -> EntityKey;
}

/// Canonical primary-key representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<i32> for EntityKey {
    fn from(value: i32) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for EntityKey {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<uuid::Uuid> for EntityKey {
    fn from(value: uuid::Uuid) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Look up a dotted field path in a serialized entity.
///
/// Returns `None` when a segment is missing from an object; a `null`
/// encountered along the way resolves to `null`.
pub fn lookup<'a>(document: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = document;
    for segment in path.split('.') {
        match current {
            serde_json::Value::Null => return Some(current),
            serde_json::Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Resolve a field of an already serialized entity.
pub fn document_field(document: &serde_json::Value, path: &str) -> AppResult<Value> {
    lookup(document, path)
        .map(Value::from_json)
        .ok_or_else(|| AppError::argument(format!("Unknown field '{path}'")))
}

/// Resolve a field of an entity by name.
pub fn field_value<T: Serialize>(entity: &T, path: &str) -> AppResult<Value> {
    let document = serde_json::to_value(entity)?;
    document_field(&document, path)
}
