//! JSON shapes exchanged with the persistence API, and the format rule for
//! the secret and hash that together form a storage key.

use crate::entry::Page;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A secret or hash that cannot be used to build a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPartition {
    #[error("{0} cannot be empty")]
    Empty(&'static str),
    #[error("{0} cannot have spaces, slashes, or periods")]
    ForbiddenCharacter(&'static str),
}

/// Check a storage-key component (`"secret"` or `"hash"`).
///
/// The secret is a partition prefix, not a credential. It is concatenated
/// with the hash to name stored objects, so neither part may carry
/// whitespace, path separators or periods.
pub fn validate_partition(field: &'static str, value: &str) -> Result<(), InvalidPartition> {
    if value.is_empty() {
        return Err(InvalidPartition::Empty(field));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '.'))
    {
        return Err(InvalidPartition::ForbiddenCharacter(field));
    }
    Ok(())
}

/// Byte payload in the `{"type": "Buffer", "data": [..]}` form the hosted
/// API has always accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferJson {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<u8>,
}

impl BufferJson {
    pub fn new(data: &[u8]) -> Self {
        Self {
            kind: "Buffer".to_string(),
            data: data.to_vec(),
        }
    }
}

/// A page as uploaded to the persistence API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub hash: String,
    pub url: String,
    pub expiration: i64,
    pub data: BufferJson,
}

impl PageRecord {
    /// Wire form of `page`, or `None` when it has no absolute expiration to
    /// upload.
    pub fn from_page(page: &Page) -> Option<Self> {
        Some(Self {
            hash: page.key().to_string(),
            url: page.url().to_string(),
            expiration: page.expiration.as_millis()?,
            data: BufferJson::new(&page.content),
        })
    }
}

/// Body of `POST /api/page`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageUpload {
    pub secret: String,
    pub page: PageRecord,
}
