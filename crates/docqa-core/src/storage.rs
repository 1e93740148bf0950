//! Object storage collaborator contract and an in-memory implementation.
//!
//! Blobs are addressed by `<owner_id>/<document_id>/<sanitized_filename>`;
//! see [`object_key`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::models::StoredObject;

/// Blob store for uploaded files.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> Result<StoredObject>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Maximum length of a sanitized filename, in characters.
const MAX_FILENAME_CHARS: usize = 128;

/// Reduce a client-supplied filename to a safe single path segment.
///
/// Directory components are stripped, anything outside `[A-Za-z0-9._-]`
/// becomes `_`, leading dots are removed, and the result is capped at 128
/// characters. An empty result becomes `"file"`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed: String = cleaned
        .trim_start_matches('.')
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

/// Storage key for a document's blob.
pub fn object_key(owner_id: &str, document_id: &str, filename: &str) -> String {
    format!("{}/{}/{}", owner_id, document_id, sanitize_filename(filename))
}

/// Hex SHA-256 of the blob, used as its etag.
pub fn content_etag(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// In-memory [`ObjectStorage`] for tests and development.
#[derive(Default)]
pub struct InMemoryObjectStorage {
    objects: RwLock<HashMap<String, (Vec<u8>, StoredObject)>>,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CoreError {
    CoreError::storage("object store lock poisoned")
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> Result<StoredObject> {
        let meta = StoredObject {
            key: key.to_string(),
            size: bytes.len() as u64,
            mime_type: mime_type.to_string(),
            etag: content_etag(&bytes),
        };
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), (bytes, meta.clone()));
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .map_err(poisoned)?
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| CoreError::not_found("object", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}
