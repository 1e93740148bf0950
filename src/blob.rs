//! Filesystem object storage.
//!
//! Blobs live at `<storage.root>/<key>`, where keys are the
//! `<owner_id>/<document_id>/<filename>` paths produced by the core. Keys
//! that would escape the root are rejected.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use docqa_core::error::{CoreError, Result};
use docqa_core::models::StoredObject;
use docqa_core::storage::{content_etag, ObjectStorage};

pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CoreError::InvalidInput(format!(
                "invalid object key: {}",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, mime_type: &str) -> Result<StoredObject> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::storage_with(format!("create {}", parent.display()), e))?;
        }

        let meta = StoredObject {
            key: key.to_string(),
            size: bytes.len() as u64,
            mime_type: mime_type.to_string(),
            etag: content_etag(&bytes),
        };
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CoreError::storage_with(format!("write {}", path.display()), e))?;
        tracing::debug!(key, size = meta.size, "stored blob");
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found("object", key))
            }
            Err(e) => Err(CoreError::storage_with(format!("read {}", path.display()), e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::storage_with(format!("delete {}", path.display()), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::ErrorKind;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStorage::new(tmp.path());

        let meta = store
            .put("alice/doc-1/notes.txt", b"hello".to_vec(), "text/plain")
            .await
            .unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.etag, content_etag(b"hello"));
        assert!(tmp.path().join("alice/doc-1/notes.txt").exists());

        assert_eq!(store.get("alice/doc-1/notes.txt").await.unwrap(), b"hello");

        store.delete("alice/doc-1/notes.txt").await.unwrap();
        let err = store.get("alice/doc-1/notes.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Deleting again is not an error.
        store.delete("alice/doc-1/notes.txt").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_keys_escaping_root() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStorage::new(tmp.path());
        for key in ["../evil", "/etc/passwd", "a/../../b", ""] {
            let err = store.put(key, vec![1], "text/plain").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "key {:?}", key);
        }
    }
}
