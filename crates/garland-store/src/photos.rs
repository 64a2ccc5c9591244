//! Gift photo storage.
//!
//! Photos are opaque JPEG blobs on disk, keyed by the gift's image id (the
//! same id the QR code carries). Blob storage is deliberately independent of
//! the record store: a missing photo after a sync is a recoverable condition,
//! not a broken record.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use garland_shared::constants::PHOTO_EXTENSION;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct PhotoStore {
    base_path: PathBuf,
}

impl PhotoStore {
    /// Open the store, creating the directory if missing.
    pub async fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;

        info!(path = %base_path.display(), "Photo store initialized");

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Filesystem path for a photo. Uuid formatting is lowercase hyphenated,
    /// which keeps keys filesystem-safe on every platform.
    pub fn path_for(&self, image_id: Uuid) -> PathBuf {
        self.base_path
            .join(format!("{image_id}.{PHOTO_EXTENSION}"))
    }

    pub async fn write(&self, image_id: Uuid, data: &[u8]) -> Result<()> {
        // The directory may have been removed out from under us between
        // startup and now; recreate it rather than failing the write.
        fs::create_dir_all(&self.base_path).await?;

        let path = self.path_for(image_id);
        fs::write(&path, data).await?;

        debug!(id = %image_id, size = data.len(), "Stored photo");
        Ok(())
    }

    pub async fn read(&self, image_id: Uuid) -> Result<Vec<u8>> {
        let path = self.path_for(image_id);

        match fs::read(&path).await {
            Ok(data) => {
                debug!(id = %image_id, size = data.len(), "Read photo");
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Like [`read`](Self::read), but a missing photo is `None` instead of an
    /// error.
    pub async fn try_read(&self, image_id: Uuid) -> Option<Vec<u8>> {
        self.read(image_id).await.ok()
    }

    /// Delete a photo. Deleting a photo that is already gone is fine; archive
    /// propagation may race a photo that never arrived.
    pub async fn delete(&self, image_id: Uuid) -> Result<()> {
        let path = self.path_for(image_id);

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id = %image_id, "Deleted photo");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    pub async fn exists(&self, image_id: Uuid) -> bool {
        fs::try_exists(self.path_for(image_id)).await.unwrap_or(false)
    }

    /// Image ids of every stored photo, in no particular order.
    pub async fn list(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(&format!(".{PHOTO_EXTENSION}")) else {
                continue;
            };
            if let Ok(id) = Uuid::parse_str(stem) {
                ids.push(id);
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (PhotoStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = PhotoStore::new(dir.path().to_path_buf()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn write_and_read() {
        let (store, _dir) = test_store().await;
        let id = Uuid::new_v4();

        store.write(id, b"jpeg-bytes").await.unwrap();
        assert_eq!(store.read(id).await.unwrap(), b"jpeg-bytes");
        assert!(store.exists(id).await);
    }

    #[tokio::test]
    async fn missing_photo_is_not_found() {
        let (store, _dir) = test_store().await;
        let missing = Uuid::new_v4();

        assert!(matches!(store.read(missing).await, Err(StoreError::NotFound)));
        assert!(store.try_read(missing).await.is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _dir) = test_store().await;
        let id = Uuid::new_v4();

        store.write(id, b"bytes").await.unwrap();
        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(!store.exists(id).await);
    }

    #[tokio::test]
    async fn list_only_photo_files() {
        let (store, dir) = test_store().await;
        let id = Uuid::new_v4();

        store.write(id, b"bytes").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"ignore me")
            .await
            .unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec![id]);
    }
}
