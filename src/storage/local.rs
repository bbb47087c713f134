use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::{BlobReader, BlobStore};

/// Local file system blob store.
/// Blobs live at `<base>/<first two hex chars>/<handle>`.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve a handle to its path. Anything that is not a handle we
    /// could have issued resolves to `NotFound`.
    fn blob_path(&self, handle: &str) -> Result<PathBuf> {
        let valid = handle.len() == 32 && handle.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(AppError::NotFound(format!("Blob not found: {}", handle)));
        }
        Ok(self.base_path.join(&handle[..2]).join(handle))
    }

    async fn write_durably(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let part_path = path.with_extension("part");
        let mut file = fs::File::create(&part_path).await?;
        if let Err(e) = Self::fill(&mut file, data).await {
            drop(file);
            let _ = fs::remove_file(&part_path).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&part_path, path).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(e);
        }

        // Persist the rename itself; a blob we cannot vouch for is removed
        if let Err(e) = Self::sync_parent(path).await {
            let _ = fs::remove_file(path).await;
            return Err(e);
        }

        Ok(())
    }

    #[cfg(unix)]
    async fn sync_parent(path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::File::open(parent).await?.sync_all().await?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_parent(_path: &Path) -> std::io::Result<()> {
        Ok(())
    }

    async fn fill(file: &mut fs::File, data: &[u8]) -> std::io::Result<()> {
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

fn io_to_storage(handle: &str, action: &str, e: std::io::Error) -> AppError {
    if e.kind() == ErrorKind::NotFound {
        AppError::NotFound(format!("Blob not found: {}", handle))
    } else {
        AppError::Storage(format!("Failed to {} blob {}: {}", action, handle, e))
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn put(&self, data: Bytes) -> Result<String> {
        let handle = Uuid::new_v4().simple().to_string();
        let full_path = self.blob_path(&handle)?;

        Self::write_durably(&full_path, &data)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to write blob {}: {}", handle, e)))?;

        tracing::debug!("Saved blob {} ({} bytes) to {:?}", handle, data.len(), full_path);
        Ok(handle)
    }

    async fn get(&self, handle: &str) -> Result<Bytes> {
        let full_path = self.blob_path(handle)?;

        let data = fs::read(&full_path)
            .await
            .map_err(|e| io_to_storage(handle, "read", e))?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        let full_path = match self.blob_path(handle) {
            Ok(path) => path,
            Err(AppError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        match fs::remove_file(&full_path).await {
            Ok(()) => tracing::debug!("Deleted blob {:?}", full_path),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_to_storage(handle, "delete", e)),
        }

        // Try to remove empty parent directories
        let mut current_dir = full_path.parent().map(|p| p.to_path_buf());
        while let Some(dir) = current_dir {
            if dir == self.base_path {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if matches!(entries.next_entry().await, Ok(Some(_))) {
                        break;
                    }
                    let _ = fs::remove_dir(&dir).await;
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(|p| p.to_path_buf());
        }

        Ok(())
    }

    async fn open_stream(&self, handle: &str) -> Result<BlobReader> {
        let full_path = self.blob_path(handle)?;
        let file = fs::File::open(&full_path)
            .await
            .map_err(|e| io_to_storage(handle, "open", e))?;
        Ok(Box::pin(file))
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        let path = match self.blob_path(handle) {
            Ok(path) => path,
            Err(_) => return Ok(false),
        };
        fs::try_exists(&path)
            .await
            .map_err(|e| io_to_storage(handle, "stat", e))
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        let handle = store.put(Bytes::from_static(b"helloworld")).await.unwrap();
        assert_eq!(store.get(&handle).await.unwrap(), Bytes::from_static(b"helloworld"));
        assert!(store.exists(&handle).await.unwrap());

        store.delete(&handle).await.unwrap();
        assert!(!store.exists(&handle).await.unwrap());
        assert!(matches!(store.get(&handle).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_no_partial_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        let handle = store.put(Bytes::from(vec![1u8; 4096])).await.unwrap();
        let shard = dir.path().join(&handle[..2]);
        let names: Vec<_> = std::fs::read_dir(&shard)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![handle]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_prunes_shard() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        let handle = store.put(Bytes::from_static(b"x")).await.unwrap();
        store.delete(&handle).await.unwrap();
        store.delete(&handle).await.unwrap();
        store.delete("never-issued").await.unwrap();

        assert!(!dir.path().join(&handle[..2]).exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_handles_are_unique() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        let a = store.put(Bytes::from_static(b"same")).await.unwrap();
        let b = store.put(Bytes::from_static(b"same")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        assert!(matches!(
            store.get("../../etc/passwd").await,
            Err(AppError::NotFound(_))
        ));
        assert!(!store.exists("../secret").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_stream() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());
        let payload = vec![42u8; 100_000];

        let handle = store.put(Bytes::from(payload.clone())).await.unwrap();
        let mut reader = store.open_stream(&handle).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, payload);

        store.delete(&handle).await.unwrap();
        assert!(matches!(
            store.open_stream(&handle).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("ab").join("target");

        // A non-empty directory in the way makes the final rename fail
        std::fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(LocalStorage::write_durably(&target, b"payload").await.is_err());
        let names: Vec<_> = std::fs::read_dir(dir.path().join("ab"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["target".to_string()]);
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_exists_reports_io_errors() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        // The shard is a plain file, so looking inside it is not "absent"
        std::fs::write(dir.path().join("ab"), b"not a directory").unwrap();
        let handle = format!("ab{}", "0".repeat(30));

        assert!(matches!(
            store.exists(&handle).await,
            Err(AppError::Storage(_))
        ));
    }
}
