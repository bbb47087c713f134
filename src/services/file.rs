use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::FileRecord;
use crate::services::{AuthService, FileLocks};
use crate::storage::{BlobReader, BlobStore};
use crate::transform::{TransformEngine, TransformOp, TransformState};

const DEFAULT_MIME: &str = "application/octet-stream";

/// File service: owns each file's record, its current blob and the
/// transform state, and serializes every mutation per file.
pub struct FileService {
    db: Database,
    store: Arc<dyn BlobStore>,
    engine: TransformEngine,
    locks: FileLocks,
    max_upload_bytes: usize,
}

impl FileService {
    pub fn new(
        db: Database,
        store: Arc<dyn BlobStore>,
        engine: TransformEngine,
        locks: FileLocks,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            db,
            store,
            engine,
            locks,
            max_upload_bytes,
        }
    }

    pub fn from_config(
        config: &Config,
        db: Database,
        store: Arc<dyn BlobStore>,
        engine: TransformEngine,
    ) -> Self {
        let locks = FileLocks::new(Duration::from_secs(config.transform.lock_timeout_secs));
        Self::new(db, store, engine, locks, config.storage.max_upload_bytes)
    }

    /// Store an uploaded payload and create its record in `Raw` state
    pub async fn create_record(
        &self,
        owner_id: &str,
        display_name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<FileRecord> {
        Self::validate_name(display_name)?;
        if data.len() > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "File is {} bytes, limit is {}",
                data.len(),
                self.max_upload_bytes
            )));
        }

        // Fresh id: nothing else can reach this file until the insert
        // commits, so no lock is taken
        let file_id = Uuid::new_v4().to_string();

        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_MIME
        } else {
            mime_type
        };
        let size = data.len() as i64;
        let handle = self.store.put(data).await?;
        let now = Utc::now().to_rfc3339();

        let inserted = sqlx::query(
            r#"
            INSERT INTO files (id, owner_id, display_name, mime_type, size_bytes, blob_handle, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file_id)
        .bind(owner_id)
        .bind(display_name)
        .bind(mime_type)
        .bind(size)
        .bind(&handle)
        .bind(TransformState::Raw.as_str())
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await;

        if let Err(e) = inserted {
            self.release_blob(&handle).await;
            return Err(e.into());
        }

        tracing::info!(
            "Created file {} ({}, {} bytes) for user {} on {} store",
            file_id,
            display_name,
            size,
            owner_id,
            self.store.backend()
        );
        self.get_file(&file_id).await
    }

    /// Get a file the caller owns
    pub async fn get_record(&self, file_id: &str, caller_id: &str) -> Result<FileRecord> {
        let file = self.get_file(file_id).await?;
        AuthService::authorize_owner(&file, caller_id)?;
        Ok(file)
    }

    /// List the caller's files, newest first
    pub async fn list_records(&self, caller_id: &str) -> Result<Vec<FileRecord>> {
        let files: Vec<FileRecord> = sqlx::query_as(
            "SELECT * FROM files WHERE owner_id = ? ORDER BY created_at DESC, id ASC",
        )
        .bind(caller_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(files)
    }

    /// Rename a file
    pub async fn rename_record(
        &self,
        file_id: &str,
        caller_id: &str,
        new_name: &str,
    ) -> Result<FileRecord> {
        Self::validate_name(new_name)?;

        let _guard = self.locks.acquire(file_id).await?;
        let file = self.get_file(file_id).await?;
        AuthService::authorize_owner(&file, caller_id)?;

        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE files SET display_name = ?, updated_at = ? WHERE id = ?")
            .bind(new_name)
            .bind(&now)
            .bind(file_id)
            .execute(self.db.pool())
            .await?;

        self.get_file(file_id).await
    }

    /// Apply one transform to the stored payload.
    ///
    /// The record only changes after the transformed payload is durably
    /// stored; any failure before that leaves it exactly as it was.
    pub async fn apply_transform(
        &self,
        file_id: &str,
        caller_id: &str,
        op: TransformOp,
    ) -> Result<FileRecord> {
        let _guard = self.locks.acquire(file_id).await?;

        let file = self.get_file(file_id).await?;
        AuthService::authorize_owner(&file, caller_id)?;
        let current = file.get_state()?;
        let next = current.after(op)?;

        let input = self.store.get(&file.blob_handle).await?;
        let engine = self.engine.clone();
        let output = tokio::task::spawn_blocking(move || engine.apply(op, &input))
            .await
            .map_err(|e| AppError::Internal(format!("Transform task failed: {}", e)))??;

        let new_size = output.len() as i64;
        let new_handle = self.store.put(Bytes::from(output)).await?;
        let now = Utc::now().to_rfc3339();

        // Conditional on what we loaded, so a writer outside this process
        // cannot be silently overwritten
        let updated = sqlx::query(
            "UPDATE files SET blob_handle = ?, state = ?, size_bytes = ?, updated_at = ? WHERE id = ? AND blob_handle = ? AND state = ?",
        )
        .bind(&new_handle)
        .bind(next.as_str())
        .bind(new_size)
        .bind(&now)
        .bind(file_id)
        .bind(&file.blob_handle)
        .bind(current.as_str())
        .execute(self.db.pool())
        .await;

        match updated {
            Ok(result) if result.rows_affected() == 1 => {}
            Ok(_) => {
                self.release_blob(&new_handle).await;
                return Err(AppError::Conflict(format!(
                    "File {} changed while it was being transformed",
                    file_id
                )));
            }
            Err(e) => {
                self.release_blob(&new_handle).await;
                return Err(e.into());
            }
        }

        if let Err(e) = self.store.delete(&file.blob_handle).await {
            tracing::error!(
                "Failed to release blob {} of file {}, reverting: {}",
                file.blob_handle,
                file_id,
                e
            );
            self.revert_transform(&file, &new_handle).await;
            return Err(e);
        }

        tracing::info!(
            "Applied {} to file {}: {} -> {} ({} -> {} bytes)",
            op,
            file_id,
            current,
            next,
            file.size_bytes,
            new_size
        );
        self.get_file(file_id).await
    }

    /// Open the stored payload for reading, verbatim
    pub async fn get_payload(
        &self,
        file_id: &str,
        caller_id: &str,
    ) -> Result<(FileRecord, BlobReader)> {
        let file = self.get_record(file_id, caller_id).await?;

        match self.store.open_stream(&file.blob_handle).await {
            Ok(reader) => Ok((file, reader)),
            Err(AppError::NotFound(_)) => {
                // A transform may have swapped the blob between our read
                // of the record and the open
                let latest = self.get_record(file_id, caller_id).await?;
                if latest.blob_handle == file.blob_handle {
                    return Err(AppError::NotFound(format!(
                        "Payload of file {} is missing",
                        file_id
                    )));
                }
                let reader = self.store.open_stream(&latest.blob_handle).await?;
                Ok((latest, reader))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the blob, then the record. A failed blob delete keeps the
    /// record so the request can be retried.
    pub async fn delete_record(&self, file_id: &str, caller_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(file_id).await?;

        let file = self.get_file(file_id).await?;
        AuthService::authorize_owner(&file, caller_id)?;

        self.store.delete(&file.blob_handle).await?;

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(self.db.pool())
            .await?;

        tracing::info!("Deleted file {} of user {}", file_id, caller_id);
        Ok(())
    }

    /// Get a file by ID
    async fn get_file(&self, file_id: &str) -> Result<FileRecord> {
        let file: FileRecord = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        Ok(file)
    }

    /// Point the record back at its previous payload after the old blob
    /// could not be released, then drop the new one.
    async fn revert_transform(&self, previous: &FileRecord, new_handle: &str) {
        let reverted = sqlx::query(
            "UPDATE files SET blob_handle = ?, state = ?, size_bytes = ?, updated_at = ? WHERE id = ? AND blob_handle = ?",
        )
        .bind(&previous.blob_handle)
        .bind(&previous.state)
        .bind(previous.size_bytes)
        .bind(&previous.updated_at)
        .bind(&previous.id)
        .bind(new_handle)
        .execute(self.db.pool())
        .await;

        match reverted {
            Ok(result) if result.rows_affected() == 1 => self.release_blob(new_handle).await,
            Ok(_) => tracing::error!(
                "Could not revert file {}: record no longer points at blob {}",
                previous.id,
                new_handle
            ),
            Err(e) => tracing::error!("Could not revert file {}: {}", previous.id, e),
        }
    }

    /// Best-effort delete of a blob no record points at
    async fn release_blob(&self, handle: &str) {
        if let Err(e) = self.store.delete(handle).await {
            tracing::warn!("Failed to release orphaned blob {}: {}", handle, e);
        }
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() || name.contains('/') || name.contains('\\') {
            return Err(AppError::BadRequest("Invalid file name".to_string()));
        }
        Ok(())
    }
}
