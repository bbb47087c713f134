//! Chunked blob bucket kept inside the record database, in the manner of
//! GridFS: one descriptor row per object plus fixed-size chunk rows.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::storage::{BlobReader, BlobStore};

/// Open readers of one blob, and whether it was deleted under them
#[derive(Default)]
struct Lease {
    readers: usize,
    released: bool,
}

type LeaseTable = Arc<Mutex<HashMap<String, Lease>>>;

/// Database-backed chunked blob store.
///
/// Deleting a blob removes its descriptor at once, so the handle stops
/// resolving, but chunks still being streamed are kept until the last
/// open reader is dropped.
pub struct BucketStorage {
    db: Database,
    chunk_size: usize,
    leases: LeaseTable,
}

impl BucketStorage {
    pub fn new(db: Database, chunk_size: usize) -> Self {
        Self {
            db,
            chunk_size: chunk_size.max(1),
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn digest(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    /// (length, sha256, chunk count) for a stored object
    async fn descriptor(&self, handle: &str) -> Result<(i64, String, i64)> {
        let object: Option<(i64, String, i64)> = sqlx::query_as(
            "SELECT length, sha256, (SELECT COUNT(*) FROM blob_chunks WHERE blob_chunks.handle = blob_objects.handle) FROM blob_objects WHERE handle = ?",
        )
        .bind(handle)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| db_to_storage(handle, e))?;

        object.ok_or_else(|| AppError::NotFound(format!("Blob not found: {}", handle)))
    }
}

fn db_to_storage(handle: &str, e: sqlx::Error) -> AppError {
    AppError::Storage(format!("Bucket query failed for blob {}: {}", handle, e))
}

async fn purge_chunks(pool: &SqlitePool, handle: &str) -> std::result::Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM blob_chunks WHERE handle = ?")
        .bind(handle)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Keeps a blob's chunks in place while a reader holds it
struct ReadLease {
    leases: LeaseTable,
    pool: SqlitePool,
    handle: String,
}

impl ReadLease {
    fn acquire(leases: &LeaseTable, pool: &SqlitePool, handle: &str) -> Self {
        let mut table = leases.lock().unwrap_or_else(|e| e.into_inner());
        table.entry(handle.to_string()).or_default().readers += 1;
        Self {
            leases: leases.clone(),
            pool: pool.clone(),
            handle: handle.to_string(),
        }
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        let purge = {
            let mut table = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            let last = match table.get_mut(&self.handle) {
                Some(lease) => {
                    lease.readers -= 1;
                    lease.readers == 0
                }
                None => false,
            };
            last && table
                .remove(&self.handle)
                .map_or(false, |lease| lease.released)
        };
        if !purge {
            return;
        }

        let pool = self.pool.clone();
        let handle = std::mem::take(&mut self.handle);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match purge_chunks(&pool, &handle).await {
                        Ok(_) => tracing::debug!("Removed chunks of released blob {}", handle),
                        Err(e) => tracing::warn!("Failed to remove chunks of blob {}: {}", handle, e),
                    }
                });
            }
            Err(_) => tracing::warn!(
                "Chunks of blob {} left for the startup sweep",
                handle
            ),
        }
    }
}

/// Chunk stream that holds its blob's lease until dropped
struct LeasedReader {
    inner: BlobReader,
    _lease: ReadLease,
}

impl AsyncRead for LeasedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

#[async_trait]
impl BlobStore for BucketStorage {
    async fn put(&self, data: Bytes) -> Result<String> {
        let handle = Uuid::new_v4().to_string();
        let sha256 = Self::digest(&data);

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| db_to_storage(&handle, e))?;

        sqlx::query("INSERT INTO blob_objects (handle, length, sha256, chunk_size) VALUES (?, ?, ?, ?)")
            .bind(&handle)
            .bind(data.len() as i64)
            .bind(&sha256)
            .bind(self.chunk_size as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_to_storage(&handle, e))?;

        for (n, chunk) in data.chunks(self.chunk_size).enumerate() {
            sqlx::query("INSERT INTO blob_chunks (handle, n, data) VALUES (?, ?, ?)")
                .bind(&handle)
                .bind(n as i64)
                .bind(chunk)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_to_storage(&handle, e))?;
        }

        // Handle becomes visible only once every chunk is committed
        tx.commit().await.map_err(|e| db_to_storage(&handle, e))?;

        tracing::debug!("Stored blob {} ({} bytes) in bucket", handle, data.len());
        Ok(handle)
    }

    async fn get(&self, handle: &str) -> Result<Bytes> {
        let (length, sha256, _) = self.descriptor(handle).await?;

        let chunks: Vec<Vec<u8>> =
            sqlx::query_scalar("SELECT data FROM blob_chunks WHERE handle = ? ORDER BY n ASC")
                .bind(handle)
                .fetch_all(self.db.pool())
                .await
                .map_err(|e| db_to_storage(handle, e))?;

        let data = chunks.concat();
        if data.len() as i64 != length || Self::digest(&data) != sha256 {
            return Err(AppError::Storage(format!(
                "Blob {} failed integrity check",
                handle
            )));
        }

        Ok(Bytes::from(data))
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        let removed = sqlx::query("DELETE FROM blob_objects WHERE handle = ?")
            .bind(handle)
            .execute(self.db.pool())
            .await
            .map_err(|e| db_to_storage(handle, e))?
            .rows_affected();

        let in_use = {
            let mut table = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            match table.get_mut(handle) {
                Some(lease) => {
                    lease.released = true;
                    true
                }
                None => false,
            }
        };

        if in_use {
            tracing::debug!("Blob {} deleted, chunks kept for open readers", handle);
        } else {
            purge_chunks(self.db.pool(), handle)
                .await
                .map_err(|e| db_to_storage(handle, e))?;
            if removed > 0 {
                tracing::debug!("Deleted blob {} from bucket", handle);
            }
        }
        Ok(())
    }

    async fn open_stream(&self, handle: &str) -> Result<BlobReader> {
        // Lease before looking up, so a delete either hides the handle from
        // us or sees our lease and leaves the chunks alone
        let lease = ReadLease::acquire(&self.leases, self.db.pool(), handle);
        let (_, _, chunk_count) = self.descriptor(handle).await?;

        let pool = self.db.pool().clone();
        let handle = handle.to_string();
        let chunks = stream::iter(0..chunk_count)
            .then(move |n| {
                let pool = pool.clone();
                let handle = handle.clone();
                async move {
                    let data: Option<Vec<u8>> =
                        sqlx::query_scalar("SELECT data FROM blob_chunks WHERE handle = ? AND n = ?")
                            .bind(&handle)
                            .bind(n)
                            .fetch_optional(&pool)
                            .await
                            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    data.map(Bytes::from).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("chunk {} of blob {} is gone", n, handle),
                        )
                    })
                }
            });

        Ok(Box::pin(LeasedReader {
            inner: Box::pin(StreamReader::new(Box::pin(chunks))),
            _lease: lease,
        }))
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blob_objects WHERE handle = ?")
            .bind(handle)
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| db_to_storage(handle, e))?;
        Ok(count > 0)
    }

    fn backend(&self) -> &'static str {
        "bucket"
    }
}
