use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Readable byte stream over a stored blob
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Durable key→bytes map addressed by opaque handles.
///
/// A handle is only returned once its payload is fully written, and a
/// handle is never reused for different content.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload and return its new handle
    async fn put(&self, data: Bytes) -> Result<String>;

    /// Read a whole payload; `NotFound` for unknown or removed handles
    async fn get(&self, handle: &str) -> Result<Bytes>;

    /// Remove a payload. Deleting an unknown handle succeeds.
    async fn delete(&self, handle: &str) -> Result<()>;

    /// Open a payload for incremental reading
    async fn open_stream(&self, handle: &str) -> Result<BlobReader>;

    /// Check if a handle is fetchable
    async fn exists(&self, handle: &str) -> Result<bool>;

    /// Get the backend name
    fn backend(&self) -> &'static str;
}
