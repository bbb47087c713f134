pub mod bucket;
pub mod local;
pub mod provider;

pub use bucket::*;
pub use local::*;
pub use provider::*;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::db::Database;

/// Storage manager that creates the blob store selected in config
pub struct StorageManager;

impl StorageManager {
    pub fn build(config: &StorageConfig, db: &Database) -> Arc<dyn BlobStore> {
        let store: Arc<dyn BlobStore> = match config.backend {
            StorageBackend::Local => Arc::new(LocalStorage::new(&config.local_path)),
            StorageBackend::Bucket => Arc::new(BucketStorage::new(db.clone(), config.chunk_size)),
        };
        tracing::info!("Blob store backend: {}", store.backend());
        store
    }
}
