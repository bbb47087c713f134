use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, Result};
use crate::transform::TransformState;

/// File record model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(skip_serializing)]
    pub blob_handle: String,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRecord {
    pub fn get_state(&self) -> Result<TransformState> {
        TransformState::from_str(&self.state).ok_or_else(|| {
            AppError::Internal(format!(
                "File {} has unknown transform state '{}'",
                self.id, self.state
            ))
        })
    }
}

/// File response returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<FileRecord> for FileResponse {
    fn from(file: FileRecord) -> Self {
        Self {
            id: file.id,
            owner_id: file.owner_id,
            name: file.display_name,
            mime_type: file.mime_type,
            size: file.size_bytes,
            state: file.state,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

/// Rename file request
#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub name: String,
}
