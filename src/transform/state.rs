use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};

/// Which transforms are currently applied to a stored payload.
/// Compression, when present, always sits underneath encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformState {
    Raw,
    Compressed,
    Encrypted,
    CompressedEncrypted,
}

impl TransformState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformState::Raw => "raw",
            TransformState::Compressed => "compressed",
            TransformState::Encrypted => "encrypted",
            TransformState::CompressedEncrypted => "compressed_encrypted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(TransformState::Raw),
            "compressed" => Some(TransformState::Compressed),
            "encrypted" => Some(TransformState::Encrypted),
            "compressed_encrypted" => Some(TransformState::CompressedEncrypted),
            _ => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            TransformState::Encrypted | TransformState::CompressedEncrypted
        )
    }

    /// State reached by applying `op`, or `InvalidStateTransition`
    /// when `op` does not accept the current state as input.
    pub fn after(self, op: TransformOp) -> Result<Self> {
        use TransformOp::*;
        use TransformState::*;

        let next = match (self, op) {
            (Raw, Compress) => Some(Compressed),
            (Compressed, Decompress) => Some(Raw),
            (Raw, Encrypt) => Some(Encrypted),
            (Encrypted, Decrypt) => Some(Raw),
            (Compressed, Encrypt) => Some(CompressedEncrypted),
            (CompressedEncrypted, Decrypt) => Some(Compressed),
            _ => None,
        };

        next.ok_or_else(|| {
            let reason = match (self, op) {
                (s, Decompress) if s.is_encrypted() => "payload must be decrypted first",
                (_, Decompress) => "payload is not compressed",
                (_, Decrypt) => "payload is not encrypted",
                (s, Encrypt) if s.is_encrypted() => "payload is already encrypted",
                (s, Compress) if s.is_encrypted() => "encrypted payloads cannot be compressed",
                _ => "payload is already compressed",
            };
            AppError::InvalidStateTransition(format!(
                "cannot {} a file in state '{}': {}",
                op, self, reason
            ))
        })
    }
}

impl fmt::Display for TransformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reversible byte-to-byte conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformOp {
    Compress,
    Decompress,
    Encrypt,
    Decrypt,
}

impl TransformOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformOp::Compress => "compress",
            TransformOp::Decompress => "decompress",
            TransformOp::Encrypt => "encrypt",
            TransformOp::Decrypt => "decrypt",
        }
    }
}

impl fmt::Display for TransformOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
