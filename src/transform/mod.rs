//! Pure byte transforms applied to stored payloads, and the state
//! machine deciding which of them a payload currently accepts.

pub mod cipher;
pub mod compress;
pub mod state;

pub use cipher::{EmbeddedKeyAesCbc, PayloadCipher};
pub use compress::{compress, decompress};
pub use state::{TransformOp, TransformState};

use std::sync::Arc;

use crate::error::Result;

/// Stateless dispatcher from a [`TransformOp`] to its byte function
#[derive(Clone)]
pub struct TransformEngine {
    cipher: Arc<dyn PayloadCipher>,
}

impl TransformEngine {
    pub fn new(cipher: Arc<dyn PayloadCipher>) -> Self {
        Self { cipher }
    }

    pub fn cipher_name(&self) -> &'static str {
        self.cipher.name()
    }

    pub fn apply(&self, op: TransformOp, data: &[u8]) -> Result<Vec<u8>> {
        match op {
            TransformOp::Compress => compress(data),
            TransformOp::Decompress => decompress(data),
            TransformOp::Encrypt => self.cipher.encrypt(data),
            TransformOp::Decrypt => self.cipher.decrypt(data),
        }
    }
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new(Arc::new(EmbeddedKeyAesCbc))
    }
}
