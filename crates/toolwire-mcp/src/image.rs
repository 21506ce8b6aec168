//! Image pool seam: tool results hand image bytes off and keep a reference id.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagePoolError {
    #[error("Image data is not valid base64: {0}")]
    InvalidData(String),

    #[error("Image pool rejected the image: {0}")]
    Rejected(String),
}

/// Accepts base64 image payloads and returns an opaque reference id.
pub trait ImagePool: Send + Sync {
    fn store(&self, base64_data: &str, mime_type: &str) -> Result<String, ImagePoolError>;
}

/// Decoded byte length of a base64 payload, or the raw length if it does not decode.
pub fn payload_len(base64_data: &str) -> usize {
    STANDARD
        .decode(base64_data.trim())
        .map_or(base64_data.len(), |bytes| bytes.len())
}

/// An image held by [`MemoryImagePool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Process-local image pool keyed by random UUIDs.
#[derive(Default)]
pub struct MemoryImagePool {
    images: Mutex<HashMap<String, StoredImage>>,
    max_bytes: Option<usize>,
}

impl MemoryImagePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject images whose decoded size exceeds `max_bytes`.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            max_bytes: Some(max_bytes),
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredImage> {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImagePool for MemoryImagePool {
    fn store(&self, base64_data: &str, mime_type: &str) -> Result<String, ImagePoolError> {
        let bytes = STANDARD
            .decode(base64_data.trim())
            .map_err(|e| ImagePoolError::InvalidData(e.to_string()))?;
        if let Some(limit) = self.max_bytes {
            if bytes.len() > limit {
                return Err(ImagePoolError::Rejected(format!(
                    "{} bytes exceeds the {limit} byte limit",
                    bytes.len()
                )));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.images
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                StoredImage {
                    mime_type: mime_type.to_string(),
                    bytes,
                },
            );
        Ok(id)
    }
}
