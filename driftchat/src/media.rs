//! Object storage collaborator boundary.
//!
//! Binary attachments are uploaded before the message referencing them
//! is sent. Upload failure surfaces as a generic upload-failed
//! condition; no message is created for a failed upload.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use uuid::Uuid;

/// Errors from the object storage collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    /// The upload did not complete.
    #[error("upload failed: {0}")]
    UploadFailed(String),
}

/// Uploads binary objects and returns retrievable URLs.
pub trait MediaStore: Send + Sync {
    /// Upload `bytes` and return the URL where they can be retrieved.
    fn upload(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> impl std::future::Future<Output = Result<String, MediaError>> + Send;
}

/// In-process [`MediaStore`] for tests and embedding.
#[derive(Default)]
pub struct MemoryMedia {
    uploads: Mutex<Vec<(String, usize)>>,
    fail: AtomicBool,
}

impl MemoryMedia {
    /// Creates an empty media store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent uploads fail.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of completed uploads.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }
}

impl MediaStore for MemoryMedia {
    async fn upload(&self, bytes: &[u8], content_type: &str) -> Result<String, MediaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::UploadFailed("media store unavailable".into()));
        }
        let extension = content_type.rsplit('/').next().unwrap_or("bin");
        let url = format!("memory://uploads/{}.{extension}", Uuid::new_v4());
        self.uploads.lock().push((url.clone(), bytes.len()));
        Ok(url)
    }
}
