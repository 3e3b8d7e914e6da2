//! Request-scoped temporary storage for uploaded images.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// An uploaded image as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

impl UploadedImage {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Temp file holding one upload for the lifetime of one request.
///
/// The file is removed when the guard is dropped, on every exit path of the
/// handler. Removal failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    content_type: String,
    file_name: String,
}

impl TempUpload {
    /// Write `image` to a fresh file under `dir`.
    pub async fn persist(dir: &Path, image: UploadedImage) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(Uuid::new_v4().to_string());
        tokio::fs::write(&path, &image.bytes).await?;

        tracing::debug!(
            path = %path.display(),
            size = image.size(),
            file_name = %image.file_name,
            "Stored upload in temp file"
        );

        Ok(Self {
            path,
            content_type: image.content_type,
            file_name: image.file_name,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temp upload"
            );
        }
    }
}
