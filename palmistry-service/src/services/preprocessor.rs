//! Upload validation and JPEG normalisation.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TOO_SMALL_MESSAGE: &str =
    "The photo is too small or too dark. Try moving closer and use good lighting.";

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Only image uploads are accepted (got {0})")]
    NotAnImage(String),

    #[error("Unable to read image: {0}")]
    Unreadable(String),

    #[error("{}", TOO_SMALL_MESSAGE)]
    TooSmall { width: u32, min_width: u32 },

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Checks that an upload is a usable photo and re-encodes it as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    min_width: u32,
    jpeg_quality: u8,
}

impl ImagePreprocessor {
    pub fn new(min_width: u32, jpeg_quality: u8) -> Self {
        Self {
            min_width,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Validate and normalise the image stored at `path`.
    ///
    /// Reads the file twice on the blocking pool: a header read for the width
    /// and a full decode for re-encoding. Nothing is decoded when the header
    /// already rules the photo out.
    pub async fn prepare(&self, path: &Path, content_type: &str) -> Result<Vec<u8>, PreprocessError> {
        ensure_image_type(content_type)?;

        let this = *self;
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let (width, _) = ImageReader::open(&path)
                .and_then(|r| r.with_guessed_format())
                .map_err(|e| PreprocessError::Unreadable(e.to_string()))?
                .into_dimensions()
                .map_err(|e| PreprocessError::Unreadable(e.to_string()))?;
            this.check_width(width)?;

            let decoded = ImageReader::open(&path)
                .and_then(|r| r.with_guessed_format())
                .map_err(|e| PreprocessError::Unreadable(e.to_string()))?
                .decode()
                .map_err(|e| PreprocessError::Unreadable(e.to_string()))?;
            this.encode_jpeg(decoded)
        })
        .await
        .map_err(|e| PreprocessError::Encode(format!("preprocessing task failed: {}", e)))?
    }

    /// Same as [`prepare`](Self::prepare) for an in-memory buffer.
    pub fn prepare_bytes(&self, bytes: &[u8], content_type: &str) -> Result<Vec<u8>, PreprocessError> {
        ensure_image_type(content_type)?;

        let reader = || {
            ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()
                .map_err(|e| PreprocessError::Unreadable(e.to_string()))
        };

        let (width, _) = reader()?
            .into_dimensions()
            .map_err(|e| PreprocessError::Unreadable(e.to_string()))?;
        self.check_width(width)?;

        let decoded = reader()?
            .decode()
            .map_err(|e| PreprocessError::Unreadable(e.to_string()))?;
        self.encode_jpeg(decoded)
    }

    fn check_width(&self, width: u32) -> Result<(), PreprocessError> {
        if width == 0 || width < self.min_width {
            tracing::info!(width, min_width = self.min_width, "Rejecting undersized photo");
            return Err(PreprocessError::TooSmall {
                width,
                min_width: self.min_width,
            });
        }
        Ok(())
    }

    fn encode_jpeg(&self, image: DynamicImage) -> Result<Vec<u8>, PreprocessError> {
        // JPEG has no alpha channel.
        let rgb = image.into_rgb8();

        let mut out = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))
            .map_err(|e| PreprocessError::Encode(e.to_string()))?;
        Ok(out)
    }
}

fn ensure_image_type(content_type: &str) -> Result<(), PreprocessError> {
    if content_type.starts_with("image/") {
        Ok(())
    } else {
        Err(PreprocessError::NotAnImage(content_type.to_string()))
    }
}
