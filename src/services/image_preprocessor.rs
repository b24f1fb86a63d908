// Image Preprocessor
// Turns a local image reference into a base64 JPEG payload for the backends

use crate::models::{EncodedImage, PreprocessOptions};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use regex::Regex;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Inputs larger than this are rejected before decoding.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Image not readable ({path}): {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Image too large: {0} bytes")]
    TooLarge(usize),
    #[error("Image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("JPEG encode failed: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Invalid preprocess options: {0}")]
    InvalidOptions(String),
    #[error("Preprocess task failed: {0}")]
    Task(String),
}

/// Strip a `data:image/<fmt>;base64,` prefix if present.
pub fn strip_data_uri_prefix(value: &str) -> &str {
    static DATA_URI_RE: OnceLock<Regex> = OnceLock::new();
    let re = DATA_URI_RE.get_or_init(|| {
        Regex::new(r"^data:image/[a-zA-Z0-9.+-]+;base64,").expect("static data-uri regex")
    });
    match re.find(value) {
        Some(m) => &value[m.end()..],
        None => value,
    }
}

/// Accepts plain paths and `file://` URIs.
pub fn resolve_image_path(image_ref: &str) -> PathBuf {
    let trimmed = image_ref.trim();
    match trimmed.strip_prefix("file://") {
        Some(rest) => PathBuf::from(rest),
        None => PathBuf::from(trimmed),
    }
}

fn validate_options(options: &PreprocessOptions) -> Result<u8, PreprocessError> {
    if !options.quality.is_finite() || !(0.0..=1.0).contains(&options.quality) {
        return Err(PreprocessError::InvalidOptions(format!(
            "quality must be within 0.0..=1.0, got {}",
            options.quality
        )));
    }
    if let Some(size) = options.resize {
        if size.width == 0 || size.height == 0 {
            return Err(PreprocessError::InvalidOptions(format!(
                "resize target must be non-zero, got {}x{}",
                size.width, size.height
            )));
        }
    }
    // JPEG quality scale is 1..=100.
    Ok(((options.quality * 100.0).round() as u8).clamp(1, 100))
}

/// Decode, optionally resize, and re-encode as JPEG. CPU bound; callers on
/// the async runtime go through [`ImagePreprocessor::preprocess`].
pub fn encode_jpeg(bytes: &[u8], options: &PreprocessOptions) -> Result<EncodedImage, PreprocessError> {
    let quality = validate_options(options)?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PreprocessError::TooLarge(bytes.len()));
    }

    let decoded = image::load_from_memory(bytes).map_err(PreprocessError::Decode)?;
    let resized = match options.resize {
        Some(size) => decoded.resize_exact(size.width, size.height, FilterType::Triangle),
        None => decoded,
    };
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut buffer = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        .map_err(PreprocessError::Encode)?;

    Ok(EncodedImage {
        base64: BASE64.encode(buffer.into_inner()),
        width: rgb.width(),
        height: rgb.height(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    pub fn new() -> Self {
        Self
    }

    pub async fn preprocess(
        &self,
        image_ref: &str,
        options: &PreprocessOptions,
    ) -> Result<EncodedImage, PreprocessError> {
        let start = Instant::now();
        let path = resolve_image_path(image_ref);
        let bytes = read_image(&path).await?;
        debug!("[PREPROCESS] Read {} bytes from {}", bytes.len(), path.display());

        let options = options.clone();
        let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&bytes, &options))
            .await
            .map_err(|e| PreprocessError::Task(e.to_string()))??;

        info!(
            width = encoded.width,
            height = encoded.height,
            payload_len = encoded.base64.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "[PREPROCESS] Image encoded"
        );
        Ok(encoded)
    }
}

async fn read_image(path: &Path) -> Result<Vec<u8>, PreprocessError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| PreprocessError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
}
