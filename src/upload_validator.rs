use std::io::Cursor;
use std::path::Path;

use image::ImageFormat;
use serde::Serialize;

use crate::config::Limits;

pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Uploaded file is empty")]
    Empty,
    #[error("File too large: {size} bytes (maximum {max} bytes)")]
    TooLarge { size: usize, max: usize },
    #[error("File name has no extension")]
    MissingExtension,
    #[error("Unsupported file extension '.{0}' (allowed: jpg, jpeg, png, webp)")]
    UnsupportedExtension(String),
    #[error("File content is not a supported image")]
    UnrecognizedContent,
    #[error("File extension '.{extension}' does not match its {detected} content")]
    ContentMismatch {
        extension: String,
        detected: &'static str,
    },
    #[error("Unreadable image: {0}")]
    Unreadable(String),
}

/// What the upload turned out to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadInfo {
    pub mime_type: &'static str,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

/// Maps a file extension to the image format it claims.
fn from_extension(ext: &str) -> Option<ImageFormat> {
    match ext.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

fn mime_type(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

fn canonical_extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        _ => "jpg",
    }
}

/// Checks size, extension and actual content of an uploaded photo.
pub fn validate_upload(
    filename: &str,
    data: &[u8],
    limits: &Limits,
) -> Result<UploadInfo, UploadError> {
    if data.is_empty() {
        return Err(UploadError::Empty);
    }
    if data.len() > limits.max_upload_bytes {
        return Err(UploadError::TooLarge {
            size: data.len(),
            max: limits.max_upload_bytes,
        });
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or(UploadError::MissingExtension)?;
    let claimed = from_extension(extension)
        .ok_or_else(|| UploadError::UnsupportedExtension(extension.to_lowercase()))?;

    // Sniff magic bytes, never trust the name alone
    let detected = image::guess_format(data).map_err(|_| UploadError::UnrecognizedContent)?;
    let detected_mime = mime_type(detected).ok_or(UploadError::UnrecognizedContent)?;
    if detected != claimed {
        return Err(UploadError::ContentMismatch {
            extension: extension.to_lowercase(),
            detected: detected_mime,
        });
    }

    let (width, height) = image::ImageReader::with_format(Cursor::new(data), detected)
        .into_dimensions()
        .map_err(|e| UploadError::Unreadable(e.to_string()))?;

    Ok(UploadInfo {
        mime_type: detected_mime,
        extension: canonical_extension(detected),
        width,
        height,
        size: data.len(),
    })
}
