use std::env;

use crate::collage_generator::{CollageFormat, DEFAULT_CELL_SIZE};

/// Business limits enforced by the validators before anything is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_albums_per_user: i64,
    pub max_photos_per_album: i64,
    pub max_upload_bytes: usize,
    pub min_photos_to_publish: i64,
    pub page_size: usize,
    /// Largest collage cell a request may ask for, in pixels.
    pub max_collage_cell_size: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_albums_per_user: 20,
            max_photos_per_album: 100,
            max_upload_bytes: 10 * 1024 * 1024,
            min_photos_to_publish: 3,
            page_size: 4,
            max_collage_cell_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollageConfig {
    pub cell_size: u32,
    pub format: CollageFormat,
}

impl Default for CollageConfig {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            format: CollageFormat::Jpeg,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub db_path: String,
    pub media_path: String,
    pub collage: CollageConfig,
    pub limits: Limits,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let max_upload_mb: usize = env::var("PIX_ALBUM_MAX_UPLOAD_MB")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let max_upload_bytes = upload_limit_bytes(max_upload_mb)?;

        Ok(Config {
            port: env::var("PIX_ALBUM_PORT")
                .unwrap_or_else(|_| "18480".to_string())
                .parse()?,
            host: env::var("PIX_ALBUM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            db_path: env::var("PIX_ALBUM_DB_PATH")
                .unwrap_or_else(|_| "./data/database/pix-album.db".to_string()),
            media_path: env::var("PIX_ALBUM_MEDIA_PATH")
                .unwrap_or_else(|_| "./data/media".to_string()),
            collage: CollageConfig {
                cell_size: env::var("PIX_ALBUM_COLLAGE_CELL_SIZE")
                    .unwrap_or_else(|_| DEFAULT_CELL_SIZE.to_string())
                    .parse()?,
                format: env::var("PIX_ALBUM_COLLAGE_FORMAT")
                    .unwrap_or_else(|_| "jpeg".to_string())
                    .parse()?,
            },
            limits: Limits {
                max_albums_per_user: env::var("PIX_ALBUM_MAX_ALBUMS_PER_USER")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
                max_photos_per_album: env::var("PIX_ALBUM_MAX_PHOTOS_PER_ALBUM")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                max_upload_bytes,
                min_photos_to_publish: env::var("PIX_ALBUM_MIN_PHOTOS_TO_PUBLISH")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                page_size: env::var("PIX_ALBUM_PAGE_SIZE")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()?,
                max_collage_cell_size: env::var("PIX_ALBUM_MAX_COLLAGE_CELL_SIZE")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
            },
        })
    }

    /// Config pointing at a scratch directory, used by tests.
    pub fn for_data_dir(data_dir: &std::path::Path) -> Self {
        Config {
            port: 18480,
            host: "127.0.0.1".to_string(),
            db_path: data_dir
                .join("database/pix-album.db")
                .to_string_lossy()
                .to_string(),
            media_path: data_dir.join("media").to_string_lossy().to_string(),
            collage: CollageConfig::default(),
            limits: Limits::default(),
        }
    }
}

/// Converts the configured upload limit from MiB to bytes.
fn upload_limit_bytes(megabytes: usize) -> Result<usize, Box<dyn std::error::Error>> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or_else(|| format!("PIX_ALBUM_MAX_UPLOAD_MB is too large: {}", megabytes).into())
}
