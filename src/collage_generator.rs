//! Collage compositor.
//!
//! Lays out an ordered list of encoded photos on a near-square grid and
//! rasterizes them into one image. Each photo becomes one `cell_size` square
//! cell, placed row-major in input order. Photos that cannot be decoded are
//! skipped; an input without a single usable photo yields `Ok(None)`.

use chrono::{DateTime, Utc};
use image::imageops::{self, FilterType};
use image::{
    DynamicImage, ImageBuffer, ImageFormat, Pixel, Rgb, RgbImage, Rgba,
    RgbaImage,
};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use crate::db::{DbPool, Photo};
use crate::media_store::{collage_key, MediaStore, StoreError};
use crate::share_tokens::unique_id;

pub const DEFAULT_CELL_SIZE: u32 = 300;

/// Upper bound on canvas area, in pixels.
pub const MAX_CANVAS_PIXELS: u64 = 200_000_000;

/// Raster formats a collage can be encoded in.
///
/// JPEG collages are composed on an RGB canvas, PNG collages on an RGBA canvas.
/// Both use an opaque white background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollageFormat {
    #[default]
    Jpeg,
    Png,
}

impl CollageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollageFormat::Jpeg => "jpeg",
            CollageFormat::Png => "png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CollageFormat::Jpeg => "jpg",
            CollageFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            CollageFormat::Jpeg => "image/jpeg",
            CollageFormat::Png => "image/png",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            CollageFormat::Jpeg => ImageFormat::Jpeg,
            CollageFormat::Png => ImageFormat::Png,
        }
    }

    pub fn suggested_filename(&self) -> String {
        format!("collage.{}", self.extension())
    }
}

impl FromStr for CollageFormat {
    type Err = CollageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(CollageFormat::Jpeg),
            "png" => Ok(CollageFormat::Png),
            other => Err(CollageError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for CollageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollageError {
    #[error("Cell size must be a positive number of pixels")]
    InvalidCellSize,
    #[error("Collage canvas {columns}x{rows} cells of {cell_size}px exceeds the maximum image size")]
    CanvasTooLarge {
        columns: usize,
        rows: usize,
        cell_size: u32,
    },
    #[error("Unsupported collage format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to encode collage: {0}")]
    Encode(#[from] image::ImageError),
}

/// Grid dimensions for a given number of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridLayout {
    pub columns: usize,
    pub rows: usize,
}

impl GridLayout {
    /// `columns = ceil(sqrt(count))`, `rows = ceil(count / columns)`.
    pub fn for_count(count: usize) -> Option<Self> {
        if count == 0 {
            return None;
        }

        let columns = ceil_sqrt(count);
        let rows = count.div_ceil(columns);

        Some(GridLayout { columns, rows })
    }

    /// Column and row of the `index`-th cell in row-major order.
    pub fn cell_position(&self, index: usize) -> (usize, usize) {
        (index % self.columns, index / self.columns)
    }

    /// Canvas dimensions in pixels, `None` when they exceed `MAX_CANVAS_PIXELS`.
    pub fn canvas_size(&self, cell_size: u32) -> Option<(u32, u32)> {
        let columns = u32::try_from(self.columns).ok()?;
        let rows = u32::try_from(self.rows).ok()?;
        let width = columns.checked_mul(cell_size)?;
        let height = rows.checked_mul(cell_size)?;
        if width as u64 * height as u64 > MAX_CANVAS_PIXELS {
            return None;
        }
        Some((width, height))
    }
}

fn ceil_sqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root * root < n {
        root += 1;
    }
    while root > 1 && (root - 1) * (root - 1) >= n {
        root -= 1;
    }
    root
}

/// Encoded collage plus everything a caller needs to persist it.
#[derive(Debug, Clone)]
pub struct CollageOutput {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub format: CollageFormat,
    pub layout: GridLayout,
    pub width: u32,
    pub height: u32,
    pub placed: usize,
    pub skipped: usize,
}

/// Decodes one photo and turns it into a `cell_size` square.
///
/// Large images are first scaled down to fit the cell (aspect preserved, never
/// enlarged), then stretched to the exact cell dimensions.
fn prepare_cell(data: &[u8], cell_size: u32) -> Result<DynamicImage, image::ImageError> {
    let img = image::load_from_memory(data)?;

    let img = if img.width() > cell_size || img.height() > cell_size {
        img.thumbnail(cell_size, cell_size)
    } else {
        img
    };

    Ok(img.resize_exact(cell_size, cell_size, FilterType::Lanczos3))
}

fn paste_cells<P, F>(
    canvas: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    cells: &[DynamicImage],
    layout: GridLayout,
    cell_size: u32,
    convert: F,
) where
    P: Pixel,
    F: Fn(&DynamicImage) -> ImageBuffer<P, Vec<P::Subpixel>>,
{
    for (index, cell) in cells.iter().enumerate() {
        let (column, row) = layout.cell_position(index);
        let x = column as i64 * cell_size as i64;
        let y = row as i64 * cell_size as i64;
        imageops::replace(canvas, &convert(cell), x, y);
    }
}

fn encode(img: DynamicImage, format: CollageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format.image_format())?;
    Ok(buffer.into_inner())
}

/// Composes `photos` into a single grid image.
///
/// Returns `Ok(None)` when there is nothing to composite (empty input or no
/// decodable photo). Encoding failures and impossible canvas sizes are errors.
pub fn generate_collage<P>(
    photos: &[P],
    cell_size: u32,
    format: CollageFormat,
) -> Result<Option<CollageOutput>, CollageError>
where
    P: AsRef<[u8]> + Sync,
{
    if cell_size == 0 {
        return Err(CollageError::InvalidCellSize);
    }

    let Some(worst_case) = GridLayout::for_count(photos.len()) else {
        debug!("Collage requested without photos");
        return Ok(None);
    };

    // Reject before decoding; skipped photos only ever shrink the grid
    if worst_case.canvas_size(cell_size).is_none() {
        return Err(CollageError::CanvasTooLarge {
            columns: worst_case.columns,
            rows: worst_case.rows,
            cell_size,
        });
    }

    // Indexed parallel collect keeps input order
    let decoded: Vec<Option<DynamicImage>> = photos
        .par_iter()
        .enumerate()
        .map(|(index, photo)| match prepare_cell(photo.as_ref(), cell_size) {
            Ok(cell) => Some(cell),
            Err(e) => {
                warn!("Skipping photo #{} in collage: {}", index, e);
                None
            }
        })
        .collect();

    let cells: Vec<DynamicImage> = decoded.into_iter().flatten().collect();
    let skipped = photos.len() - cells.len();

    let Some(layout) = GridLayout::for_count(cells.len()) else {
        info!(
            "No usable photos for collage ({} of {} failed to decode)",
            skipped,
            photos.len()
        );
        return Ok(None);
    };

    let (width, height) = layout
        .canvas_size(cell_size)
        .ok_or(CollageError::CanvasTooLarge {
            columns: layout.columns,
            rows: layout.rows,
            cell_size,
        })?;

    let canvas = match format {
        CollageFormat::Jpeg => {
            let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
            paste_cells(&mut canvas, &cells, layout, cell_size, |cell| cell.to_rgb8());
            DynamicImage::ImageRgb8(canvas)
        }
        CollageFormat::Png => {
            let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
            paste_cells(&mut canvas, &cells, layout, cell_size, |cell| cell.to_rgba8());
            DynamicImage::ImageRgba8(canvas)
        }
    };

    let bytes = encode(canvas, format)?;

    debug!(
        "Collage composed: {}x{} grid, {}x{}px, {} placed, {} skipped",
        layout.columns,
        layout.rows,
        width,
        height,
        cells.len(),
        skipped
    );

    Ok(Some(CollageOutput {
        bytes,
        filename: format.suggested_filename(),
        format,
        layout,
        width,
        height,
        placed: cells.len(),
        skipped,
    }))
}

/// Persisted collage generated for an album. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collage {
    pub id: i64,
    pub album_id: i64,
    pub storage_key: String,
    pub format: String,
    pub photo_count: i64,
    pub skipped_count: i64,
    pub width: i64,
    pub height: i64,
    pub created_at: DateTime<Utc>,
}

impl Collage {
    pub fn content_type(&self) -> &'static str {
        self.format
            .parse::<CollageFormat>()
            .map(|f| f.content_type())
            .unwrap_or("application/octet-stream")
    }

    pub async fn insert(
        pool: &DbPool,
        album_id: i64,
        storage_key: &str,
        output: &CollageOutput,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Collage>(
            "INSERT INTO collages
                (album_id, storage_key, format, photo_count, skipped_count, width, height, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(album_id)
        .bind(storage_key)
        .bind(output.format.as_str())
        .bind(output.placed as i64)
        .bind(output.skipped as i64)
        .bind(output.width as i64)
        .bind(output.height as i64)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collage>("SELECT * FROM collages WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_album(pool: &DbPool, album_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collage>(
            "SELECT * FROM collages WHERE album_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(album_id)
        .fetch_all(pool)
        .await
    }

    pub async fn storage_keys_for_album(
        pool: &DbPool,
        album_id: i64,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT storage_key FROM collages WHERE album_id = ?")
            .bind(album_id)
            .fetch_all(pool)
            .await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollageJobError {
    #[error(transparent)]
    Collage(#[from] CollageError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Collage worker failed: {0}")]
    Worker(String),
}

/// Builds a collage from an album's photos (display order) and stores it.
///
/// Photos whose bytes cannot be loaded are skipped like undecodable ones.
/// Returns `Ok(None)` when the album has no usable photo.
pub async fn generate_album_collage(
    pool: &DbPool,
    store: &dyn MediaStore,
    album_id: i64,
    cell_size: u32,
    format: CollageFormat,
) -> Result<Option<Collage>, CollageJobError> {
    let photos = Photo::list_for_album(pool, album_id).await?;
    info!(
        "Generating collage for album {} ({} photos)",
        album_id,
        photos.len()
    );

    let mut sources = Vec::with_capacity(photos.len());
    let mut unreadable = 0usize;
    for photo in &photos {
        match store.load(&photo.storage_key).await {
            Ok(data) => sources.push(data),
            Err(e) => {
                warn!("Skipping photo {} in collage: {}", photo.id, e);
                unreadable += 1;
            }
        }
    }

    let output = tokio::task::spawn_blocking(move || generate_collage(&sources, cell_size, format))
        .await
        .map_err(|e| CollageJobError::Worker(e.to_string()))??;

    let Some(mut output) = output else {
        return Ok(None);
    };
    output.skipped += unreadable;

    // Every collage gets its own file; earlier ones stay untouched
    let key = collage_key(album_id, &format!("{}-{}", unique_id(), output.filename));
    store.save(&key, &output.bytes).await?;

    match Collage::insert(pool, album_id, &key, &output).await {
        Ok(collage) => {
            info!(
                "Created collage {} for album {} ({}x{})",
                collage.id, album_id, collage.width, collage.height
            );
            Ok(Some(collage))
        }
        Err(e) => {
            error!("Failed to insert collage into database: {}", e);
            if let Err(cleanup) = store.delete(&key).await {
                warn!("Failed to clean up collage file {}: {}", key, cleanup);
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_image(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, format)
            .unwrap();
        buffer.into_inner()
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        encoded_image(40, 30, color, ImageFormat::Png)
    }

    fn assert_color_near(actual: &[u8], expected: [u8; 3]) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!(
                (*a as i32 - *e as i32).abs() <= 2,
                "pixel {:?} not close to {:?}",
                actual,
                expected
            );
        }
    }

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLUE: [u8; 3] = [0, 0, 255];
    const BLACK: [u8; 3] = [0, 0, 0];
    const YELLOW: [u8; 3] = [255, 255, 0];
    const WHITE: [u8; 3] = [255, 255, 255];

    #[test]
    fn test_grid_layout_invariants() {
        for n in 1..=250usize {
            let layout = GridLayout::for_count(n).unwrap();
            let expected_columns = (n as f64).sqrt().ceil() as usize;
            assert_eq!(layout.columns, expected_columns, "columns for n={}", n);
            assert!(layout.columns * layout.rows >= n, "capacity for n={}", n);
            assert_eq!(layout.rows, n.div_ceil(layout.columns));
        }
    }

    #[test]
    fn test_grid_layout_examples() {
        assert_eq!(GridLayout::for_count(0), None);
        assert_eq!(
            GridLayout::for_count(1),
            Some(GridLayout { columns: 1, rows: 1 })
        );
        assert_eq!(
            GridLayout::for_count(4),
            Some(GridLayout { columns: 2, rows: 2 })
        );
        assert_eq!(
            GridLayout::for_count(5),
            Some(GridLayout { columns: 3, rows: 2 })
        );
        assert_eq!(
            GridLayout::for_count(10),
            Some(GridLayout { columns: 4, rows: 3 })
        );
    }

    #[test]
    fn test_cell_position_is_row_major() {
        let layout = GridLayout::for_count(5).unwrap();
        assert_eq!(layout.cell_position(0), (0, 0));
        assert_eq!(layout.cell_position(2), (2, 0));
        assert_eq!(layout.cell_position(3), (0, 1));
        assert_eq!(layout.cell_position(4), (1, 1));
    }

    #[test]
    fn test_single_photo_is_one_cell() {
        let output = generate_collage(&[png(RED)], 300, CollageFormat::Jpeg)
            .unwrap()
            .unwrap();

        assert_eq!((output.width, output.height), (300, 300));
        assert_eq!(output.filename, "collage.jpg");
        assert_eq!(output.placed, 1);
        assert_eq!(output.skipped, 0);
    }

    #[test]
    fn test_four_photos_make_two_by_two() {
        let photos = vec![png(RED), png(GREEN), png(BLUE), png(BLACK)];
        let output = generate_collage(&photos, 300, CollageFormat::Png)
            .unwrap()
            .unwrap();

        assert_eq!(output.layout, GridLayout { columns: 2, rows: 2 });
        assert_eq!((output.width, output.height), (600, 600));

        let decoded = image::load_from_memory(&output.bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (600, 600));
        assert_color_near(&decoded.get_pixel(150, 150).0, RED);
        assert_color_near(&decoded.get_pixel(450, 150).0, GREEN);
        assert_color_near(&decoded.get_pixel(150, 450).0, BLUE);
        assert_color_near(&decoded.get_pixel(450, 450).0, BLACK);
    }

    #[test]
    fn test_five_photos_leave_last_cell_blank() {
        let photos = vec![png(RED), png(GREEN), png(BLUE), png(BLACK), png(YELLOW)];
        let output = generate_collage(&photos, 300, CollageFormat::Png)
            .unwrap()
            .unwrap();

        assert_eq!(output.layout, GridLayout { columns: 3, rows: 2 });
        assert_eq!((output.width, output.height), (900, 600));

        let decoded = image::load_from_memory(&output.bytes).unwrap().to_rgba8();
        // Fifth photo: column 1, row 1
        assert_color_near(&decoded.get_pixel(450, 450).0[..3], YELLOW);
        // Sixth cell, column 2 row 1, is background
        let blank = decoded.get_pixel(750, 450).0;
        assert_eq!(blank, [255, 255, 255, 255]);
    }

    #[test]
    fn test_corrupt_photo_is_skipped() {
        let photos = vec![png(RED), b"definitely not an image".to_vec(), png(GREEN), png(BLUE)];
        let output = generate_collage(&photos, 100, CollageFormat::Png)
            .unwrap()
            .unwrap();

        assert_eq!(output.placed, 3);
        assert_eq!(output.skipped, 1);
        assert_eq!(output.layout, GridLayout { columns: 2, rows: 2 });
        assert_eq!((output.width, output.height), (200, 200));

        // Survivors keep their relative order
        let decoded = image::load_from_memory(&output.bytes).unwrap().to_rgb8();
        assert_color_near(&decoded.get_pixel(50, 50).0, RED);
        assert_color_near(&decoded.get_pixel(150, 50).0, GREEN);
        assert_color_near(&decoded.get_pixel(50, 150).0, BLUE);
        assert_color_near(&decoded.get_pixel(150, 150).0, WHITE);
    }

    #[test]
    fn test_no_usable_photos_is_no_result() {
        let empty: Vec<Vec<u8>> = Vec::new();
        assert!(generate_collage(&empty, 300, CollageFormat::Jpeg)
            .unwrap()
            .is_none());

        let corrupt = vec![b"garbage".to_vec(), Vec::new()];
        assert!(generate_collage(&corrupt, 300, CollageFormat::Jpeg)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_oversized_canvas_is_an_error() {
        let layout = GridLayout::for_count(4).unwrap();
        assert_eq!(layout.canvas_size(300), Some((600, 600)));
        assert_eq!(layout.canvas_size(u32::MAX), None);
        assert_eq!(layout.canvas_size(20_000), None);

        let result = generate_collage(&[png([1, 2, 3])], 50_000, CollageFormat::Png);
        assert!(matches!(result, Err(CollageError::CanvasTooLarge { .. })));
    }

    #[test]
    fn test_zero_cell_size_is_an_error() {
        let result = generate_collage(&[png(RED)], 0, CollageFormat::Jpeg);
        assert!(matches!(result, Err(CollageError::InvalidCellSize)));
    }

    #[test]
    fn test_placement_is_deterministic() {
        let photos: Vec<Vec<u8>> = (0..9u8)
            .map(|i| png([i * 25, 255 - i * 25, i * 10]))
            .collect();

        let first = generate_collage(&photos, 64, CollageFormat::Png)
            .unwrap()
            .unwrap();
        let second = generate_collage(&photos, 64, CollageFormat::Png)
            .unwrap()
            .unwrap();

        assert_eq!(first.bytes, second.bytes);

        let decoded = image::load_from_memory(&first.bytes).unwrap().to_rgb8();
        for i in 0..9u32 {
            let x = (i % 3) * 64 + 32;
            let y = (i / 3) * 64 + 32;
            let i = i as u8;
            assert_color_near(&decoded.get_pixel(x, y).0, [i * 25, 255 - i * 25, i * 10]);
        }
    }

    #[test]
    fn test_large_and_small_sources_fill_cells() {
        let photos = vec![
            encoded_image(1200, 400, RED, ImageFormat::Png),
            encoded_image(8, 20, GREEN, ImageFormat::Png),
        ];
        let output = generate_collage(&photos, 120, CollageFormat::Png)
            .unwrap()
            .unwrap();

        let decoded = image::load_from_memory(&output.bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (240, 120));
        // Stretched to the full cell, corners included
        assert_color_near(&decoded.get_pixel(2, 2).0, RED);
        assert_color_near(&decoded.get_pixel(117, 117).0, RED);
        assert_color_near(&decoded.get_pixel(122, 2).0, GREEN);
        assert_color_near(&decoded.get_pixel(237, 117).0, GREEN);
    }

    #[test]
    fn test_jpeg_output_decodes_to_canvas_size() {
        let photos = vec![
            encoded_image(50, 50, RED, ImageFormat::Jpeg),
            png(GREEN),
            png(BLUE),
        ];
        let output = generate_collage(&photos, 80, CollageFormat::Jpeg)
            .unwrap()
            .unwrap();

        assert_eq!(
            image::guess_format(&output.bytes).unwrap(),
            ImageFormat::Jpeg
        );
        let decoded = image::load_from_memory(&output.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 160));
    }

    #[test]
    fn test_png_output_decodes_to_canvas_size() {
        let photos = vec![png(RED), png(GREEN)];
        let output = generate_collage(&photos, 50, CollageFormat::Png)
            .unwrap()
            .unwrap();

        assert_eq!(output.filename, "collage.png");
        assert_eq!(image::guess_format(&output.bytes).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&output.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn test_collage_format_parsing() {
        assert_eq!("jpeg".parse::<CollageFormat>().unwrap(), CollageFormat::Jpeg);
        assert_eq!("JPG".parse::<CollageFormat>().unwrap(), CollageFormat::Jpeg);
        assert_eq!("png".parse::<CollageFormat>().unwrap(), CollageFormat::Png);
        assert!(matches!(
            "gif".parse::<CollageFormat>(),
            Err(CollageError::UnsupportedFormat(_))
        ));
        assert_eq!(CollageFormat::Png.to_string(), "png");
        assert_eq!(CollageFormat::Jpeg.content_type(), "image/jpeg");
    }
}
