//! Photo Editor Module
//!
//! Renders the stored brightness/contrast/saturation edit of a photo on top of
//! the original bytes. The original file is never modified; edits are applied
//! on the fly whenever the edited version is requested.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Pixel};
use serde::{Deserialize, Serialize};

pub const ADJUSTMENT_RANGE: std::ops::RangeInclusive<i32> = -100..=100;

/// Filter values, each in `-100..=100`. Zero means unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustments {
    #[serde(default)]
    pub brightness: i32,
    #[serde(default)]
    pub contrast: i32,
    #[serde(default)]
    pub saturation: i32,
}

impl Adjustments {
    pub fn is_identity(&self) -> bool {
        self.brightness == 0 && self.contrast == 0 && self.saturation == 0
    }

    /// Additive brightness offset, -255..=255.
    fn brightness_offset(&self) -> i32 {
        self.brightness * 255 / 100
    }

    /// Saturation multiplier around luminance, 0.0..=2.0.
    fn saturation_scale(&self) -> f32 {
        (self.saturation + 100) as f32 / 100.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("Adjustment out of range: {name} = {value} (allowed -100..=100)")]
    OutOfRange { name: &'static str, value: i32 },
    #[error("Failed to decode photo: {0}")]
    Decode(image::ImageError),
    #[error("Failed to encode edited photo: {0}")]
    Encode(image::ImageError),
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

impl RenderedImage {
    pub fn content_type(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "image/png",
            _ => "image/jpeg",
        }
    }
}

/// Applies `adjustments` to an encoded photo and re-encodes it.
///
/// PNG input stays PNG (alpha preserved); everything else is written as JPEG.
pub fn render_edit(data: &[u8], adjustments: &Adjustments) -> Result<RenderedImage, EditError> {
    for (name, value) in [
        ("brightness", adjustments.brightness),
        ("contrast", adjustments.contrast),
        ("saturation", adjustments.saturation),
    ] {
        if !ADJUSTMENT_RANGE.contains(&value) {
            return Err(EditError::OutOfRange { name, value });
        }
    }

    let source_format = image::guess_format(data).ok();
    let img = image::load_from_memory(data).map_err(EditError::Decode)?;

    let mut img = match source_format {
        Some(ImageFormat::Png) => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    };

    if adjustments.brightness != 0 {
        img = img.brighten(adjustments.brightness_offset());
    }
    if adjustments.contrast != 0 {
        img = img.adjust_contrast(adjustments.contrast as f32);
    }
    if adjustments.saturation != 0 {
        img = saturate(img, adjustments.saturation_scale());
    }

    let format = match source_format {
        Some(ImageFormat::Png) => ImageFormat::Png,
        _ => ImageFormat::Jpeg,
    };

    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format)
        .map_err(EditError::Encode)?;

    Ok(RenderedImage {
        bytes: buffer.into_inner(),
        format,
    })
}

/// Scales each pixel's distance from its luminance by `scale`.
pub fn saturate(img: DynamicImage, scale: f32) -> DynamicImage {
    let adjust = |channels: &mut [u8]| {
        let (r, g, b) = (channels[0] as f32, channels[1] as f32, channels[2] as f32);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        for c in channels.iter_mut().take(3) {
            *c = (luma + (*c as f32 - luma) * scale).round().clamp(0.0, 255.0) as u8;
        }
    };

    match img {
        DynamicImage::ImageRgba8(mut buffer) => {
            buffer
                .pixels_mut()
                .for_each(|p| adjust(p.channels_mut()));
            DynamicImage::ImageRgba8(buffer)
        }
        other => {
            let mut buffer = other.to_rgb8();
            buffer
                .pixels_mut()
                .for_each(|p| adjust(p.channels_mut()));
            DynamicImage::ImageRgb8(buffer)
        }
    }
}
