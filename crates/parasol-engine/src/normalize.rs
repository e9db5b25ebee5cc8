use std::fs;
use std::path::Path;

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use parasol_contracts::encoded::EncodedImage;
use thiserror::Error;

pub const DEFAULT_MAX_SIDE: u32 = 1200;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("the file is not a recognized image kind")]
    InvalidInputKind,
    #[error("the image data could not be decoded")]
    DecodeError(#[source] image::ImageError),
    #[error("the normalized image could not be encoded")]
    EncodeFailed(#[source] image::ImageError),
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Longest output side; inputs already under the cap keep their size.
    pub max_side: u32,
    pub jpeg_quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Turn raw upload bytes into a transport-ready `EncodedImage`: transparency
/// flattened onto white, longest side bounded, fixed-quality JPEG payload.
pub fn normalize_image_bytes(
    bytes: &[u8],
    options: &NormalizeOptions,
) -> Result<EncodedImage, NormalizeError> {
    let format = image::guess_format(bytes).map_err(|_| NormalizeError::InvalidInputKind)?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(NormalizeError::DecodeError)?;

    let flattened = flatten_onto_white(&decoded);
    let bounded = bound_longest_side(flattened, options.max_side.max(1));

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, options.jpeg_quality);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(bounded))
        .map_err(NormalizeError::EncodeFailed)?;
    Ok(EncodedImage::from_bytes("image/jpeg", &out))
}

pub fn normalize_image_file(
    path: &Path,
    options: &NormalizeOptions,
) -> anyhow::Result<EncodedImage> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    normalize_image_bytes(&bytes, options)
        .with_context(|| format!("failed normalizing {}", path.display()))
}

/// The transport format carries no alpha channel, so semi-transparent
/// pixels are blended onto a white backdrop first.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }
    flattened
}

fn bound_longest_side(image: RgbImage, max_side: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= max_side {
        return image;
    }
    DynamicImage::ImageRgb8(image)
        .resize(max_side, max_side, FilterType::Triangle)
        .to_rgb8()
}
