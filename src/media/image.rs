//! Image normalization
//!
//! Every embedded image is re-encoded to a bounded-size RGB JPEG so documents
//! stay a predictable size regardless of what the media host serves.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Longest edge of an embedded image, in pixels
pub const DEFAULT_MAX_DIMENSION: u32 = 800;

/// JPEG quality used for re-encoding
pub const JPEG_QUALITY: u8 = 85;

/// Content type of normalized images
pub const NORMALIZED_CONTENT_TYPE: &str = "image/jpeg";

/// Formats accepted from media hosts
const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

/// Image normalization errors. All are permanent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// Empty response body
    #[error("empty image body")]
    Empty,

    /// Bytes are not an image format we decode
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Recognized format but decoding failed
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// Re-encoding failed
    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// Decode, flatten onto white, fit within `max_dimension`, re-encode as JPEG
pub fn normalize_image(data: &[u8], max_dimension: u32) -> Result<Bytes, MediaError> {
    if data.is_empty() {
        return Err(MediaError::Empty);
    }

    let format = image::guess_format(data)
        .map_err(|e| MediaError::UnsupportedFormat(e.to_string()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(MediaError::UnsupportedFormat(format!("{format:?}")));
    }

    let decoded = image::load_from_memory_with_format(data, format)
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let max_dimension = max_dimension.max(1);
    let fitted = if decoded.width() > max_dimension || decoded.height() > max_dimension {
        decoded.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        decoded
    };

    let rgb = flatten_onto_white(&fitted);

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    Ok(Bytes::from(out))
}

/// Composite any alpha channel over a white background
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}
