//! Signature image processing.
//!
//! Signatures arrive as PNG data URIs drawn on a white pad. Before
//! placement the white background is erased to transparency with a pixel
//! scan; export later splits the result into RGB + alpha planes for PDF
//! embedding.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

use crate::error::{FillError, Result};

/// Options for signature background removal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignatureOptions {
    /// A pixel with all channels above this value is erased to
    /// transparent. Tied to the pad's ink/background contrast, so it is
    /// a tunable threshold rather than a fixed constant.
    pub whiteness_threshold: u8,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            whiteness_threshold: 250,
        }
    }
}

/// A decoded signature split into the planes PDF embedding needs.
#[derive(Debug, Clone)]
pub(crate) struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Interleaved 8-bit RGB samples.
    pub rgb: Vec<u8>,
    /// 8-bit alpha plane, used as the image's soft mask.
    pub alpha: Vec<u8>,
}

/// Strips the `data:<mime>;base64,` prefix (when present) and decodes.
pub(crate) fn decode_data_uri(data: &str) -> Result<Vec<u8>> {
    let payload = match data.find(',') {
        Some(pos) if data.starts_with("data:") => &data[pos + 1..],
        _ => data,
    };
    B64.decode(payload.trim())
        .map_err(|e| FillError::Signature(format!("base64 decode failed: {e}")))
}

/// Makes near-white background pixels transparent and returns the
/// result as a PNG data URI.
pub fn prepare_signature(data_uri: &str, options: &SignatureOptions) -> Result<String> {
    let bytes = decode_data_uri(data_uri)?;
    let mut img = image::load_from_memory(&bytes)
        .map_err(|e| FillError::Signature(format!("image decode failed: {e}")))?
        .to_rgba8();

    let t = options.whiteness_threshold;
    for pixel in img.pixels_mut() {
        if pixel[0] > t && pixel[1] > t && pixel[2] > t {
            pixel[3] = 0;
        }
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| FillError::Signature(format!("png encode failed: {e}")))?;
    Ok(format!("data:image/png;base64,{}", B64.encode(&out)))
}

/// Decodes a stored signature into RGB and alpha planes for embedding.
pub(crate) fn decode_for_embedding(data_uri: &str) -> Result<DecodedImage> {
    let bytes = decode_data_uri(data_uri)?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| FillError::Signature(format!("image decode failed: {e}")))?
        .to_rgba8();
    let (width, height) = img.dimensions();

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in img.pixels() {
        rgb.push(pixel[0]);
        rgb.push(pixel[1]);
        rgb.push(pixel[2]);
        alpha.push(pixel[3]);
    }

    Ok(DecodedImage {
        width,
        height,
        rgb,
        alpha,
    })
}
