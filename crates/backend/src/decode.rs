//! Response envelope validation and image decoding.
//!
//! Backends answer with `{"images": ["<base64>", ...], ...}`. Only the
//! first image is decoded; auxiliary images (masks, control maps) that
//! some servers append are ignored.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;

use crate::error::RenderError;

#[derive(Debug, Deserialize)]
struct RenderEnvelope {
    images: Vec<String>,
}

/// A decoded render result.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Container format sniffed from the payload, if recognised.
    pub format: Option<ImageFormat>,
    /// Encoded bytes exactly as returned by the backend.
    pub bytes: Vec<u8>,
    pub image: DynamicImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Validate the JSON envelope and return the first base64 image string.
pub fn first_image(body: &str) -> Result<String, RenderError> {
    let envelope: RenderEnvelope = serde_json::from_str(body)
        .map_err(|e| RenderError::Decode(format!("Malformed response envelope: {e}")))?;

    envelope
        .images
        .into_iter()
        .next()
        .ok_or(RenderError::EmptyResult)
}

/// Decode one base64 image payload. Accepts bare base64 or a
/// `data:image/...;base64,` URI.
pub fn decode_image(payload: &str) -> Result<DecodedImage, RenderError> {
    let encoded = match payload.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };

    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| RenderError::Decode(format!("Invalid base64 image payload: {e}")))?;

    let format = image::guess_format(&bytes).ok();
    let image = image::load_from_memory(&bytes)
        .map_err(|e| RenderError::Decode(format!("Unreadable image data: {e}")))?;

    Ok(DecodedImage {
        format,
        bytes,
        image,
    })
}
