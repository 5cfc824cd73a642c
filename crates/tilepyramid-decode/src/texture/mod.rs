//! Imagery decoding for tile payloads.
//!
//! This module provides decompression for the formats tile servers and disk
//! caches typically hold:
//! - DDS: DXT1/DXT3/DXT5 block-compressed textures
//! - JPEG and PNG: decoded by the generic `image` decoder
//!
//! All formats produce RGBA pixel data suitable for GPU upload.

mod dds;
mod generic;

pub use dds::decode_dds_to_rgba;
pub use generic::decode_generic_to_rgba;

use crate::error::{DecodeError, DecodeResult};

/// Image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// JPEG-compressed RGB data.
    Jpeg,
    /// PNG data.
    Png,
    /// DirectDraw Surface with block-compressed payload.
    Dds,
}

impl ImageFormat {
    /// Map a cache file suffix (with or without the dot) to a format.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "dds" => Some(Self::Dds),
            _ => None,
        }
    }
}

/// Decoded image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// RGBA pixel data (4 bytes per pixel), row 0 at the top.
    pub data: Vec<u8>,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

impl DecodedImage {
    /// Create a new decoded image.
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Check if the pixel buffer matches the dimensions.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize) * 4
    }

    /// Heap size of the pixel buffer.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Decode an image in a known format to RGBA.
///
/// # Errors
///
/// Returns an error if decoding fails.
pub fn decode_image(data: &[u8], format: ImageFormat) -> DecodeResult<DecodedImage> {
    match format {
        ImageFormat::Dds => decode_dds_to_rgba(data),
        ImageFormat::Jpeg | ImageFormat::Png => decode_generic_to_rgba(data),
    }
}

/// Detect image format from the data signature.
///
/// # Errors
///
/// Returns an error if the buffer is too small or the signature is unknown.
pub fn detect_format(data: &[u8]) -> DecodeResult<ImageFormat> {
    if data.len() < 4 {
        return Err(DecodeError::BufferTooSmall {
            expected: 4,
            actual: data.len(),
        });
    }

    if data[0] == 0xFF && data[1] == 0xD8 {
        return Ok(ImageFormat::Jpeg);
    }
    if data[..4] == [0x89, b'P', b'N', b'G'] {
        return Ok(ImageFormat::Png);
    }
    if &data[..4] == b"DDS " {
        return Ok(ImageFormat::Dds);
    }

    Err(DecodeError::InvalidFormat {
        context: "image",
        detail: "unknown image format signature".to_string(),
    })
}
