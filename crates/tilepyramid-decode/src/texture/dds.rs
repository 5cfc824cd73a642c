//! DirectDraw Surface (DDS) texture decoding.
//!
//! Tile caches commonly store imagery as DXT-compressed DDS files so it can be
//! uploaded without recompression. This module decodes the top mip level to
//! RGBA pixels.

use crate::{
    error::{DecodeError, DecodeResult},
    texture::DecodedImage,
};

/// Magic (4 bytes) plus the fixed 124-byte header.
const HEADER_LEN: usize = 128;
const HEIGHT_OFFSET: usize = 12;
const WIDTH_OFFSET: usize = 16;
const FOURCC_OFFSET: usize = 84;

/// Block compression scheme named by the pixel format FourCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Dxt1,
    Dxt3,
    Dxt5,
}

impl Compression {
    fn block_bytes(self) -> usize {
        match self {
            Self::Dxt1 => 8,
            Self::Dxt3 | Self::Dxt5 => 16,
        }
    }
}

/// Decode a DDS file to RGBA pixels.
///
/// Only the first (largest) mip level is decoded.
///
/// # Errors
///
/// Returns an error if the header is malformed, the FourCC is not DXT1/3/5,
/// or the block data is truncated.
pub fn decode_dds_to_rgba(data: &[u8]) -> DecodeResult<DecodedImage> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::BufferTooSmall {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    if &data[..4] != b"DDS " {
        return Err(DecodeError::InvalidFormat {
            context: "dds",
            detail: "missing DDS magic".to_string(),
        });
    }

    let height = read_u32(data, HEIGHT_OFFSET);
    let width = read_u32(data, WIDTH_OFFSET);
    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidFormat {
            context: "dds",
            detail: format!("invalid dimensions {width}x{height}"),
        });
    }

    let compression = match &data[FOURCC_OFFSET..FOURCC_OFFSET + 4] {
        b"DXT1" => Compression::Dxt1,
        b"DXT3" => Compression::Dxt3,
        b"DXT5" => Compression::Dxt5,
        other => {
            return Err(DecodeError::Unsupported {
                context: "dds pixel format",
                detail: String::from_utf8_lossy(other).into_owned(),
            });
        }
    };

    let blocks_wide = (width as usize).div_ceil(4);
    let blocks_high = (height as usize).div_ceil(4);
    let expected = HEADER_LEN + blocks_wide * blocks_high * compression.block_bytes();
    if data.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }

    let blocks = &data[HEADER_LEN..expected];
    let mut pixels = vec![0u32; (width as usize) * (height as usize)];
    let decoded = match compression {
        Compression::Dxt1 => {
            texture2ddecoder::decode_bc1(blocks, width as usize, height as usize, &mut pixels)
        }
        Compression::Dxt3 => {
            texture2ddecoder::decode_bc2(blocks, width as usize, height as usize, &mut pixels)
        }
        Compression::Dxt5 => {
            texture2ddecoder::decode_bc3(blocks, width as usize, height as usize, &mut pixels)
        }
    };
    decoded.map_err(|e| DecodeError::InvalidFormat {
        context: "dds",
        detail: format!("failed to decode blocks: {e}"),
    })?;

    Ok(DecodedImage::new(bgra_u32_to_rgba_bytes(pixels), width, height))
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Convert packed BGRA u32 values to RGBA byte array.
fn bgra_u32_to_rgba_bytes(data: Vec<u32>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for pixel in data {
        // texture2ddecoder outputs 0xAARRGGBB; little-endian bytes are [B, G, R, A].
        let [b, g, r, a] = pixel.to_le_bytes();
        bytes.extend_from_slice(&[r, g, b, a]);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dds_header(width: u32, height: u32, fourcc: &[u8; 4]) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_LEN];
        header[..4].copy_from_slice(b"DDS ");
        header[4..8].copy_from_slice(&124u32.to_le_bytes());
        header[HEIGHT_OFFSET..HEIGHT_OFFSET + 4].copy_from_slice(&height.to_le_bytes());
        header[WIDTH_OFFSET..WIDTH_OFFSET + 4].copy_from_slice(&width.to_le_bytes());
        header[FOURCC_OFFSET..FOURCC_OFFSET + 4].copy_from_slice(fourcc);
        header
    }

    #[test]
    fn test_decode_dxt1_solid_red() {
        let mut data = dds_header(4, 4, b"DXT1");
        // color0 = color1 = pure red in RGB565, all indices 0.
        data.extend_from_slice(&0xF800u16.to_le_bytes());
        data.extend_from_slice(&0xF800u16.to_le_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]);

        let image = decode_dds_to_rgba(&data).unwrap();
        assert_eq!((image.width, image.height), (4, 4));
        assert!(image.is_valid());
        assert_eq!(image.data[0], 255);
        assert_eq!(image.data[2], 0);
    }

    #[test]
    fn test_decode_truncated_blocks() {
        let mut data = dds_header(8, 8, b"DXT5");
        data.extend_from_slice(&[0; 16]);
        let result = decode_dds_to_rgba(&data);
        assert!(matches!(result, Err(DecodeError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_decode_unsupported_fourcc() {
        let data = dds_header(4, 4, b"ATI2");
        let result = decode_dds_to_rgba(&data);
        assert!(matches!(result, Err(DecodeError::Unsupported { .. })));
    }

    #[test]
    fn test_decode_missing_magic() {
        let mut data = dds_header(4, 4, b"DXT1");
        data[0] = b'X';
        let result = decode_dds_to_rgba(&data);
        assert!(matches!(result, Err(DecodeError::InvalidFormat { .. })));
    }

    #[test]
    fn test_bgra_u32_to_rgba_bytes() {
        let bytes = bgra_u32_to_rgba_bytes(vec![0x1122_3344]);
        assert_eq!(bytes, vec![0x22, 0x33, 0x44, 0x11]);
    }
}
