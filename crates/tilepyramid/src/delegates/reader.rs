//! Payload readers: bytes in, decoded tile payload out.

use crate::{
    config::{ElevationSourceConfig, PayloadKind, TileSourceConfig},
    error::{Error, Result},
    memory::TilePayload,
};
use std::{fmt, sync::Arc};
use tilepyramid_decode::{
    DecodeError, DecodeResult, ImageFormat, decode_elevation, texture,
};

/// Per-source decoding parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadContext {
    /// Expected payload.
    pub payload: PayloadKind,
    /// Image format implied by the cache suffix, if recognised.
    pub image_format: Option<ImageFormat>,
    /// Tile width in texels.
    pub tile_width: u32,
    /// Tile height in texels.
    pub tile_height: u32,
    /// Elevation settings.
    pub elevation: ElevationSourceConfig,
}

impl ReadContext {
    /// Decoding parameters of a tile source.
    #[must_use]
    pub fn from_config(config: &TileSourceConfig) -> Self {
        Self {
            payload: config.payload,
            image_format: ImageFormat::from_suffix(&config.format_suffix),
            tile_width: config.tile_width,
            tile_height: config.tile_height,
            elevation: config.elevation,
        }
    }
}

/// Decodes payloads of a particular format.
pub trait PayloadReader: Send + Sync + fmt::Debug {
    /// Name the reader is configured by.
    fn name(&self) -> &'static str;

    /// Whether this reader handles `data`.
    fn claims(&self, ctx: &ReadContext, data: &[u8]) -> bool;

    /// Decode `data`.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the data is malformed.
    fn read(&self, ctx: &ReadContext, data: &[u8]) -> DecodeResult<TilePayload>;
}

/// Reads DXT-compressed DDS imagery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DdsReader;

impl PayloadReader for DdsReader {
    fn name(&self) -> &'static str {
        "dds"
    }

    fn claims(&self, ctx: &ReadContext, data: &[u8]) -> bool {
        ctx.payload == PayloadKind::Image
            && (ctx.image_format == Some(ImageFormat::Dds) || data.starts_with(b"DDS "))
    }

    fn read(&self, _ctx: &ReadContext, data: &[u8]) -> DecodeResult<TilePayload> {
        texture::decode_dds_to_rgba(data).map(TilePayload::Image)
    }
}

/// Reads headerless elevation rasters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BilReader;

impl PayloadReader for BilReader {
    fn name(&self) -> &'static str {
        "bil"
    }

    fn claims(&self, ctx: &ReadContext, _data: &[u8]) -> bool {
        ctx.payload == PayloadKind::Elevation
    }

    fn read(&self, ctx: &ReadContext, data: &[u8]) -> DecodeResult<TilePayload> {
        decode_elevation(
            data,
            ctx.tile_width,
            ctx.tile_height,
            ctx.elevation.encoding.into(),
            ctx.elevation.missing_value,
        )
        .map(TilePayload::Elevation)
    }
}

/// Decodes any image the `image` crate recognises.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericImageReader;

impl PayloadReader for GenericImageReader {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn claims(&self, ctx: &ReadContext, _data: &[u8]) -> bool {
        ctx.payload == PayloadKind::Image
    }

    fn read(&self, ctx: &ReadContext, data: &[u8]) -> DecodeResult<TilePayload> {
        if ctx.payload == PayloadKind::Elevation {
            return Err(DecodeError::Unsupported {
                context: "elevation",
                detail: "no elevation reader configured".to_string(),
            });
        }
        texture::decode_generic_to_rgba(data).map(TilePayload::Image)
    }
}

/// Specialty readers in configured order, then the generic decoder.
#[derive(Debug, Clone)]
pub struct ReaderChain {
    specialty: Vec<Arc<dyn PayloadReader>>,
    fallback: GenericImageReader,
}

impl ReaderChain {
    /// Create a chain from specialty readers.
    #[must_use]
    pub fn new(specialty: Vec<Arc<dyn PayloadReader>>) -> Self {
        Self {
            specialty,
            fallback: GenericImageReader,
        }
    }

    /// Decode with the first reader that claims the data.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the data is empty or malformed.
    pub fn read(&self, ctx: &ReadContext, data: &[u8]) -> DecodeResult<TilePayload> {
        if data.is_empty() {
            return Err(DecodeError::BufferTooSmall {
                expected: 1,
                actual: 0,
            });
        }
        match self.specialty.iter().find(|r| r.claims(ctx, data)) {
            Some(reader) => reader.read(ctx, data),
            None => self.fallback.read(ctx, data),
        }
    }
}

pub(crate) fn reader_by_name(name: &str) -> Result<Arc<dyn PayloadReader>> {
    match name {
        "dds" => Ok(Arc::new(DdsReader)),
        "bil" => Ok(Arc::new(BilReader)),
        other => Err(Error::config(format!("unknown reader {other:?}"))),
    }
}
