//! Post-decode payload transformers.

use crate::{
    error::{Error, Result},
    memory::TilePayload,
};
use std::{fmt, sync::Arc};

/// Rewrites a decoded payload.
pub trait Transformer: Send + Sync + fmt::Debug {
    /// Name the transformer is configured by.
    fn name(&self) -> &'static str;

    /// Transform `payload`. Payloads of a kind the transformer does not
    /// handle pass through unchanged.
    fn transform(&self, payload: TilePayload) -> TilePayload;
}

/// Converts imagery to grayscale.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl Transformer for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn transform(&self, payload: TilePayload) -> TilePayload {
        let TilePayload::Image(mut image) = payload else {
            return payload;
        };
        for pixel in image.data.chunks_exact_mut(4) {
            let luma = 0.299 * f32::from(pixel[0])
                + 0.587 * f32::from(pixel[1])
                + 0.114 * f32::from(pixel[2]);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let luma = luma.round().clamp(0.0, 255.0) as u8;
            pixel[..3].fill(luma);
        }
        TilePayload::Image(image)
    }
}

/// Inverts imagery colors, keeping alpha.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invert;

impl Transformer for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn transform(&self, payload: TilePayload) -> TilePayload {
        let TilePayload::Image(mut image) = payload else {
            return payload;
        };
        for pixel in image.data.chunks_exact_mut(4) {
            for channel in &mut pixel[..3] {
                *channel = 255 - *channel;
            }
        }
        TilePayload::Image(image)
    }
}

/// Multiplies elevation samples by a factor; missing samples are kept.
#[derive(Debug, Clone, Copy)]
pub struct ElevationScale {
    factor: f32,
}

impl ElevationScale {
    /// Scale elevations by `factor`.
    #[must_use]
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl Transformer for ElevationScale {
    fn name(&self) -> &'static str {
        "elevation-scale"
    }

    fn transform(&self, payload: TilePayload) -> TilePayload {
        let TilePayload::Elevation(mut grid) = payload else {
            return payload;
        };
        let factor = self.factor;
        grid.map_samples(|v| v * factor);
        TilePayload::Elevation(grid)
    }
}

pub(crate) fn transformer_by_name(name: &str) -> Result<Arc<dyn Transformer>> {
    match name.split_once(':') {
        None if name == "grayscale" => Ok(Arc::new(Grayscale)),
        None if name == "invert" => Ok(Arc::new(Invert)),
        Some(("elevation-scale", factor)) => {
            let factor: f32 = factor
                .parse()
                .map_err(|_| Error::config(format!("invalid elevation scale {factor:?}")))?;
            if !factor.is_finite() {
                return Err(Error::config(format!("invalid elevation scale {factor}")));
            }
            Ok(Arc::new(ElevationScale::new(factor)))
        }
        _ => Err(Error::config(format!("unknown transformer {name:?}"))),
    }
}
