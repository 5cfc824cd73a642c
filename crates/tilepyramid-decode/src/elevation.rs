//! Raw elevation raster decoding.
//!
//! Elevation tiles are stored as headerless band-interleaved rasters (BIL):
//! `width * height` little-endian samples, row 0 at the northern edge.

use crate::error::{DecodeError, DecodeResult};

/// Sample encoding of an elevation raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationEncoding {
    /// Signed 16-bit integers, little-endian.
    Int16,
    /// IEEE 754 single precision floats, little-endian.
    Float32,
}

impl ElevationEncoding {
    /// Bytes occupied by a single sample.
    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Float32 => 4,
        }
    }
}

/// A decoded elevation raster.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    width: u32,
    height: u32,
    /// Row-major samples, row 0 is the northern edge.
    samples: Vec<f32>,
    /// Value marking "no data" in the source raster.
    missing_value: Option<f32>,
}

impl ElevationGrid {
    /// Create a grid from row-major samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample count does not match the dimensions.
    pub fn new(
        width: u32,
        height: u32,
        samples: Vec<f32>,
        missing_value: Option<f32>,
    ) -> DecodeResult<Self> {
        let expected = (width as usize) * (height as usize);
        if width < 2 || height < 2 {
            return Err(DecodeError::InvalidFormat {
                context: "elevation",
                detail: format!("raster must be at least 2x2, got {width}x{height}"),
            });
        }
        if samples.len() != expected {
            return Err(DecodeError::InvalidFormat {
                context: "elevation",
                detail: format!("expected {expected} samples, got {}", samples.len()),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
            missing_value,
        })
    }

    /// Raster width in samples.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Raster height in samples.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw row-major samples.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Apply `f` to every sample that is not the missing-data value.
    pub fn map_samples(&mut self, f: impl Fn(f32) -> f32) {
        let missing = self.missing_value;
        for sample in &mut self.samples {
            if Some(*sample) != missing {
                *sample = f(*sample);
            }
        }
    }

    /// Approximate heap size of the grid.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }

    /// Sample at integer raster coordinates, `None` for missing data.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let value = self.samples[(y as usize) * (self.width as usize) + x as usize];
        if Some(value) == self.missing_value || value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    /// Bilinearly interpolated elevation.
    ///
    /// `s` runs west to east and `t` south to north, both in `[0, 1]` across
    /// the tile. Cells with a missing corner fall back to the nearest
    /// present corner.
    #[must_use]
    pub fn sample(&self, s: f64, t: f64) -> Option<f64> {
        let s = s.clamp(0.0, 1.0);
        let t = t.clamp(0.0, 1.0);

        let fx = s * f64::from(self.width - 1);
        // Row 0 is the northern edge.
        let fy = (1.0 - t) * f64::from(self.height - 1);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let x0 = (fx.floor() as u32).min(self.width - 2);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let y0 = (fy.floor() as u32).min(self.height - 2);
        let dx = fx - f64::from(x0);
        let dy = fy - f64::from(y0);

        let corners = [
            (self.get(x0, y0), (1.0 - dx) * (1.0 - dy)),
            (self.get(x0 + 1, y0), dx * (1.0 - dy)),
            (self.get(x0, y0 + 1), (1.0 - dx) * dy),
            (self.get(x0 + 1, y0 + 1), dx * dy),
        ];

        if corners.iter().all(|(v, _)| v.is_some()) {
            return Some(
                corners
                    .iter()
                    .map(|(v, w)| f64::from(v.unwrap_or_default()) * w)
                    .sum(),
            );
        }

        corners
            .iter()
            .filter_map(|(v, w)| v.map(|v| (v, *w)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(v, _)| f64::from(v))
    }

    /// Minimum and maximum present sample, `None` if every sample is missing.
    #[must_use]
    pub fn extremes(&self) -> Option<(f32, f32)> {
        self.samples
            .iter()
            .copied()
            .filter(|v| Some(*v) != self.missing_value && !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Decode a headerless elevation raster.
///
/// # Errors
///
/// Returns an error if the buffer does not hold exactly `width * height`
/// samples of the given encoding.
pub fn decode_elevation(
    data: &[u8],
    width: u32,
    height: u32,
    encoding: ElevationEncoding,
    missing_value: Option<f32>,
) -> DecodeResult<ElevationGrid> {
    let count = (width as usize) * (height as usize);
    let expected = count * encoding.bytes_per_sample();
    if data.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }
    if data.len() != expected {
        return Err(DecodeError::InvalidFormat {
            context: "elevation",
            detail: format!("expected {expected} bytes, got {}", data.len()),
        });
    }

    let samples: Vec<f32> = match encoding {
        ElevationEncoding::Int16 => data
            .chunks_exact(2)
            .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])))
            .collect(),
        ElevationEncoding::Float32 => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    };

    ElevationGrid::new(width, height, samples, missing_value)
}
