//! Serde-backed configuration for tile sources and the engine.
//!
//! A tile source describes one pyramid: where its tiles live, how they are
//! laid out and which delegates fetch and decode them. The engine
//! configuration holds the shared service settings (disk cache root, cache
//! budgets, concurrency and tessellation).

use crate::{
    error::{Error, Result},
    geo::{EARTH_RADIUS, LatLon, Sector},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the tiles of a source decode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// RGBA imagery.
    #[default]
    Image,
    /// Elevation rasters.
    Elevation,
}

/// Sample encoding of raw elevation tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// Signed 16-bit integers.
    #[default]
    Int16,
    /// 32-bit floats.
    Float32,
}

impl From<SampleEncoding> for tilepyramid_decode::ElevationEncoding {
    fn from(encoding: SampleEncoding) -> Self {
        match encoding {
            SampleEncoding::Int16 => Self::Int16,
            SampleEncoding::Float32 => Self::Float32,
        }
    }
}

/// Settings specific to elevation sources.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationSourceConfig {
    /// Raw sample encoding.
    pub encoding: SampleEncoding,
    /// Sample value meaning "no data".
    pub missing_value: Option<f32>,
}

/// Names of the delegates making up a source's fetch pipeline.
///
/// Names are resolved when the layer is built; an unknown name is a
/// configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegateNames {
    /// Decides whether a request becomes an async task (`deferred`,
    /// `memory-first`).
    pub requester: String,
    /// Fetches remote bytes (`http`, `offline`).
    pub retriever: String,
    /// Specialty readers tried before the generic image decoder (`dds`, `bil`).
    pub readers: Vec<String>,
    /// Post-decode transformers applied in order (`grayscale`, `invert`,
    /// `elevation-scale:<factor>`).
    pub transformers: Vec<String>,
    /// Creates tiles for the pyramid (`default`).
    pub tile_factory: String,
}

impl Default for DelegateNames {
    fn default() -> Self {
        Self {
            requester: "deferred".to_string(),
            retriever: "http".to_string(),
            readers: vec!["dds".to_string(), "bil".to_string()],
            transformers: Vec::new(),
            tile_factory: "default".to_string(),
        }
    }
}

fn default_tile_origin() -> LatLon {
    crate::level::GLOBAL_TILE_ORIGIN
}

fn default_sector() -> Sector {
    Sector::FULL_SPHERE
}

fn default_tile_size() -> u32 {
    256
}

/// Configuration of one tile pyramid source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSourceConfig {
    /// Dataset name, substituted for `{dataset}` in the service template.
    pub dataset: String,
    /// Disk cache namespace. Pyramids with equal names share cache files.
    pub cache_name: String,
    /// URL template with `{dataset}`, `{level}`, `{row}` and `{column}`
    /// placeholders. A source without a service only reads the disk cache.
    #[serde(default)]
    pub service: Option<String>,
    /// File suffix of cached tiles, including the dot (e.g. `.jpg`).
    pub format_suffix: String,
    /// Tile size in degrees at level 0.
    pub level_zero_tile_delta: LatLon,
    /// Origin of the tiling grid.
    #[serde(default = "default_tile_origin")]
    pub tile_origin: LatLon,
    /// Region covered by the pyramid.
    #[serde(default = "default_sector")]
    pub sector: Sector,
    /// Number of levels, including empty ones.
    pub num_levels: u32,
    /// Leading levels with no data of their own.
    #[serde(default)]
    pub num_empty_levels: u32,
    /// Tile width in texels.
    #[serde(default = "default_tile_size")]
    pub tile_width: u32,
    /// Tile height in texels.
    #[serde(default = "default_tile_size")]
    pub tile_height: u32,
    /// Cached files last modified before this instant (ms since the Unix
    /// epoch) are treated as missing.
    #[serde(default)]
    pub expiry_time_ms: Option<u64>,
    /// What the tiles decode to.
    #[serde(default)]
    pub payload: PayloadKind,
    /// Elevation-specific settings.
    #[serde(default)]
    pub elevation: ElevationSourceConfig,
    /// Cache namespace this source's keys are aliased to, so differently
    /// configured layers can share cached tiles.
    #[serde(default)]
    pub key_alias: Option<String>,
    /// Delegate pipeline.
    #[serde(default)]
    pub delegates: DelegateNames,
}

impl TileSourceConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, &e))?;
        Self::from_json_str(&json)
    }

    /// Check the structural invariants of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.num_levels == 0 {
            return Err(Error::config("num_levels must be at least 1"));
        }
        if self.num_empty_levels >= self.num_levels {
            return Err(Error::config(format!(
                "num_empty_levels ({}) must be below num_levels ({})",
                self.num_empty_levels, self.num_levels
            )));
        }
        let delta = self.level_zero_tile_delta;
        if !(delta.lat > 0.0 && delta.lon > 0.0) {
            return Err(Error::config("level_zero_tile_delta must be positive"));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(Error::config("tile dimensions must be non-zero"));
        }
        let s = self.sector;
        if !(s.min_lat < s.max_lat && s.min_lon < s.max_lon) {
            return Err(Error::config(format!("empty sector {s:?}")));
        }
        validate_namespace(&self.cache_name)?;
        if let Some(alias) = &self.key_alias {
            validate_namespace(alias)?;
        }
        if self.dataset.contains(['/', '\\']) || self.dataset.contains("..") {
            return Err(Error::config(format!("invalid dataset {:?}", self.dataset)));
        }
        if let Some(service) = &self.service {
            for placeholder in ["{level}", "{row}", "{column}"] {
                if !service.contains(placeholder) {
                    return Err(Error::config(format!(
                        "service template {service:?} lacks {placeholder}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_namespace(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err(Error::config(format!("invalid cache namespace {name:?}")));
    }
    Ok(())
}

/// Settings of the shared engine services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory of the disk cache.
    pub cache_root: PathBuf,
    /// GPU resource budget in bytes.
    pub gpu_cache_bytes: usize,
    /// Eviction stops once usage drops to this many bytes.
    pub gpu_low_water_bytes: usize,
    /// Entries idle for at least this many frames are evicted first.
    pub settle_frames: u64,
    /// Budget of the decoded payload cache in bytes.
    pub memory_cache_bytes: usize,
    /// Budget of each elevation model's grid cache in bytes.
    pub elevation_cache_bytes: usize,
    /// Maximum concurrent fetch tasks per loader.
    pub max_in_flight: usize,
    /// Whether remote retrieval is allowed at all.
    pub network_enabled: bool,
    /// How long an unreachable host is skipped before being retried.
    pub host_retry_interval_ms: u64,
    /// Globe radius in meters.
    pub globe_radius: f64,
    /// Cells per tile edge in terrain meshes.
    pub tessellation_density: usize,
    /// Depth of default skirts below the lowest boundary vertex, in meters.
    pub skirt_depth: f64,
    /// Elevation multiplier.
    pub vertical_exaggeration: f64,
    /// Frames a terrain mesh survives without being used.
    pub mesh_retain_frames: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("tile-cache"),
            gpu_cache_bytes: 256 * 1024 * 1024,
            gpu_low_water_bytes: 200 * 1024 * 1024,
            settle_frames: 30,
            memory_cache_bytes: 128 * 1024 * 1024,
            elevation_cache_bytes: 64 * 1024 * 1024,
            max_in_flight: 8,
            network_enabled: true,
            host_retry_interval_ms: 60_000,
            globe_radius: EARTH_RADIUS,
            tessellation_density: 16,
            skirt_depth: 100.0,
            vertical_exaggeration: 1.0,
            mesh_retain_frames: 60,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration; missing fields use defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.gpu_low_water_bytes > self.gpu_cache_bytes {
            return Err(Error::config(
                "gpu_low_water_bytes must not exceed gpu_cache_bytes",
            ));
        }
        if self.tessellation_density == 0 {
            return Err(Error::config("tessellation_density must be at least 1"));
        }
        if self.max_in_flight == 0 {
            return Err(Error::config("max_in_flight must be at least 1"));
        }
        if self.globe_radius <= 0.0 {
            return Err(Error::config("globe_radius must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "dataset": "bmng",
        "cache_name": "earth/bmng",
        "format_suffix": ".jpg",
        "level_zero_tile_delta": { "lat": 36.0, "lon": 36.0 },
        "num_levels": 5
    }"#;

    #[test]
    fn test_rejects_namespace_with_separator() {
        let result = TileSourceConfig::from_json_str(MINIMAL);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_defaults_applied() {
        let json = MINIMAL.replace("earth/bmng", "bmng");
        let config = TileSourceConfig::from_json_str(&json).unwrap();
        assert_eq!(config.tile_origin, LatLon::new(-90.0, -180.0));
        assert_eq!(config.sector, Sector::FULL_SPHERE);
        assert_eq!(config.tile_width, 256);
        assert_eq!(config.payload, PayloadKind::Image);
        assert_eq!(config.delegates.requester, "deferred");
        assert!(config.service.is_none());
    }

    #[test]
    fn test_service_template_requires_placeholders() {
        let mut config =
            TileSourceConfig::from_json_str(&MINIMAL.replace("earth/bmng", "bmng")).unwrap();
        config.service = Some("https://tiles.example.com/{dataset}/{level}/{row}".to_string());
        assert!(config.validate().is_err());
        config.service =
            Some("https://tiles.example.com/{dataset}/{level}/{row}/{column}".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_levels_bound() {
        let mut config =
            TileSourceConfig::from_json_str(&MINIMAL.replace("earth/bmng", "bmng")).unwrap();
        config.num_empty_levels = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_defaults_and_overrides() {
        let config = EngineConfig::from_json_str(r#"{ "max_in_flight": 2 }"#).unwrap();
        assert_eq!(config.max_in_flight, 2);
        assert_eq!(config.settle_frames, 30);

        let bad = EngineConfig::from_json_str(
            r#"{ "gpu_cache_bytes": 10, "gpu_low_water_bytes": 20 }"#,
        );
        assert!(matches!(bad, Err(Error::Config { .. })));
    }
}
