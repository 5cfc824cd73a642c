//! Pyramid levels and the row/column arithmetic of the tiling grid.

use crate::{
    config::TileSourceConfig,
    error::{Error, Result},
    geo::{LatLon, Sector},
};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Origin shared by every pyramid unless configured otherwise, so tiles of
/// different pyramids line up.
pub const GLOBAL_TILE_ORIGIN: LatLon = LatLon::new(-90.0, -180.0);

/// Relative tolerance when an edge lands exactly on a grid line.
const GRID_EPSILON: f64 = 1e-9;

/// One resolution level of a pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    number: u32,
    tile_delta: LatLon,
    tile_origin: LatLon,
    dataset: String,
    service: Option<String>,
    cache_name: Arc<str>,
    format_suffix: String,
    tile_width: u32,
    tile_height: u32,
    expiry_time: Option<SystemTime>,
    empty: bool,
}

impl Level {
    /// Level number, 0 is the coarsest.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Tile size in degrees.
    #[must_use]
    pub fn tile_delta(&self) -> LatLon {
        self.tile_delta
    }

    /// Origin of the tiling grid.
    #[must_use]
    pub fn tile_origin(&self) -> LatLon {
        self.tile_origin
    }

    /// Dataset name.
    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Disk cache namespace.
    #[must_use]
    pub fn cache_name(&self) -> &Arc<str> {
        &self.cache_name
    }

    /// Cache file suffix including the dot.
    #[must_use]
    pub fn format_suffix(&self) -> &str {
        &self.format_suffix
    }

    /// Tile width in texels.
    #[must_use]
    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    /// Tile height in texels.
    #[must_use]
    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Cached files older than this are stale.
    #[must_use]
    pub fn expiry_time(&self) -> Option<SystemTime> {
        self.expiry_time
    }

    /// Whether this level holds no data of its own.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Service template, if the level is backed by a remote service.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Angular size of one texel in radians.
    #[must_use]
    pub fn texel_size(&self) -> f64 {
        self.tile_delta.lat.to_radians() / f64::from(self.tile_height)
    }

    /// Row containing `lat`.
    #[must_use]
    pub fn compute_row(&self, lat: f64) -> i32 {
        grid_index(lat - self.tile_origin.lat, self.tile_delta.lat)
    }

    /// Column containing `lon`.
    #[must_use]
    pub fn compute_column(&self, lon: f64) -> i32 {
        grid_index(lon - self.tile_origin.lon, self.tile_delta.lon)
    }

    /// Last row reaching into a span ending at `lat`.
    ///
    /// A span ending exactly on a grid line does not include the row above it.
    #[must_use]
    pub fn compute_last_row(&self, lat: f64) -> i32 {
        last_grid_index(lat - self.tile_origin.lat, self.tile_delta.lat)
    }

    /// Last column reaching into a span ending at `lon`.
    #[must_use]
    pub fn compute_last_column(&self, lon: f64) -> i32 {
        last_grid_index(lon - self.tile_origin.lon, self.tile_delta.lon)
    }

    /// Sector of the tile at `(row, column)`.
    ///
    /// Both edges are computed from the origin, so neighbors share bit-identical
    /// edge values.
    #[must_use]
    pub fn tile_sector(&self, row: i32, column: i32) -> Sector {
        let origin = self.tile_origin;
        let delta = self.tile_delta;
        Sector::new(
            origin.lat + f64::from(row) * delta.lat,
            origin.lat + f64::from(row + 1) * delta.lat,
            origin.lon + f64::from(column) * delta.lon,
            origin.lon + f64::from(column + 1) * delta.lon,
        )
    }

    /// Remote URL of a tile, `None` when the level has no service.
    #[must_use]
    pub fn tile_url(&self, row: i32, column: i32) -> Option<String> {
        self.service.as_ref().map(|template| {
            template
                .replace("{dataset}", &self.dataset)
                .replace("{level}", &self.number.to_string())
                .replace("{row}", &row.to_string())
                .replace("{column}", &column.to_string())
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn grid_index(offset: f64, delta: f64) -> i32 {
    let x = offset / delta;
    // Snap values a rounding error below a grid line onto it.
    let snapped = (x + GRID_EPSILON * x.abs().max(1.0)).floor();
    snapped as i32
}

#[allow(clippy::cast_possible_truncation)]
fn last_grid_index(offset: f64, delta: f64) -> i32 {
    let x = offset / delta;
    let snapped = (x - GRID_EPSILON * x.abs().max(1.0)).ceil();
    snapped as i32 - 1
}

/// The ordered levels of one pyramid.
#[derive(Debug, Clone)]
pub struct LevelSet {
    sector: Sector,
    tile_origin: LatLon,
    levels: Vec<Arc<Level>>,
}

impl LevelSet {
    /// Build the levels described by a tile source.
    ///
    /// Each level halves the tile delta of the one above it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn from_config(config: &TileSourceConfig) -> Result<Self> {
        config.validate()?;

        let cache_name: Arc<str> = Arc::from(config.cache_name.as_str());
        let expiry_time = config
            .expiry_time_ms
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms));

        let levels = (0..config.num_levels)
            .map(|number| {
                let scale = 0.5_f64.powi(i32::try_from(number).unwrap_or(i32::MAX));
                Arc::new(Level {
                    number,
                    tile_delta: LatLon::new(
                        config.level_zero_tile_delta.lat * scale,
                        config.level_zero_tile_delta.lon * scale,
                    ),
                    tile_origin: config.tile_origin,
                    dataset: config.dataset.clone(),
                    service: config.service.clone(),
                    cache_name: Arc::clone(&cache_name),
                    format_suffix: config.format_suffix.clone(),
                    tile_width: config.tile_width,
                    tile_height: config.tile_height,
                    expiry_time,
                    empty: number < config.num_empty_levels,
                })
            })
            .collect::<Vec<_>>();

        if levels.is_empty() {
            return Err(Error::config("pyramid has no levels"));
        }

        Ok(Self {
            sector: config.sector,
            tile_origin: config.tile_origin,
            levels,
        })
    }

    /// Region covered by the pyramid.
    #[must_use]
    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Origin of the tiling grid.
    #[must_use]
    pub fn tile_origin(&self) -> LatLon {
        self.tile_origin
    }

    /// All levels, coarsest first.
    #[must_use]
    pub fn levels(&self) -> &[Arc<Level>] {
        &self.levels
    }

    /// Number of levels.
    #[must_use]
    pub fn num_levels(&self) -> u32 {
        u32::try_from(self.levels.len()).unwrap_or(u32::MAX)
    }

    /// Level by number.
    #[must_use]
    pub fn level(&self, number: u32) -> Option<&Arc<Level>> {
        self.levels.get(number as usize)
    }

    /// The coarsest level.
    #[must_use]
    pub fn first_level(&self) -> &Arc<Level> {
        &self.levels[0]
    }

    /// The finest level.
    #[must_use]
    pub fn last_level(&self) -> &Arc<Level> {
        &self.levels[self.levels.len() - 1]
    }

    /// Whether `level` is the finest level.
    #[must_use]
    pub fn is_final_level(&self, level: u32) -> bool {
        level + 1 >= self.num_levels()
    }

    /// First non-empty level at or below `number`, clamped to the finest.
    #[must_use]
    pub fn first_non_empty_at_or_below(&self, number: u32) -> &Arc<Level> {
        self.levels
            .iter()
            .skip(number as usize)
            .find(|level| !level.is_empty())
            .unwrap_or_else(|| self.last_level())
    }

    /// Coarsest non-empty level whose texel size is at most `texel_size`
    /// radians, or the finest level if none is fine enough.
    #[must_use]
    pub fn level_for_texel_size(&self, texel_size: f64) -> &Arc<Level> {
        self.levels
            .iter()
            .filter(|level| !level.is_empty())
            .find(|level| level.texel_size() <= texel_size)
            .unwrap_or_else(|| self.last_level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[test]
    fn test_level_deltas_halve() {
        let set = LevelSet::from_config(&test_config(3, 36.0, Sector::FULL_SPHERE)).unwrap();
        assert_eq!(set.num_levels(), 3);
        assert_eq!(set.level(1).unwrap().tile_delta(), LatLon::new(18.0, 18.0));
        assert_eq!(set.last_level().tile_delta(), LatLon::new(9.0, 9.0));
        assert!(set.is_final_level(2));
    }

    #[test]
    fn test_row_column_arithmetic() {
        let set = LevelSet::from_config(&test_config(1, 10.0, Sector::FULL_SPHERE)).unwrap();
        let level = set.first_level();
        assert_eq!(level.compute_row(-90.0), 0);
        assert_eq!(level.compute_row(-80.0), 1);
        assert_eq!(level.compute_row(5.0), 9);
        assert_eq!(level.compute_last_row(10.0), 9);
        assert_eq!(level.compute_last_row(10.5), 10);
        assert_eq!(level.compute_column(-180.0), 0);
        assert_eq!(level.compute_last_column(180.0), 35);
    }

    #[test]
    fn test_neighbor_sectors_share_edges() {
        let set = LevelSet::from_config(&test_config(1, 0.3, Sector::FULL_SPHERE)).unwrap();
        let level = set.first_level();
        let a = level.tile_sector(101, 57);
        let north = level.tile_sector(102, 57);
        let east = level.tile_sector(101, 58);
        assert_eq!(a.max_lat, north.min_lat);
        assert_eq!(a.max_lon, east.min_lon);
    }

    #[test]
    fn test_tile_url_substitution() {
        let set = LevelSet::from_config(&test_config(2, 36.0, Sector::FULL_SPHERE)).unwrap();
        let url = set.level(1).unwrap().tile_url(3, 7).unwrap();
        assert_eq!(url, "http://tiles.test/test/1/3/7");
    }

    #[test]
    fn test_empty_levels_and_texel_selection() {
        let mut config = test_config(4, 36.0, Sector::FULL_SPHERE);
        config.num_empty_levels = 2;
        let set = LevelSet::from_config(&config).unwrap();
        assert!(set.level(0).unwrap().is_empty());
        assert_eq!(set.first_non_empty_at_or_below(0).number(), 2);
        // Coarse enough for anything: still skips empty levels.
        assert_eq!(set.level_for_texel_size(1.0).number(), 2);
        // Finer than any level: clamps to the last.
        assert_eq!(set.level_for_texel_size(0.0).number(), 3);
    }
}
