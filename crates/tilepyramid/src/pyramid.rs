//! The tile pyramid: tile enumeration, splitting, key transformation and
//! resource-absent bookkeeping.

use crate::{
    config::TileSourceConfig,
    delegates::{self, TileFactory},
    error::Result,
    geo::Sector,
    key_transform::{self, KeyTransform},
    level::{Level, LevelSet},
    tile::{Tile, TileKey},
    view::View,
};
use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

/// Which level `tiles_in_sector` should enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelHint {
    /// A specific level, clamped to the finest and moved past empty levels.
    Level(u32),
    /// The finest level.
    Finest,
}

/// A tile selected for rendering, with its distance from the eye.
#[derive(Debug, Clone)]
pub struct VisibleTile {
    /// The tile.
    pub tile: Tile,
    /// Distance from the eye to the tile's bounding sphere.
    pub distance: f64,
}

/// Keys whose resources are known not to exist.
///
/// Marked keys are never fetched again until cleared.
#[derive(Debug, Default)]
pub struct AbsentResourceList {
    keys: RwLock<HashSet<TileKey>>,
}

impl AbsentResourceList {
    /// Whether `key` is marked absent.
    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Mark `key` absent. Returns `false` if it already was.
    pub fn mark(&self, key: TileKey) -> bool {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    /// Clear the marker of `key`.
    pub fn clear(&self, key: &TileKey) -> bool {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Clear every marker.
    pub fn clear_all(&self) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of marked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no key is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A quadtree of tiles over a sector.
#[derive(Debug)]
pub struct TilePyramid {
    levels: LevelSet,
    key_transform: Arc<dyn KeyTransform>,
    tile_factory: Arc<dyn TileFactory>,
    absent: AbsentResourceList,
    top_level: Vec<Tile>,
    globe_radius: f64,
    elevation_bounds: (f64, f64),
}

impl TilePyramid {
    /// Create a pyramid from its levels and delegates.
    #[must_use]
    pub fn new(
        levels: LevelSet,
        key_transform: Arc<dyn KeyTransform>,
        tile_factory: Arc<dyn TileFactory>,
        globe_radius: f64,
    ) -> Self {
        let top_level = tiles_covering(
            levels.first_level(),
            &levels.sector(),
            &levels.sector(),
            tile_factory.as_ref(),
        );
        tracing::debug!(
            levels = levels.num_levels(),
            top_level_tiles = top_level.len(),
            "created tile pyramid"
        );
        Self {
            levels,
            key_transform,
            tile_factory,
            absent: AbsentResourceList::default(),
            top_level,
            globe_radius,
            elevation_bounds: (0.0, 0.0),
        }
    }

    /// Build a pyramid from a tile source configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration is
    /// invalid or names an unknown tile factory.
    pub fn from_config(config: &TileSourceConfig, globe_radius: f64) -> Result<Self> {
        let levels = LevelSet::from_config(config)?;
        let tile_factory = delegates::tile_factory_by_name(&config.delegates.tile_factory)?;
        let key_transform = key_transform::from_alias(config.key_alias.as_deref());
        Ok(Self::new(levels, key_transform, tile_factory, globe_radius))
    }

    /// Elevation range used for tile bounding volumes.
    pub fn set_elevation_bounds(&mut self, min: f64, max: f64) {
        self.elevation_bounds = (min.min(max), min.max(max));
    }

    /// The pyramid's levels.
    #[must_use]
    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }

    /// Globe radius used for bounding volumes.
    #[must_use]
    pub fn globe_radius(&self) -> f64 {
        self.globe_radius
    }

    /// Level-0 tiles covering the pyramid's sector.
    #[must_use]
    pub fn top_level_tiles(&self) -> &[Tile] {
        &self.top_level
    }

    /// Tiles of one level whose sectors overlap `sector`.
    ///
    /// Tiles that only touch `sector` along an edge are not included.
    #[must_use]
    pub fn tiles_in_sector(&self, sector: &Sector, hint: LevelHint) -> Vec<Tile> {
        let level = match hint {
            LevelHint::Level(number) => self.levels.first_non_empty_at_or_below(number),
            LevelHint::Finest => self.levels.last_level(),
        };
        tiles_covering(
            level,
            sector,
            &self.levels.sector(),
            self.tile_factory.as_ref(),
        )
    }

    /// Children of `tile` in `[SW, SE, NW, NE]` order, `None` at the finest level.
    #[must_use]
    pub fn split(&self, tile: &Tile) -> Option<[Tile; 4]> {
        let next = self.levels.level(tile.level_number() + 1)?;
        Some(self.tile_factory.split(tile, next))
    }

    /// The key used for every cache interaction of `tile`.
    #[must_use]
    pub fn transformed_key(&self, tile: &Tile) -> TileKey {
        self.key_transform.transform(&tile.natural_key())
    }

    /// Whether the resource of `tile` is marked absent.
    #[must_use]
    pub fn is_absent(&self, tile: &Tile) -> bool {
        self.absent.contains(&self.transformed_key(tile))
    }

    /// Whether the resource under an already transformed key is marked absent.
    #[must_use]
    pub fn is_key_absent(&self, key: &TileKey) -> bool {
        self.absent.contains(key)
    }

    /// Mark the resource of `tile` absent.
    pub fn mark_absent(&self, tile: &Tile) {
        self.mark_key_absent(self.transformed_key(tile));
    }

    /// Mark an already transformed key absent.
    pub fn mark_key_absent(&self, key: TileKey) {
        debug_assert_eq!(self.key_transform.transform(&key), key);
        if self.absent.mark(key.clone()) {
            tracing::debug!(%key, "resource marked absent");
        }
    }

    /// Clear the absent marker of `tile`.
    pub fn clear_absent(&self, tile: &Tile) -> bool {
        self.absent.clear(&self.transformed_key(tile))
    }

    /// Clear every absent marker.
    pub fn clear_all_absent(&self) {
        self.absent.clear_all();
    }

    /// The absent-resource list.
    #[must_use]
    pub fn absent_resources(&self) -> &AbsentResourceList {
        &self.absent
    }

    /// Select the tiles to render for `view`, nearest first.
    ///
    /// Starting from the top-level tiles, tiles outside the frustum are
    /// culled and tiles whose screen-space error is too large are split.
    /// Empty levels are always split.
    #[must_use]
    pub fn visible_tiles(&self, view: &View) -> Vec<VisibleTile> {
        let mut out = Vec::new();
        for tile in &self.top_level {
            self.add_visible(tile, view, &mut out);
        }
        out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        out
    }

    fn add_visible(&self, tile: &Tile, view: &View, out: &mut Vec<VisibleTile>) {
        let (min_elevation, max_elevation) = self.elevation_bounds;
        let (center, radius) =
            tile.sector()
                .bounding_sphere(self.globe_radius, min_elevation, max_elevation);
        if !view.frustum.intersects_sphere(center, radius) {
            return;
        }

        let distance = view.lod.distance_to_sphere(center, radius);
        let level = tile.level();
        let refine = level.is_empty() || self.needs_refinement(level, view, distance);
        if refine {
            if let Some(children) = self.split(tile) {
                for child in &children {
                    if child.sector().intersects(&self.levels.sector()) {
                        self.add_visible(child, view, out);
                    }
                }
                return;
            }
        }

        out.push(VisibleTile {
            tile: tile.clone(),
            distance,
        });
    }

    fn needs_refinement(&self, level: &Level, view: &View, distance: f64) -> bool {
        view.lod.should_refine(level, distance, self.globe_radius)
    }
}

fn tiles_covering(
    level: &Arc<Level>,
    sector: &Sector,
    pyramid_sector: &Sector,
    factory: &dyn TileFactory,
) -> Vec<Tile> {
    let Some(region) = sector.intersection(pyramid_sector) else {
        return Vec::new();
    };

    let first_row = level.compute_row(region.min_lat);
    let last_row = level.compute_last_row(region.max_lat);
    let first_column = level.compute_column(region.min_lon);
    let last_column = level.compute_last_column(region.max_lon);

    let mut tiles = Vec::new();
    for row in first_row..=last_row {
        for column in first_column..=last_column {
            tiles.push(factory.create_tile(level, row, column));
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geo::{EARTH_RADIUS, lat_lon_to_cartesian},
        testing::test_config,
        tile::TileCoord,
        view::{Frustum, LodMetrics},
    };

    fn pyramid(num_levels: u32, delta: f64, sector: Sector) -> TilePyramid {
        TilePyramid::from_config(&test_config(num_levels, delta, sector), EARTH_RADIUS).unwrap()
    }

    #[test]
    fn test_single_level_two_by_two() {
        let pyramid = pyramid(1, 10.0, Sector::new(-10.0, 10.0, -10.0, 10.0));
        assert_eq!(pyramid.top_level_tiles().len(), 4);

        let tiles = pyramid.tiles_in_sector(&Sector::new(-5.0, 5.0, -5.0, 5.0), LevelHint::Level(0));
        assert_eq!(tiles.len(), 4);
        let coords: HashSet<TileCoord> = tiles.iter().map(Tile::coord).collect();
        assert!(coords.contains(&TileCoord::new(0, 8, 17)));
        assert!(coords.contains(&TileCoord::new(0, 9, 18)));
    }

    #[test]
    fn test_edge_touching_tiles_excluded() {
        let pyramid = pyramid(1, 10.0, Sector::FULL_SPHERE);
        let tiles = pyramid.tiles_in_sector(&Sector::new(0.0, 10.0, 0.0, 10.0), LevelHint::Finest);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].sector(), Sector::new(0.0, 10.0, 0.0, 10.0));
    }

    #[test]
    fn test_sector_outside_pyramid_is_empty() {
        let pyramid = pyramid(1, 10.0, Sector::new(-10.0, 10.0, -10.0, 10.0));
        let tiles = pyramid.tiles_in_sector(&Sector::new(40.0, 50.0, 40.0, 50.0), LevelHint::Finest);
        assert!(tiles.is_empty());
    }

    #[test]
    fn test_split_children() {
        let pyramid = pyramid(2, 36.0, Sector::FULL_SPHERE);
        let parent = &pyramid.top_level_tiles()[0];
        let children = pyramid.split(parent).unwrap();
        let expected = parent.sector().subdivide();
        for (child, sector) in children.iter().zip(expected) {
            assert_eq!(child.sector(), sector);
            assert_eq!(child.coord().parent(), Some(parent.coord()));
        }
        assert!(pyramid.split(&children[0]).is_none());
    }

    #[test]
    fn test_absent_markers_use_transformed_key() {
        let mut config = test_config(1, 36.0, Sector::FULL_SPHERE);
        config.key_alias = Some("shared".to_string());
        let pyramid = TilePyramid::from_config(&config, EARTH_RADIUS).unwrap();
        let tile = pyramid.top_level_tiles()[0].clone();

        pyramid.mark_absent(&tile);
        let key = pyramid.transformed_key(&tile);
        assert_eq!(&*key.cache_name, "shared");
        assert!(pyramid.is_key_absent(&key));
        assert!(!pyramid.is_key_absent(&tile.natural_key()));

        assert!(pyramid.clear_absent(&tile));
        assert!(!pyramid.is_absent(&tile));
    }

    #[test]
    fn test_visible_tiles_refine_near_eye_and_sort() {
        let pyramid = pyramid(4, 36.0, Sector::FULL_SPHERE);
        let eye = lat_lon_to_cartesian(2.25, 2.25, EARTH_RADIUS + 10_000.0);
        let view = View::new(
            Frustum::unbounded(),
            LodMetrics::new(eye, std::f64::consts::FRAC_PI_3, 1080.0),
        );

        let visible = pyramid.visible_tiles(&view);
        assert!(!visible.is_empty());
        assert!(visible.windows(2).all(|w| w[0].distance <= w[1].distance));
        // The tile under the eye is refined to the finest level.
        assert_eq!(visible[0].tile.level_number(), 3);
        assert!(visible[0].tile.sector().contains(crate::geo::LatLon::new(2.25, 2.25)));

        // Selected tiles never overlap.
        for (i, a) in visible.iter().enumerate() {
            for b in &visible[i + 1..] {
                assert!(!a.tile.sector().intersects(&b.tile.sector()));
            }
        }
    }
}
