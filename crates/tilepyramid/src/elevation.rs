//! Elevation model backed by an elevation tile pyramid.

use crate::{
    config::{PayloadKind, TileSourceConfig},
    delegates::{Completion, DelegatePipeline, FetchOutcome},
    error::{Error, Result},
    geo::{LatLon, Sector, lat_lon_to_cartesian},
    loader::TileLoader,
    memory::{TileMemoryCache, TilePayload},
    pyramid::{LevelHint, TilePyramid},
    services::Services,
    tile::Tile,
};
use glam::DVec3;
use std::sync::Arc;

/// Source of terrain heights for tessellation.
pub trait ElevationSampler {
    /// Counter that changes whenever newly available data may change sampled
    /// values. Meshes built at the current epoch are not rebuilt.
    fn epoch(&self) -> u64;

    /// Elevation in meters at `location`, using data no finer than `level`.
    ///
    /// Returns `None` where no data is loaded.
    fn elevation(&self, location: LatLon, level: u32) -> Option<f64>;
}

/// Loads elevation tiles and samples them.
///
/// Lookups use the finest loaded tile at or above the requested level, so
/// coarse data fills in until finer tiles arrive.
pub struct ElevationModel {
    pyramid: TilePyramid,
    pipeline: DelegatePipeline,
    loader: TileLoader,
    grids: TileMemoryCache,
    epoch: u64,
}

impl ElevationModel {
    /// Build a model from an elevation source configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or does not
    /// describe elevation data.
    pub fn new(config: &TileSourceConfig, services: &Services) -> Result<Self> {
        if config.payload != PayloadKind::Elevation {
            return Err(Error::config(format!(
                "elevation source {:?} does not produce elevation",
                config.dataset
            )));
        }
        let pyramid = TilePyramid::from_config(config, services.config.globe_radius)?;
        let pipeline = DelegatePipeline::from_config(
            config,
            Arc::clone(&services.files),
            Arc::clone(&services.network),
        )?;
        Ok(Self::with_pipeline(pyramid, pipeline, services))
    }

    /// Build a model from an already resolved pyramid and pipeline.
    ///
    /// Grids are held in a private cache so they are not evicted by imagery.
    /// It is bounded by `elevation_cache_bytes`; once full, the oldest grids
    /// give way and lookups fall back to coarser ones until the evicted
    /// tiles are requested again.
    #[must_use]
    pub fn with_pipeline(
        pyramid: TilePyramid,
        pipeline: DelegatePipeline,
        services: &Services,
    ) -> Self {
        Self {
            pyramid,
            pipeline,
            loader: services.loader(),
            grids: TileMemoryCache::with_max_size(services.config.elevation_cache_bytes),
            epoch: 0,
        }
    }

    /// The model's pyramid.
    #[must_use]
    pub fn pyramid(&self) -> &TilePyramid {
        &self.pyramid
    }

    /// The model's loader.
    #[must_use]
    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    /// Number of loaded grids.
    #[must_use]
    pub fn loaded_tiles(&self) -> usize {
        self.grids.len()
    }

    /// Apply finished fetches. Returns the number of grids added.
    pub fn begin_frame(&mut self) -> usize {
        let mut loaded = 0;
        for completion in self.loader.drain_completions() {
            loaded += usize::from(self.apply_completion(completion));
        }
        self.loader.clear_queue();
        loaded
    }

    /// Request the tiles of `sector` at the hinted level, nearest to `eye`
    /// first. Returns the number of tiles requested.
    pub fn request_sector(&mut self, sector: &Sector, hint: LevelHint, eye: DVec3) -> usize {
        let radius = self.pyramid.globe_radius();
        let mut requested = 0;
        for tile in self.pyramid.tiles_in_sector(sector, hint) {
            let key = self.pyramid.transformed_key(&tile);
            if self.grids.contains(&key) || self.pyramid.is_key_absent(&key) {
                continue;
            }
            let centroid = tile.sector().centroid();
            let priority = eye.distance(lat_lon_to_cartesian(centroid.lat, centroid.lon, radius));
            let request = self.pipeline.make_request(&self.pyramid, &tile);
            if self
                .loader
                .submit(&self.pipeline, request, priority, &self.grids)
                .is_pending()
            {
                requested += 1;
            }
        }
        requested
    }

    /// Dispatch requested fetches. Returns the number started.
    pub fn end_frame(&mut self) -> usize {
        self.loader.dispatch(&self.pipeline)
    }

    /// Wait for the next fetch to finish and apply it.
    ///
    /// Returns `false` if nothing was in flight.
    pub async fn wait_for_completion(&mut self) -> bool {
        let Some(completion) = self.loader.next_completion().await else {
            return false;
        };
        self.apply_completion(completion);
        true
    }

    /// Elevation at `location` from the finest loaded tile at or above
    /// `level`.
    #[must_use]
    pub fn elevation_at(&self, location: LatLon, level: u32) -> Option<f64> {
        let (sector, grid) = self.best_grid(location, level)?;
        let s = (location.lon - sector.min_lon) / sector.delta_lon();
        let t = (location.lat - sector.min_lat) / sector.delta_lat();
        grid.as_elevation()?.sample(s, t)
    }

    fn best_grid(
        &self,
        location: LatLon,
        level: u32,
    ) -> Option<(Sector, Arc<TilePayload>)> {
        let levels = self.pyramid.levels();
        let bounds = levels.sector();
        if !bounds.contains(location) {
            return None;
        }
        let finest = level.min(levels.num_levels() - 1);
        for number in (0..=finest).rev() {
            let Some(lvl) = levels.level(number) else {
                continue;
            };
            if lvl.is_empty() {
                continue;
            }
            let row = lvl
                .compute_row(location.lat)
                .min(lvl.compute_last_row(bounds.max_lat));
            let column = lvl
                .compute_column(location.lon)
                .min(lvl.compute_last_column(bounds.max_lon));
            let tile = Tile::new(Arc::clone(lvl), row, column);
            if let Some(payload) = self.grids.get(&self.pyramid.transformed_key(&tile)) {
                return Some((tile.sector(), payload));
            }
        }
        None
    }

    fn apply_completion(&mut self, completion: Completion) -> bool {
        let Completion { key, outcome, .. } = completion;
        match outcome {
            FetchOutcome::Loaded(payload) => {
                if payload.as_elevation().is_none() {
                    tracing::warn!(%key, "elevation source produced a non-elevation payload");
                    self.pyramid.mark_key_absent(key);
                    return false;
                }
                self.grids.put(key, payload);
                self.epoch += 1;
                true
            }
            FetchOutcome::Absent(e) => {
                tracing::debug!(%key, error = %e, "elevation tile unavailable");
                self.pyramid.mark_key_absent(key);
                false
            }
            FetchOutcome::Failed(e) => {
                tracing::warn!(%key, error = %e, "elevation fetch failed, will retry");
                false
            }
        }
    }
}

impl ElevationSampler for ElevationModel {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn elevation(&self, location: LatLon, level: u32) -> Option<f64> {
        self.elevation_at(location, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, testing::test_config};
    use tilepyramid_decode::ElevationGrid;

    fn model(cache_root: &std::path::Path) -> ElevationModel {
        model_with_budget(cache_root, EngineConfig::default().elevation_cache_bytes)
    }

    fn model_with_budget(cache_root: &std::path::Path, budget: usize) -> ElevationModel {
        let mut config = test_config(3, 36.0, Sector::new(-60.0, 60.0, -120.0, 120.0));
        config.payload = PayloadKind::Elevation;
        config.format_suffix = ".bil".to_string();
        config.service = None;
        let engine = EngineConfig {
            cache_root: cache_root.to_path_buf(),
            elevation_cache_bytes: budget,
            ..EngineConfig::default()
        };
        let services = Services::new(engine, tokio::runtime::Handle::current()).unwrap();
        ElevationModel::new(&config, &services).unwrap()
    }

    fn insert_flat(model: &mut ElevationModel, level: u32, location: LatLon, height: f32) {
        let lvl = Arc::clone(model.pyramid.levels().level(level).unwrap());
        let row = lvl.compute_row(location.lat);
        let column = lvl.compute_column(location.lon);
        let key = model.pyramid.transformed_key(&Tile::new(lvl, row, column));
        let grid = ElevationGrid::new(2, 2, vec![height; 4], None).unwrap();
        model.grids.put(key, Arc::new(TilePayload::Elevation(grid)));
    }

    #[tokio::test]
    async fn test_falls_back_to_coarser_tile() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = model(dir.path());
        let here = LatLon::new(10.0, 10.0);
        assert_eq!(model.elevation_at(here, 2), None);

        insert_flat(&mut model, 0, here, 100.0);
        assert_eq!(model.elevation_at(here, 2), Some(100.0));

        insert_flat(&mut model, 1, here, 250.0);
        assert_eq!(model.elevation_at(here, 2), Some(250.0));
        // Never finer than asked for.
        assert_eq!(model.elevation_at(here, 0), Some(100.0));
    }

    #[tokio::test]
    async fn test_grid_cache_bounded() {
        let dir = tempfile::tempdir().unwrap();
        // Room for two 2x2 float grids.
        let mut model = model_with_budget(dir.path(), 40);
        let here = LatLon::new(10.0, 10.0);

        insert_flat(&mut model, 0, here, 100.0);
        insert_flat(&mut model, 1, here, 250.0);
        assert_eq!(model.loaded_tiles(), 2);
        insert_flat(&mut model, 2, here, 400.0);

        assert_eq!(model.loaded_tiles(), 2);
        assert!(model.grids.size() <= 40);
        // The oldest grid gave way; finer ones still answer.
        assert_eq!(model.elevation_at(here, 0), None);
        assert_eq!(model.elevation_at(here, 1), Some(250.0));
        assert_eq!(model.elevation_at(here, 2), Some(400.0));
    }

    #[tokio::test]
    async fn test_outside_pyramid_has_no_elevation() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = model(dir.path());
        insert_flat(&mut model, 0, LatLon::new(10.0, 10.0), 100.0);
        assert_eq!(model.elevation_at(LatLon::new(75.0, 10.0), 2), None);
    }

    #[tokio::test]
    async fn test_rejects_imagery_source() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EngineConfig {
            cache_root: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let services = Services::new(engine, tokio::runtime::Handle::current()).unwrap();
        let config = test_config(1, 36.0, Sector::FULL_SPHERE);
        assert!(matches!(
            ElevationModel::new(&config, &services),
            Err(Error::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_tiles_become_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = model(dir.path());
        let sector = Sector::new(0.0, 10.0, 0.0, 10.0);

        let requested = model.request_sector(&sector, LevelHint::Level(0), DVec3::ZERO);
        assert_eq!(requested, 1);
        assert_eq!(model.end_frame(), 1);
        // No service and nothing cached: the tile is confirmed missing.
        while model.wait_for_completion().await {}
        assert_eq!(model.epoch(), 0);
        assert_eq!(model.pyramid().absent_resources().len(), 1);
        assert_eq!(model.request_sector(&sector, LevelHint::Level(0), DVec3::ZERO), 0);
    }
}
