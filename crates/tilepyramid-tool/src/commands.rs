//! Subcommand implementations.

use std::{error::Error, path::Path, sync::Arc};
use tilepyramid::{
    DiskCacheCoordinator, EdgeStitch, ElevationModel, EngineConfig, FileStore, LevelHint,
    Sector, Services, TessellatorConfig, Tessellator, Tile, TilePyramid,
    TileSourceConfig,
    delegates::{DelegatePipeline, FetchOutcome},
    geo::lat_lon_to_cartesian,
};
use tokio::runtime::Handle;

type CommandResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Default)]
struct PrefetchStats {
    loaded: usize,
    absent: usize,
    failed: usize,
}

impl PrefetchStats {
    fn total(&self) -> usize {
        self.loaded + self.absent + self.failed
    }
}

/// Fetch every tile of `sector` at `level` through the source's pipeline,
/// writing retrieved tiles through to the disk cache.
pub async fn prefetch(config: EngineConfig, source: &Path, sector: &Sector, level: u32) -> CommandResult {
    let source = TileSourceConfig::from_path(source)?;
    let services = Services::new(config, Handle::current())?;
    let pyramid = TilePyramid::from_config(&source, services.config.globe_radius)?;
    let pipeline = DelegatePipeline::from_config(
        &source,
        Arc::clone(&services.files),
        Arc::clone(&services.network),
    )?;
    let mut loader = services.loader();

    let tiles = pyramid.tiles_in_sector(sector, LevelHint::Level(level));
    let center = sector.centroid();
    let mut stats = PrefetchStats::default();
    for tile in &tiles {
        let c = tile.sector().centroid();
        let priority = (c.lat - center.lat).hypot(c.lon - center.lon);
        let request = pipeline.make_request(&pyramid, tile);
        if !loader
            .submit(&pipeline, request, priority, &services.memory)
            .is_pending()
        {
            stats.loaded += 1;
        }
    }
    tracing::info!(
        dataset = %source.dataset,
        level,
        tiles = tiles.len(),
        "prefetching"
    );

    loop {
        loader.dispatch(&pipeline);
        let Some(completion) = loader.next_completion().await else {
            break;
        };
        match completion.outcome {
            FetchOutcome::Loaded(_) => stats.loaded += 1,
            FetchOutcome::Absent(e) => {
                tracing::debug!(key = %completion.key, error = %e, "tile unavailable");
                stats.absent += 1;
            }
            FetchOutcome::Failed(e) => {
                tracing::warn!(key = %completion.key, error = %e, "tile fetch failed");
                stats.failed += 1;
            }
        }
        if stats.total() % 100 == 0 {
            tracing::info!(done = stats.total(), of = tiles.len(), "progress");
        }
    }

    tracing::info!(
        loaded = stats.loaded,
        absent = stats.absent,
        failed = stats.failed,
        "prefetch complete"
    );
    Ok(())
}

/// Load the elevation of `sector` and tessellate its tiles at `level`.
pub async fn tessellate(
    config: EngineConfig,
    source: &Path,
    sector: &Sector,
    level: u32,
) -> CommandResult {
    let source = TileSourceConfig::from_path(source)?;
    let services = Services::new(config, Handle::current())?;
    let mut model = ElevationModel::new(&source, &services)?;

    let center = sector.centroid();
    let eye = lat_lon_to_cartesian(center.lat, center.lon, services.config.globe_radius * 1.5);
    let requested = model.request_sector(sector, LevelHint::Level(level), eye);
    tracing::info!(dataset = %source.dataset, level, requested, "loading elevation");
    while model.end_frame() > 0 || model.loader().in_flight_count() > 0 {
        while model.wait_for_completion().await {}
    }

    let tiles: Vec<Tile> = model
        .pyramid()
        .tiles_in_sector(sector, LevelHint::Level(level));
    let mut tessellator = Tessellator::new(TessellatorConfig::from_engine(&services.config));
    let report = tessellator.tessellate(&tiles, &model);

    let mut vertices = 0;
    let mut same_level = 0;
    let mut coarse = 0;
    for tile in &tiles {
        let Some(mesh) = tessellator.mesh_for(tile) else {
            continue;
        };
        vertices += mesh.vertices().len();
        for edge in tilepyramid::Edge::ALL {
            match mesh.edge_stitch(edge) {
                EdgeStitch::SameLevel { .. } => same_level += 1,
                EdgeStitch::Coarse { .. } => coarse += 1,
                EdgeStitch::Default => {}
            }
        }
    }
    tracing::info!(
        tiles = tiles.len(),
        loaded = model.loaded_tiles(),
        rebuilt = report.rebuilt,
        vertices,
        same_level_edges = same_level,
        coarse_edges = coarse,
        "tessellation complete"
    );
    Ok(())
}

/// Print where the tile containing `(lat, lon)` is cached and fetched from.
pub fn path(config: EngineConfig, source: &Path, lat: f64, lon: f64, level: u32) -> CommandResult {
    let source = TileSourceConfig::from_path(source)?;
    let pyramid = TilePyramid::from_config(&source, config.globe_radius)?;
    let files = FileStore::new(config.cache_root, Arc::new(DiskCacheCoordinator::new()));

    let Some(lvl) = pyramid.levels().level(level) else {
        return Err(format!(
            "level {level} out of range, source has {} levels",
            pyramid.levels().num_levels()
        )
        .into());
    };
    if !pyramid.levels().sector().contains(tilepyramid::LatLon::new(lat, lon)) {
        tracing::warn!(lat, lon, "location lies outside the source's sector");
    }

    let tile = Tile::new(Arc::clone(lvl), lvl.compute_row(lat), lvl.compute_column(lon));
    let key = pyramid.transformed_key(&tile);
    let local = files.tile_path(&key.cache_name, lvl, tile.row(), tile.column(), None);

    println!("tile: {}", tile.coord());
    println!("key:  {key}");
    println!("path: {}", local.display());
    if let Some(url) = lvl.tile_url(tile.row(), tile.column()) {
        println!("url:  {url}");
    }
    Ok(())
}
