//! Elevation loaded from the disk cache, tessellated into stitched meshes.

mod common;

use tilepyramid::{
    Edge, EdgeStitch, ElevationModel, ElevationSampler, LatLon, LevelHint, Sector,
    TessellatorConfig, Tessellator, TileSourceConfig,
};

const ELEVATION_JSON: &str = r#"{
    "dataset": "srtm",
    "cache_name": "srtm",
    "format_suffix": ".bil",
    "level_zero_tile_delta": { "lat": 10.0, "lon": 10.0 },
    "sector": { "min_lat": -10.0, "max_lat": 10.0, "min_lon": -10.0, "max_lon": 10.0 },
    "num_levels": 1,
    "tile_width": 3,
    "tile_height": 3,
    "payload": "elevation",
    "elevation": { "encoding": "int16" }
}"#;

fn bil(height: i16) -> Vec<u8> {
    std::iter::repeat_n(height, 9)
        .flat_map(i16::to_le_bytes)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cached_elevation_builds_stitched_terrain() {
    let dir = tempfile::tempdir().unwrap();
    let services = common::services(dir.path());
    let config = TileSourceConfig::from_json_str(ELEVATION_JSON).unwrap();
    let mut model = ElevationModel::new(&config, &services).unwrap();

    let tiles = model.pyramid().top_level_tiles().to_vec();
    assert_eq!(tiles.len(), 4);
    let heights = [100i16, 200, 300, 400];
    for (tile, height) in tiles.iter().zip(heights) {
        let key = model.pyramid().transformed_key(tile);
        let path = services
            .files
            .tile_path(&key.cache_name, tile.level(), tile.row(), tile.column(), None);
        services
            .files
            .write(&key.cache_name, &path, &bil(height))
            .unwrap();
    }

    let everything = Sector::new(-10.0, 10.0, -10.0, 10.0);
    assert_eq!(model.request_sector(&everything, LevelHint::Level(0), glam::DVec3::ZERO), 4);
    assert_eq!(model.end_frame(), 4);
    while model.wait_for_completion().await {}
    assert_eq!(model.loaded_tiles(), 4);
    assert_eq!(model.epoch(), 4);
    assert_eq!(model.elevation(LatLon::new(-5.0, -5.0), 0), Some(100.0));

    let mut tessellator = Tessellator::new(TessellatorConfig::from_engine(&services.config));
    let density = tessellator.config().density;
    let report = tessellator.tessellate(&tiles, &model);
    assert_eq!(report.rebuilt, 4);
    // Each tile borders two others.
    assert_eq!(report.restitched_edges, 8);
    assert_eq!(report.uploads.len(), 4);

    for (tile, height) in tiles.iter().zip(heights) {
        let mesh = tessellator.mesh_for(tile).unwrap();
        let center = mesh.vertex_index(1 + density / 2, 1 + density / 2);
        let radius = mesh.world_position(center).length();
        assert!((radius - (services.config.globe_radius + f64::from(height))).abs() < 0.5);

        for edge in Edge::ALL {
            let neighbor = tile.coord().neighbor(edge);
            let expected_same_level = tiles.iter().any(|t| t.coord() == neighbor);
            assert_eq!(
                matches!(mesh.edge_stitch(edge), EdgeStitch::SameLevel { .. }),
                expected_same_level,
                "{} {edge:?}",
                tile.coord()
            );
        }
    }

    let steady = tessellator.tessellate(&tiles, &model);
    assert_eq!(steady.rebuilt, 0);
    assert_eq!(steady.restitched_edges, 0);
    assert!(steady.uploads.is_empty());
}
