//! A tile pyramid engine for rendering a globe from multi-resolution
//! imagery and elevation tiles.
//!
//! Tiles live in an implicit quadtree addressed by `(level, row, column)`.
//! The engine selects the tiles a view needs, fetches their payloads from
//! the disk cache or a tile server on a worker pool, keeps decoded payloads
//! and GPU resources under byte budgets, and tessellates elevation into
//! terrain meshes whose edges are stitched to their neighbors.
//!
//! # Design principles
//!
//! - **Owner thread**: Frame logic, GPU uploads and tessellation run on the
//!   thread that owns rendering; it never waits for a fetch
//! - **Worker pool**: Disk I/O, network retrieval and decoding run as tokio
//!   tasks, bounded per layer
//! - **Explicit services**: Caches, the disk cache coordinator and network
//!   status are constructed once and shared, never global statics
//! - **Named delegates**: Each pyramid's fetch pipeline is assembled from
//!   strategies named in its configuration
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use tilepyramid::{EngineConfig, Services, TileSourceConfig, TiledLayer};
//!
//! let services = Services::new(EngineConfig::default(), runtime.handle().clone())?;
//! let source = TileSourceConfig::from_path(Path::new("bmng.json"))?;
//! let mut layer = TiledLayer::new("bmng", &source, &services, gpu_cache, uploader)?;
//!
//! layer.begin_frame();
//! for visible in layer.visible_tiles(&view) {
//!     layer.ensure_resident(&visible.tile, visible.distance);
//! }
//! layer.end_frame();
//! ```

mod config;
pub mod delegates;
mod disk;
mod elevation;
mod error;
pub mod geo;
mod gpu;
mod key_transform;
mod layer;
mod layer_tree;
mod level;
mod loader;
mod memory;
mod network;
mod pyramid;
mod services;
pub mod tessellator;
mod tile;
mod view;

pub use config::{
    DelegateNames, ElevationSourceConfig, EngineConfig, PayloadKind, SampleEncoding,
    TileSourceConfig,
};
pub use disk::{DiskCacheCoordinator, FileStore, NamespaceToken};
pub use elevation::{ElevationModel, ElevationSampler};
pub use error::{Error, FailureKind, Result};
pub use geo::{EARTH_RADIUS, LatLon, Sector};
pub use gpu::{GpuResource, GpuResourceCache, GpuUploader};
pub use key_transform::{IdentityTransform, KeyTransform, NamespaceAlias};
pub use layer::{FrameStats, Residency, TiledLayer};
pub use layer_tree::{DerivedIndex, LayerKind, LayerNode};
pub use level::{GLOBAL_TILE_ORIGIN, Level, LevelSet};
pub use loader::{InFlightRegistry, Submission, TileLoader};
pub use memory::{TileMemoryCache, TilePayload};
pub use network::NetworkStatus;
pub use pyramid::{AbsentResourceList, LevelHint, TilePyramid, VisibleTile};
pub use services::Services;
pub use tessellator::{EdgeStitch, RenderInfo, TessellationReport, Tessellator, TessellatorConfig};
pub use tile::{Edge, Tile, TileCoord, TileKey};
pub use view::{Frustum, LodMetrics, View};

// Re-export decode types for convenience.
pub use tilepyramid_decode::{DecodedImage, ElevationEncoding, ElevationGrid, ImageFormat};

#[cfg(test)]
pub(crate) mod testing {
    use crate::{
        config::{DelegateNames, ElevationSourceConfig, PayloadKind, TileSourceConfig},
        geo::{LatLon, Sector},
        level::GLOBAL_TILE_ORIGIN,
    };

    /// An image source over `sector` with square level-zero tiles of `delta`
    /// degrees.
    pub(crate) fn test_config(num_levels: u32, delta: f64, sector: Sector) -> TileSourceConfig {
        TileSourceConfig {
            dataset: "test".to_string(),
            cache_name: "test-cache".to_string(),
            service: Some("http://tiles.test/{dataset}/{level}/{row}/{column}".to_string()),
            format_suffix: ".png".to_string(),
            level_zero_tile_delta: LatLon::new(delta, delta),
            tile_origin: GLOBAL_TILE_ORIGIN,
            sector,
            num_levels,
            num_empty_levels: 0,
            tile_width: 256,
            tile_height: 256,
            expiry_time_ms: None,
            payload: PayloadKind::Image,
            elevation: ElevationSourceConfig::default(),
            key_alias: None,
            delegates: DelegateNames::default(),
        }
    }
}
