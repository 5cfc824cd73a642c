//! Terrain tessellation with crack-free skirts.
//!
//! Each tile becomes a `(n + 3) x (n + 3)` vertex grid: `(n + 1)^2` surface
//! vertices plus a one-vertex skirt ring around them. Vertices are `f32`
//! offsets from a per-tile `f64` reference center, which keeps precision at
//! planetary scale.
//!
//! Skirts close the gaps between adjacent meshes. By default a skirt hangs
//! below the tile. When the adjacent tile is in the same frame the skirt is
//! stitched to it instead:
//!
//! - same level: the skirt copies the neighbor's boundary vertices
//! - neighbor one level coarser: the skirt follows the coarse boundary,
//!   interpolating midpoints, over the half of it this tile borders
//!
//! A tile's surface is rebuilt only when its elevation samples change; an
//! edge is re-stitched only when the tile, its neighbor or the neighbor
//! choice changed.

mod skirts;

use crate::{
    config::EngineConfig,
    elevation::ElevationSampler,
    geo::{LatLon, Sector, lat_lon_to_cartesian},
    tile::{Edge, Tile, TileCoord},
};
use glam::{DVec3, Vec3};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Tessellation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TessellatorConfig {
    /// Cells per tile edge.
    pub density: usize,
    /// Depth of default skirts below the tile's lowest elevation, in meters.
    pub skirt_depth: f64,
    /// Elevation multiplier.
    pub vertical_exaggeration: f64,
    /// Frames a mesh survives without being used.
    pub retain_frames: u64,
    /// Globe radius in meters.
    pub globe_radius: f64,
}

impl TessellatorConfig {
    /// Tessellation settings of the engine configuration.
    #[must_use]
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            density: config.tessellation_density.max(1),
            skirt_depth: config.skirt_depth,
            vertical_exaggeration: config.vertical_exaggeration,
            retain_frames: config.mesh_retain_frames,
            globe_radius: config.globe_radius,
        }
    }
}

/// How an edge's skirt was last built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStitch {
    /// Hangs below the tile.
    Default,
    /// Copies a same-level neighbor's boundary at the given build generation.
    SameLevel {
        /// The neighbor.
        neighbor: TileCoord,
        /// The neighbor's build generation.
        generation: u64,
    },
    /// Follows a one-level-coarser neighbor's boundary.
    Coarse {
        /// The neighbor.
        neighbor: TileCoord,
        /// The neighbor's build generation.
        generation: u64,
    },
}

/// A tile's terrain mesh.
#[derive(Debug, Clone)]
pub struct RenderInfo {
    coord: TileCoord,
    sector: Sector,
    density: usize,
    reference_center: DVec3,
    vertices: Vec<Vec3>,
    indices: Arc<[u32]>,
    /// Surface samples in meters, `(density + 1)^2`, row-major from south-west.
    elevations: Vec<f64>,
    skirt_elevation: f64,
    elevation_epoch: u64,
    build_generation: u64,
    edges: [EdgeStitch; 4],
    last_used_frame: u64,
    vertex_revision: u64,
}

impl RenderInfo {
    /// The tile's coordinate.
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// The tile's sector.
    #[must_use]
    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Cells per edge.
    #[must_use]
    pub fn density(&self) -> usize {
        self.density
    }

    /// Vertices per grid row, skirts included.
    #[must_use]
    pub fn grid_width(&self) -> usize {
        self.density + 3
    }

    /// Origin of the vertex offsets.
    #[must_use]
    pub fn reference_center(&self) -> DVec3 {
        self.reference_center
    }

    /// Vertex offsets from the reference center.
    #[must_use]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Triangle indices, shared by all meshes of the same density.
    #[must_use]
    pub fn indices(&self) -> &Arc<[u32]> {
        &self.indices
    }

    /// How `edge`'s skirt is currently built.
    #[must_use]
    pub fn edge_stitch(&self, edge: Edge) -> EdgeStitch {
        self.edges[edge.index()]
    }

    /// Incremented every time the surface is rebuilt.
    #[must_use]
    pub fn build_generation(&self) -> u64 {
        self.build_generation
    }

    /// Incremented every time any vertex changes; re-upload when it moves.
    #[must_use]
    pub fn vertex_revision(&self) -> u64 {
        self.vertex_revision
    }

    /// World position of vertex `index`.
    #[must_use]
    pub fn world_position(&self, index: usize) -> DVec3 {
        self.reference_center + self.vertices[index].as_dvec3()
    }

    /// Vertex index of grid position `(i, j)`, skirt ring included.
    #[must_use]
    pub fn vertex_index(&self, i: usize, j: usize) -> usize {
        j * self.grid_width() + i
    }

    /// Surface boundary vertex indices along `edge`, west to east or south
    /// to north.
    #[must_use]
    pub fn boundary_indices(&self, edge: Edge) -> Vec<usize> {
        self.edge_indices(edge, 1)
    }

    /// Skirt vertex indices along `edge`, in the same order as the boundary.
    #[must_use]
    pub fn skirt_indices(&self, edge: Edge) -> Vec<usize> {
        self.edge_indices(edge, 0)
    }

    /// Indices along `edge` at `inset` rings from the outside.
    fn edge_indices(&self, edge: Edge, inset: usize) -> Vec<usize> {
        let n = self.density;
        let far = n + 2 - inset;
        (1..=n + 1)
            .map(|k| match edge {
                Edge::West => self.vertex_index(inset, k),
                Edge::East => self.vertex_index(far, k),
                Edge::South => self.vertex_index(k, inset),
                Edge::North => self.vertex_index(k, far),
            })
            .collect()
    }

    fn apply_skirt(&mut self, edge: Edge, positions: &[Vec3]) {
        for (index, position) in self.skirt_indices(edge).into_iter().zip(positions) {
            self.vertices[index] = *position;
        }
    }
}

/// Outcome of one [`Tessellator::tessellate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TessellationReport {
    /// Meshes whose surface was rebuilt.
    pub rebuilt: usize,
    /// Edges whose skirt was rebuilt.
    pub restitched_edges: usize,
    /// Meshes whose vertices changed and need uploading.
    pub uploads: Vec<TileCoord>,
    /// Meshes dropped for disuse.
    pub pruned: usize,
}

/// Builds and caches terrain meshes.
#[derive(Debug)]
pub struct Tessellator {
    config: TessellatorConfig,
    meshes: HashMap<TileCoord, RenderInfo>,
    index_cache: HashMap<usize, Arc<[u32]>>,
    frame: u64,
    next_generation: u64,
}

impl Tessellator {
    /// Create a tessellator.
    #[must_use]
    pub fn new(config: TessellatorConfig) -> Self {
        Self {
            config,
            meshes: HashMap::new(),
            index_cache: HashMap::new(),
            frame: 0,
            next_generation: 0,
        }
    }

    /// Tessellation settings.
    #[must_use]
    pub fn config(&self) -> &TessellatorConfig {
        &self.config
    }

    /// Number of cached meshes.
    #[must_use]
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// The cached mesh of `tile`, possibly from an earlier frame.
    #[must_use]
    pub fn mesh_for(&self, tile: &Tile) -> Option<&RenderInfo> {
        self.meshes.get(&tile.coord())
    }

    /// Build or refresh the meshes of this frame's tiles and stitch their
    /// edges.
    pub fn tessellate(
        &mut self,
        tiles: &[Tile],
        sampler: &dyn ElevationSampler,
    ) -> TessellationReport {
        self.frame += 1;
        let mut report = TessellationReport::default();
        let mut changed = HashSet::new();

        for tile in tiles {
            if self.build_or_reuse(tile, sampler) {
                report.rebuilt += 1;
                changed.insert(tile.coord());
            }
        }

        let current: HashSet<TileCoord> = tiles.iter().map(Tile::coord).collect();
        for tile in tiles {
            let coord = tile.coord();
            for edge in Edge::ALL {
                if self.stitch_edge(coord, edge, &current) {
                    report.restitched_edges += 1;
                    changed.insert(coord);
                }
            }
        }

        for coord in &changed {
            if let Some(info) = self.meshes.get_mut(coord) {
                info.vertex_revision += 1;
            }
        }
        report.uploads = changed.into_iter().collect();
        report.uploads.sort_unstable();

        let frame = self.frame;
        let retain = self.config.retain_frames;
        let before = self.meshes.len();
        self.meshes
            .retain(|_, info| frame - info.last_used_frame <= retain);
        report.pruned = before - self.meshes.len();

        if report.rebuilt > 0 || report.restitched_edges > 0 {
            tracing::debug!(
                tiles = tiles.len(),
                rebuilt = report.rebuilt,
                restitched_edges = report.restitched_edges,
                pruned = report.pruned,
                "tessellated terrain"
            );
        }
        report
    }

    /// Returns whether the mesh was rebuilt.
    fn build_or_reuse(&mut self, tile: &Tile, sampler: &dyn ElevationSampler) -> bool {
        let coord = tile.coord();
        let epoch = sampler.epoch();
        let frame = self.frame;
        let density = self.config.density;

        if let Some(info) = self.meshes.get_mut(&coord) {
            info.last_used_frame = frame;
            if info.elevation_epoch == epoch && info.density == density {
                return false;
            }
        }

        let previous = self
            .meshes
            .get(&coord)
            .filter(|info| info.density == density)
            .map(|info| info.elevations.as_slice());
        let elevations = sample_elevations(tile, density, sampler, previous);

        if let Some(info) = self.meshes.get_mut(&coord) {
            if info.density == density && info.elevations == elevations {
                info.elevation_epoch = epoch;
                return false;
            }
        }

        self.next_generation += 1;
        let indices = self.indices(density);
        let info = build_mesh(
            tile,
            &self.config,
            elevations,
            indices,
            epoch,
            self.next_generation,
            frame,
        );
        self.meshes.insert(coord, info);
        true
    }

    /// Returns whether the edge's skirt was rebuilt.
    fn stitch_edge(&mut self, coord: TileCoord, edge: Edge, current: &HashSet<TileCoord>) -> bool {
        let desired = self.desired_stitch(coord, edge, current);
        let Some(info) = self.meshes.get(&coord) else {
            return false;
        };
        if info.edge_stitch(edge) == desired {
            return false;
        }

        let stitched = match desired {
            EdgeStitch::Default => Ok(skirts::default_skirt(info, edge, &self.config)),
            EdgeStitch::SameLevel { neighbor, .. } => self
                .meshes
                .get(&neighbor)
                .ok_or(skirts::StitchError::MissingNeighbor(neighbor))
                .and_then(|n| skirts::same_level_skirt(info, n, edge)),
            EdgeStitch::Coarse { neighbor, .. } => self
                .meshes
                .get(&neighbor)
                .ok_or(skirts::StitchError::MissingNeighbor(neighbor))
                .and_then(|n| skirts::coarse_skirt(info, n, edge)),
        };
        let positions = stitched.unwrap_or_else(|e| {
            tracing::debug!(tile = %coord, ?edge, error = %e, "stitch failed, using default skirt");
            skirts::default_skirt(info, edge, &self.config)
        });

        let Some(info) = self.meshes.get_mut(&coord) else {
            return false;
        };
        info.apply_skirt(edge, &positions);
        info.edges[edge.index()] = desired;
        true
    }

    fn desired_stitch(&self, coord: TileCoord, edge: Edge, current: &HashSet<TileCoord>) -> EdgeStitch {
        let present = |coord: &TileCoord| {
            current
                .contains(coord)
                .then(|| self.meshes.get(coord))
                .flatten()
        };

        let same = coord.neighbor(edge);
        if let Some(neighbor) = present(&same) {
            return EdgeStitch::SameLevel {
                neighbor: same,
                generation: neighbor.build_generation,
            };
        }
        match coord
            .coarse_neighbor(edge)
            .and_then(|coarse| present(&coarse).map(|n| (coarse, n)))
        {
            Some((coarse, neighbor)) => EdgeStitch::Coarse {
                neighbor: coarse,
                generation: neighbor.build_generation,
            },
            None => EdgeStitch::Default,
        }
    }

    fn indices(&mut self, density: usize) -> Arc<[u32]> {
        Arc::clone(
            self.index_cache
                .entry(density)
                .or_insert_with(|| grid_indices(density + 3)),
        )
    }
}

/// Location of surface grid position `(gi, gj)`; the last row and column
/// land exactly on the sector edge.
fn grid_location(sector: &Sector, density: usize, gi: usize, gj: usize) -> LatLon {
    #[allow(clippy::cast_precision_loss)]
    let step = |k: usize| k as f64 / density as f64;
    let lat = if gj == density {
        sector.max_lat
    } else {
        sector.min_lat + sector.delta_lat() * step(gj)
    };
    let lon = if gi == density {
        sector.max_lon
    } else {
        sector.min_lon + sector.delta_lon() * step(gi)
    };
    LatLon::new(lat, lon)
}

/// Sample the surface grid, falling back to the previous samples and then
/// to sea level where the sampler has no data.
fn sample_elevations(
    tile: &Tile,
    density: usize,
    sampler: &dyn ElevationSampler,
    previous: Option<&[f64]>,
) -> Vec<f64> {
    let sector = tile.sector();
    let level = tile.level_number();
    let side = density + 1;
    let mut elevations = Vec::with_capacity(side * side);
    for gj in 0..side {
        for gi in 0..side {
            let location = grid_location(&sector, density, gi, gj);
            let elevation = sampler
                .elevation(location, level)
                .or_else(|| previous.map(|p| p[gj * side + gi]))
                .unwrap_or(0.0);
            elevations.push(elevation);
        }
    }
    elevations
}

fn build_mesh(
    tile: &Tile,
    config: &TessellatorConfig,
    elevations: Vec<f64>,
    indices: Arc<[u32]>,
    epoch: u64,
    generation: u64,
    frame: u64,
) -> RenderInfo {
    let n = config.density;
    let side = n + 1;
    let width = n + 3;
    let sector = tile.sector();
    let exaggeration = config.vertical_exaggeration;

    #[allow(clippy::cast_precision_loss)]
    let mean = elevations.iter().sum::<f64>() / elevations.len() as f64;
    let lowest = elevations.iter().copied().fold(f64::INFINITY, f64::min);
    let skirt_elevation = lowest * exaggeration - config.skirt_depth;

    let centroid = sector.centroid();
    let reference_center = lat_lon_to_cartesian(
        centroid.lat,
        centroid.lon,
        config.globe_radius + mean * exaggeration,
    );

    let mut vertices = Vec::with_capacity(width * width);
    for j in 0..width {
        for i in 0..width {
            let gi = i.saturating_sub(1).min(n);
            let gj = j.saturating_sub(1).min(n);
            let on_surface = (1..=n + 1).contains(&i) && (1..=n + 1).contains(&j);
            let height = if on_surface {
                elevations[gj * side + gi] * exaggeration
            } else {
                skirt_elevation
            };
            let location = grid_location(&sector, n, gi, gj);
            let world = lat_lon_to_cartesian(
                location.lat,
                location.lon,
                config.globe_radius + height,
            );
            vertices.push((world - reference_center).as_vec3());
        }
    }

    RenderInfo {
        coord: tile.coord(),
        sector,
        density: n,
        reference_center,
        vertices,
        indices,
        elevations,
        skirt_elevation,
        elevation_epoch: epoch,
        build_generation: generation,
        edges: [EdgeStitch::Default; 4],
        last_used_frame: frame,
        vertex_revision: 0,
    }
}

/// Two counter-clockwise triangles per grid cell.
fn grid_indices(width: usize) -> Arc<[u32]> {
    let mut indices = Vec::with_capacity((width - 1) * (width - 1) * 6);
    for j in 0..width - 1 {
        for i in 0..width - 1 {
            let a = u32::try_from(j * width + i).unwrap_or(u32::MAX);
            let b = a + 1;
            let c = a + u32::try_from(width).unwrap_or(u32::MAX);
            let d = c + 1;
            indices.extend_from_slice(&[a, b, d, a, d, c]);
        }
    }
    indices.into()
}
