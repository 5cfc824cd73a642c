//! Skirt vertex positions for the three edge treatments.

use super::{RenderInfo, TessellatorConfig, grid_location};
use crate::{
    geo::lat_lon_to_cartesian,
    tile::{Edge, TileCoord},
};
use glam::{DVec3, Vec3};
use std::fmt;

/// Why an edge could not be stitched to its neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum StitchError {
    MissingNeighbor(TileCoord),
    DensityMismatch { ours: usize, theirs: usize },
}

impl fmt::Display for StitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNeighbor(coord) => write!(f, "neighbor {coord} has no mesh"),
            Self::DensityMismatch { ours, theirs } => {
                write!(f, "density mismatch: {ours} vs neighbor's {theirs}")
            }
        }
    }
}

/// Skirt hanging below the tile's lowest surface point.
pub(super) fn default_skirt(info: &RenderInfo, edge: Edge, config: &TessellatorConfig) -> Vec<Vec3> {
    let n = info.density;
    let radius = config.globe_radius + info.skirt_elevation;
    (0..=n)
        .map(|k| {
            let (gi, gj) = match edge {
                Edge::West => (0, k),
                Edge::East => (n, k),
                Edge::South => (k, 0),
                Edge::North => (k, n),
            };
            let location = grid_location(&info.sector, n, gi, gj);
            let world = lat_lon_to_cartesian(location.lat, location.lon, radius);
            (world - info.reference_center).as_vec3()
        })
        .collect()
}

/// Skirt lying on a same-level neighbor's facing boundary.
pub(super) fn same_level_skirt(
    info: &RenderInfo,
    neighbor: &RenderInfo,
    edge: Edge,
) -> Result<Vec<Vec3>, StitchError> {
    check_density(info, neighbor)?;
    Ok(boundary_world(neighbor, edge.opposite())
        .into_iter()
        .map(|world| (world - info.reference_center).as_vec3())
        .collect())
}

/// Skirt following the half of a one-level-coarser neighbor's boundary this
/// tile borders.
///
/// Fine boundary point `k` sits at coarse parameter `offset + k` in half
/// steps: even parameters coincide with a coarse vertex, odd ones with the
/// midpoint of two.
pub(super) fn coarse_skirt(
    info: &RenderInfo,
    neighbor: &RenderInfo,
    edge: Edge,
) -> Result<Vec<Vec3>, StitchError> {
    check_density(info, neighbor)?;
    let n = info.density;
    let upper_half = match edge {
        Edge::West | Edge::East => info.coord.row.rem_euclid(2) == 1,
        Edge::South | Edge::North => info.coord.column.rem_euclid(2) == 1,
    };
    let offset = if upper_half { n } else { 0 };
    let coarse = boundary_world(neighbor, edge.opposite());

    Ok((0..=n)
        .map(|k| {
            let p = offset + k;
            let world = if p % 2 == 0 {
                coarse[p / 2]
            } else {
                (coarse[(p - 1) / 2] + coarse[(p + 1) / 2]) * 0.5
            };
            (world - info.reference_center).as_vec3()
        })
        .collect())
}

fn check_density(info: &RenderInfo, neighbor: &RenderInfo) -> Result<(), StitchError> {
    if info.density == neighbor.density {
        Ok(())
    } else {
        Err(StitchError::DensityMismatch {
            ours: info.density,
            theirs: neighbor.density,
        })
    }
}

fn boundary_world(info: &RenderInfo, edge: Edge) -> Vec<DVec3> {
    info.boundary_indices(edge)
        .into_iter()
        .map(|index| info.world_position(index))
        .collect()
}
