//! Tile factories create the tiles of a pyramid.

use crate::{
    error::{Error, Result},
    level::Level,
    tile::Tile,
};
use std::{fmt, sync::Arc};

/// Creates tiles for a pyramid.
pub trait TileFactory: Send + Sync + fmt::Debug {
    /// Create the tile at `(row, column)` of `level`.
    fn create_tile(&self, level: &Arc<Level>, row: i32, column: i32) -> Tile;

    /// Create the four children of `parent` on `next`, in `[SW, SE, NW, NE]`
    /// order.
    fn split(&self, parent: &Tile, next: &Arc<Level>) -> [Tile; 4];
}

/// Creates grid-aligned tiles and splits them by angular bisection.
///
/// Child sectors come from bisecting the parent, and child rows/columns from
/// doubling the parent's, so children always tile their parent exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadTileFactory;

impl TileFactory for QuadTileFactory {
    fn create_tile(&self, level: &Arc<Level>, row: i32, column: i32) -> Tile {
        Tile::new(Arc::clone(level), row, column)
    }

    fn split(&self, parent: &Tile, next: &Arc<Level>) -> [Tile; 4] {
        let sectors = parent.sector().subdivide();
        let coords = parent.coord().children();
        std::array::from_fn(|i| {
            Tile::with_sector(Arc::clone(next), coords[i].row, coords[i].column, sectors[i])
        })
    }
}

pub(crate) fn tile_factory_by_name(name: &str) -> Result<Arc<dyn TileFactory>> {
    match name {
        "default" | "quad" => Ok(Arc::new(QuadTileFactory)),
        other => Err(Error::config(format!("unknown tile factory {other:?}"))),
    }
}
