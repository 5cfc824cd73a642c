//! Tiles, their grid coordinates and cache keys.

use crate::{geo::Sector, level::Level};
use std::{fmt, sync::Arc};

/// Position of a tile in the pyramid grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Level number.
    pub level: u32,
    /// Row, counted north from the tiling origin.
    pub row: i32,
    /// Column, counted east from the tiling origin.
    pub column: i32,
}

/// One of the four edges of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Western edge.
    West,
    /// Eastern edge.
    East,
    /// Southern edge.
    South,
    /// Northern edge.
    North,
}

impl Edge {
    /// All edges.
    pub const ALL: [Edge; 4] = [Edge::West, Edge::East, Edge::South, Edge::North];

    /// The edge facing this one across the boundary.
    #[must_use]
    pub fn opposite(self) -> Edge {
        match self {
            Edge::West => Edge::East,
            Edge::East => Edge::West,
            Edge::South => Edge::North,
            Edge::North => Edge::South,
        }
    }

    /// Index into per-edge arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Edge::West => 0,
            Edge::East => 1,
            Edge::South => 2,
            Edge::North => 3,
        }
    }
}

impl TileCoord {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(level: u32, row: i32, column: i32) -> Self {
        Self { level, row, column }
    }

    /// The coordinate covering this one on the next coarser level.
    #[must_use]
    pub fn parent(&self) -> Option<TileCoord> {
        (self.level > 0).then(|| {
            TileCoord::new(
                self.level - 1,
                self.row.div_euclid(2),
                self.column.div_euclid(2),
            )
        })
    }

    /// Children in `[SW, SE, NW, NE]` order.
    #[must_use]
    pub fn children(&self) -> [TileCoord; 4] {
        let (r, c, l) = (self.row * 2, self.column * 2, self.level + 1);
        [
            TileCoord::new(l, r, c),
            TileCoord::new(l, r, c + 1),
            TileCoord::new(l, r + 1, c),
            TileCoord::new(l, r + 1, c + 1),
        ]
    }

    /// The same-level neighbor across `edge`.
    #[must_use]
    pub fn neighbor(&self, edge: Edge) -> TileCoord {
        let (dr, dc) = match edge {
            Edge::West => (0, -1),
            Edge::East => (0, 1),
            Edge::South => (-1, 0),
            Edge::North => (1, 0),
        };
        TileCoord::new(self.level, self.row + dr, self.column + dc)
    }

    /// The one-level-coarser tile sharing `edge`, if that edge lies on the
    /// parent's boundary.
    ///
    /// Only the outer edges of a sibling group touch a coarser neighbor: the
    /// west edge of an even column, the east edge of an odd column, the south
    /// edge of an even row and the north edge of an odd row.
    #[must_use]
    pub fn coarse_neighbor(&self, edge: Edge) -> Option<TileCoord> {
        let parent = self.parent()?;
        let even_row = self.row.rem_euclid(2) == 0;
        let even_column = self.column.rem_euclid(2) == 0;
        match edge {
            Edge::West if even_column => Some(parent.neighbor(Edge::West)),
            Edge::East if !even_column => Some(parent.neighbor(Edge::East)),
            Edge::South if even_row => Some(parent.neighbor(Edge::South)),
            Edge::North if !even_row => Some(parent.neighbor(Edge::North)),
            _ => None,
        }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.row, self.column)
    }
}

/// Identity of a tile's cached resources.
///
/// Two tiles with equal keys share disk, memory and GPU cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Level number.
    pub level: u32,
    /// Row.
    pub row: i32,
    /// Column.
    pub column: i32,
    /// Cache namespace.
    pub cache_name: Arc<str>,
}

impl TileKey {
    /// Create a key.
    #[must_use]
    pub fn new(coord: TileCoord, cache_name: Arc<str>) -> Self {
        Self {
            level: coord.level,
            row: coord.row,
            column: coord.column,
            cache_name,
        }
    }

    /// Grid coordinate of the key.
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        TileCoord::new(self.level, self.row, self.column)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cache_name, self.coord())
    }
}

/// A tile of a pyramid: a sector at a given level.
///
/// Tiles are plain values. Their decoded payloads and GPU resources live in
/// the caches, keyed by [`TileKey`].
#[derive(Debug, Clone)]
pub struct Tile {
    level: Arc<Level>,
    row: i32,
    column: i32,
    sector: Sector,
}

impl Tile {
    /// Create the tile at `(row, column)` of `level`.
    #[must_use]
    pub fn new(level: Arc<Level>, row: i32, column: i32) -> Self {
        let sector = level.tile_sector(row, column);
        Self {
            level,
            row,
            column,
            sector,
        }
    }

    /// Create a tile with an explicit sector.
    ///
    /// Used when splitting, where child sectors come from bisecting the
    /// parent rather than from the grid.
    #[must_use]
    pub fn with_sector(level: Arc<Level>, row: i32, column: i32, sector: Sector) -> Self {
        Self {
            level,
            row,
            column,
            sector,
        }
    }

    /// The tile's level.
    #[must_use]
    pub fn level(&self) -> &Arc<Level> {
        &self.level
    }

    /// Level number.
    #[must_use]
    pub fn level_number(&self) -> u32 {
        self.level.number()
    }

    /// Row.
    #[must_use]
    pub fn row(&self) -> i32 {
        self.row
    }

    /// Column.
    #[must_use]
    pub fn column(&self) -> i32 {
        self.column
    }

    /// Covered region.
    #[must_use]
    pub fn sector(&self) -> Sector {
        self.sector
    }

    /// Grid coordinate.
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        TileCoord::new(self.level.number(), self.row, self.column)
    }

    /// Key before any key transform is applied.
    #[must_use]
    pub fn natural_key(&self) -> TileKey {
        TileKey::new(self.coord(), Arc::clone(self.level.cache_name()))
    }
}

impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.coord() == other.coord() && self.level.cache_name() == other.level.cache_name()
    }
}

impl Eq for Tile {}
