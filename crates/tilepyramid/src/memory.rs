//! Decoded tile payloads and the in-memory payload cache.
//!
//! Decoded payloads wait here between the fetch completing and the owner
//! uploading them to the GPU. Elevation grids stay here for as long as the
//! elevation model samples them.

use crate::tile::TileKey;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, PoisonError, RwLock},
};
use tilepyramid_decode::{DecodedImage, ElevationGrid};

/// The decoded content of a tile.
#[derive(Debug, Clone, PartialEq)]
pub enum TilePayload {
    /// RGBA imagery.
    Image(DecodedImage),
    /// Elevation samples.
    Elevation(ElevationGrid),
}

impl TilePayload {
    /// Approximate heap size in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        match self {
            TilePayload::Image(image) => image.size_in_bytes(),
            TilePayload::Elevation(grid) => grid.size_in_bytes(),
        }
    }

    /// The image, if this is an image payload.
    #[must_use]
    pub fn as_image(&self) -> Option<&DecodedImage> {
        match self {
            TilePayload::Image(image) => Some(image),
            TilePayload::Elevation(_) => None,
        }
    }

    /// The elevation grid, if this is an elevation payload.
    #[must_use]
    pub fn as_elevation(&self) -> Option<&ElevationGrid> {
        match self {
            TilePayload::Elevation(grid) => Some(grid),
            TilePayload::Image(_) => None,
        }
    }
}

/// An in-memory cache of decoded payloads, keyed by transformed tile key.
///
/// The cache has an optional maximum size in bytes. When the limit is
/// exceeded, the oldest entries are evicted. Clones share the same storage.
#[derive(Debug, Clone)]
pub struct TileMemoryCache {
    data: Arc<RwLock<MemoryCacheInner>>,
    max_size: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    entries: HashMap<TileKey, Arc<TilePayload>>,
    /// Insertion order for eviction.
    order: VecDeque<TileKey>,
    current_size: usize,
}

impl Default for TileMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TileMemoryCache {
    /// Create a new memory cache with no size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_size: None,
        }
    }

    /// Create a new memory cache with a maximum size in bytes.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryCacheInner::default())),
            max_size: Some(max_size),
        }
    }

    /// Get the current size of cached data in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_size
    }

    /// Get the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a payload.
    #[must_use]
    pub fn get(&self, key: &TileKey) -> Option<Arc<TilePayload>> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(key)
            .cloned()
    }

    /// Check whether a payload is cached.
    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(key)
    }

    /// Store a payload, replacing any previous entry for the key.
    ///
    /// A payload larger than the whole cache is not stored.
    pub fn put(&self, key: TileKey, payload: Arc<TilePayload>) {
        let size = payload.size_in_bytes();
        if self.max_size.is_some_and(|max| size > max) {
            tracing::debug!(%key, size, "payload larger than memory cache, not cached");
            return;
        }

        let mut inner = self.data.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(old) = inner.entries.remove(&key) {
            inner.current_size -= old.size_in_bytes();
            inner.order.retain(|k| k != &key);
        }

        if let Some(max) = self.max_size {
            while inner.current_size + size > max {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                if let Some(evicted) = inner.entries.remove(&oldest) {
                    inner.current_size -= evicted.size_in_bytes();
                }
            }
        }

        inner.current_size += size;
        inner.order.push_back(key.clone());
        inner.entries.insert(key, payload);
    }

    /// Remove a payload.
    pub fn remove(&self, key: &TileKey) -> Option<Arc<TilePayload>> {
        let mut inner = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let removed = inner.entries.remove(key)?;
        inner.current_size -= removed.size_in_bytes();
        inner.order.retain(|k| k != key);
        Some(removed)
    }

    /// Remove every payload.
    pub fn clear(&self) {
        let mut inner = self.data.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        inner.order.clear();
        inner.current_size = 0;
    }
}
