//! GPU residency cache.
//!
//! Uploaded textures are kept under a byte budget. The owner advances the
//! frame counter once per frame; eviction prefers entries idle for at least
//! `settle_frames` frames, then falls back to any entry not used in the
//! current frame. Entries used in the current frame are never evicted, so a
//! tile cannot lose its texture between being selected and being drawn.

use crate::{error::Result, tile::TileKey};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tilepyramid_decode::DecodedImage;

/// A resource living on the GPU.
pub trait GpuResource: Send + Sync {
    /// Bytes of GPU memory the resource occupies.
    fn size_in_bytes(&self) -> usize;
}

/// Uploads decoded images to the GPU.
///
/// Implemented by the renderer; called only from the thread owning the GPU
/// context.
pub trait GpuUploader {
    /// The resource type produced by uploads.
    type Resource: GpuResource;

    /// Upload `image` as the texture of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails.
    fn upload_texture(&mut self, key: &TileKey, image: &DecodedImage) -> Result<Self::Resource>;
}

#[derive(Debug)]
struct GpuEntry<R> {
    resource: Arc<R>,
    size: usize,
    last_frame: u64,
    last_touch: u64,
}

#[derive(Debug)]
struct GpuCacheInner<R> {
    entries: HashMap<TileKey, GpuEntry<R>>,
    used: usize,
    frame: u64,
    touch: u64,
}

/// A byte-budgeted cache of GPU resources keyed by transformed tile key.
#[derive(Debug)]
pub struct GpuResourceCache<R> {
    inner: Mutex<GpuCacheInner<R>>,
    capacity: usize,
    low_water: usize,
    settle_frames: u64,
}

impl<R: GpuResource> GpuResourceCache<R> {
    /// Create a cache with a byte budget.
    ///
    /// When an insert overflows the budget, eviction continues until the
    /// cache would hold at most `low_water` bytes including the new entry.
    #[must_use]
    pub fn new(capacity: usize, low_water: usize, settle_frames: u64) -> Self {
        Self {
            inner: Mutex::new(GpuCacheInner {
                entries: HashMap::new(),
                used: 0,
                frame: 0,
                touch: 0,
            }),
            capacity,
            low_water: low_water.min(capacity),
            settle_frames,
        }
    }

    /// Start a new frame. Returns the new frame number.
    pub fn begin_frame(&self) -> u64 {
        let mut inner = self.lock();
        inner.frame += 1;
        inner.frame
    }

    /// Current frame number.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.lock().frame
    }

    /// Byte budget.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently in use.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.lock().used
    }

    /// Number of cached resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is resident, without marking it used.
    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Get a resource and mark it used in the current frame.
    #[must_use]
    pub fn get(&self, key: &TileKey) -> Option<Arc<R>> {
        let mut inner = self.lock();
        inner.touch += 1;
        let (frame, touch) = (inner.frame, inner.touch);
        let entry = inner.entries.get_mut(key)?;
        entry.last_frame = frame;
        entry.last_touch = touch;
        Some(Arc::clone(&entry.resource))
    }

    /// Insert a resource, marking it used in the current frame.
    ///
    /// Returns `false` if the budget cannot be met without evicting entries
    /// used in the current frame; the resource is dropped in that case.
    pub fn put(&self, key: TileKey, resource: R) -> bool {
        let size = resource.size_in_bytes();
        if size > self.capacity {
            tracing::warn!(%key, size, capacity = self.capacity, "resource exceeds GPU budget");
            return false;
        }

        let mut inner = self.lock();
        if let Some(old) = inner.entries.remove(&key) {
            inner.used -= old.size;
        }

        if inner.used + size > self.capacity {
            let target = self.low_water.saturating_sub(size);
            self.evict(&mut inner, target);
            if inner.used + size > self.capacity {
                tracing::debug!(
                    %key,
                    used = inner.used,
                    "GPU budget held by current-frame resources, upload rejected"
                );
                return false;
            }
        }

        inner.touch += 1;
        let entry = GpuEntry {
            resource: Arc::new(resource),
            size,
            last_frame: inner.frame,
            last_touch: inner.touch,
        };
        inner.used += size;
        inner.entries.insert(key, entry);
        true
    }

    /// Remove a resource.
    pub fn remove(&self, key: &TileKey) -> Option<Arc<R>> {
        let mut inner = self.lock();
        let entry = inner.entries.remove(key)?;
        inner.used -= entry.size;
        Some(entry.resource)
    }

    /// Remove every resource.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.used = 0;
    }

    /// Evict until `used <= target` or no candidates remain.
    fn evict(&self, inner: &mut GpuCacheInner<R>, target: usize) {
        let frame = inner.frame;
        let settle = self.settle_frames;

        // (tier, last_touch): settled entries first, then least recently used.
        let mut candidates: Vec<(u8, u64, TileKey)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.last_frame < frame)
            .map(|(key, entry)| {
                let tier = u8::from(frame - entry.last_frame < settle);
                (tier, entry.last_touch, key.clone())
            })
            .collect();
        candidates.sort_unstable_by_key(|(tier, touch, _)| (*tier, *touch));

        let mut evicted = 0usize;
        for (_, _, key) in candidates {
            if inner.used <= target {
                break;
            }
            if let Some(entry) = inner.entries.remove(&key) {
                inner.used -= entry.size;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, used = inner.used, "evicted GPU resources");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GpuCacheInner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
