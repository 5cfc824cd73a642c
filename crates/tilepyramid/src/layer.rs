//! Imagery layers: a pyramid, its fetch pipeline and GPU residency.

use crate::{
    config::{PayloadKind, TileSourceConfig},
    delegates::{Completion, DelegatePipeline, FetchOutcome},
    error::{Error, Result},
    gpu::{GpuResourceCache, GpuUploader},
    loader::TileLoader,
    memory::TileMemoryCache,
    pyramid::{TilePyramid, VisibleTile},
    services::Services,
    tile::Tile,
    view::View,
};
use std::sync::Arc;

/// Residency state of a tile after [`TiledLayer::ensure_resident`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// The texture is on the GPU.
    Resident,
    /// A fetch or upload is pending; render a placeholder.
    Pending,
    /// The resource does not exist; render without it.
    Absent,
}

/// Per-frame counters of a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Completions applied at the start of the frame.
    pub completed: usize,
    /// Completions that marked a resource absent.
    pub absent: usize,
    /// Completions that failed transiently.
    pub failed: usize,
}

/// A tiled imagery layer.
///
/// Driven from the thread owning the GPU context:
/// [`begin_frame`](Self::begin_frame), then
/// [`visible_tiles`](Self::visible_tiles) and
/// [`ensure_resident`](Self::ensure_resident) for each tile to draw, then
/// [`end_frame`](Self::end_frame).
pub struct TiledLayer<U: GpuUploader> {
    name: String,
    pyramid: TilePyramid,
    pipeline: DelegatePipeline,
    loader: TileLoader,
    memory: TileMemoryCache,
    gpu: Arc<GpuResourceCache<U::Resource>>,
    uploader: U,
}

impl<U: GpuUploader> TiledLayer<U> {
    /// Build a layer from a tile source configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, names an
    /// unknown delegate, or describes elevation rather than imagery.
    pub fn new(
        name: impl Into<String>,
        config: &TileSourceConfig,
        services: &Services,
        gpu: Arc<GpuResourceCache<U::Resource>>,
        uploader: U,
    ) -> Result<Self> {
        if config.payload != PayloadKind::Image {
            return Err(Error::config(format!(
                "layer source {:?} does not produce imagery",
                config.dataset
            )));
        }
        let pyramid = TilePyramid::from_config(config, services.config.globe_radius)?;
        let pipeline = DelegatePipeline::from_config(
            config,
            Arc::clone(&services.files),
            Arc::clone(&services.network),
        )?;
        Ok(Self::with_pipeline(
            name, pyramid, pipeline, services, gpu, uploader,
        ))
    }

    /// Build a layer from an already resolved pyramid and pipeline.
    #[must_use]
    pub fn with_pipeline(
        name: impl Into<String>,
        pyramid: TilePyramid,
        pipeline: DelegatePipeline,
        services: &Services,
        gpu: Arc<GpuResourceCache<U::Resource>>,
        uploader: U,
    ) -> Self {
        Self {
            name: name.into(),
            pyramid,
            pipeline,
            loader: services.loader(),
            memory: services.memory.clone(),
            gpu,
            uploader,
        }
    }

    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The layer's pyramid.
    #[must_use]
    pub fn pyramid(&self) -> &TilePyramid {
        &self.pyramid
    }

    /// The layer's loader.
    #[must_use]
    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    /// The GPU uploader.
    pub fn uploader_mut(&mut self) -> &mut U {
        &mut self.uploader
    }

    /// Apply finished fetches and drop last frame's undispatched requests.
    pub fn begin_frame(&mut self) -> FrameStats {
        let mut stats = FrameStats::default();
        for completion in self.loader.drain_completions() {
            self.apply_completion(completion, &mut stats);
        }
        self.loader.clear_queue();
        stats
    }

    /// Tiles to draw for `view`, nearest first.
    #[must_use]
    pub fn visible_tiles(&self, view: &View) -> Vec<VisibleTile> {
        self.pyramid.visible_tiles(view)
    }

    /// Make the texture of `tile` resident, requesting it if necessary.
    ///
    /// `priority` is the tile's distance from the eye; nearer tiles are
    /// fetched first.
    pub fn ensure_resident(&mut self, tile: &Tile, priority: f64) -> Residency {
        let key = self.pyramid.transformed_key(tile);
        if self.gpu.get(&key).is_some() {
            return Residency::Resident;
        }

        if let Some(payload) = self.memory.get(&key) {
            let Some(image) = payload.as_image() else {
                tracing::warn!(layer = %self.name, %key, "payload is not an image");
                self.memory.remove(&key);
                self.pyramid.mark_key_absent(key);
                return Residency::Absent;
            };
            return match self.uploader.upload_texture(&key, image) {
                Ok(resource) => {
                    if self.gpu.put(key.clone(), resource) {
                        // The GPU copy replaces the decoded one.
                        self.memory.remove(&key);
                        Residency::Resident
                    } else {
                        Residency::Pending
                    }
                }
                Err(e) => {
                    tracing::warn!(layer = %self.name, %key, error = %e, "texture upload failed");
                    self.memory.remove(&key);
                    self.pyramid.mark_key_absent(key);
                    Residency::Absent
                }
            };
        }

        if self.pyramid.is_key_absent(&key) {
            return Residency::Absent;
        }

        let request = self.pipeline.make_request(&self.pyramid, tile);
        let submission = self
            .loader
            .submit(&self.pipeline, request, priority, &self.memory);
        tracing::trace!(layer = %self.name, %key, ?submission, "requested tile");
        Residency::Pending
    }

    /// Resident texture of `tile`, if any.
    #[must_use]
    pub fn texture(&self, tile: &Tile) -> Option<Arc<U::Resource>> {
        self.gpu.get(&self.pyramid.transformed_key(tile))
    }

    /// Dispatch this frame's requests. Returns the number started.
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
        self.apply_completion(completion, &mut FrameStats::default());
        true
    }

    /// Forget every absent marker, e.g. after the cache namespace's content
    /// changed.
    pub fn clear_absent_markers(&self) {
        self.pyramid.clear_all_absent();
    }

    /// Point the layer at a new tile source, typically a different cache
    /// namespace.
    ///
    /// The pyramid is rebuilt, so it starts without absent markers. Fetches
    /// already in flight still complete into the shared memory cache under
    /// their old keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] under the same conditions as
    /// [`TiledLayer::new`]; the layer is left unchanged.
    pub fn reconfigure(&mut self, config: &TileSourceConfig, services: &Services) -> Result<()> {
        if config.payload != PayloadKind::Image {
            return Err(Error::config(format!(
                "layer source {:?} does not produce imagery",
                config.dataset
            )));
        }
        let pyramid = TilePyramid::from_config(config, services.config.globe_radius)?;
        let pipeline = DelegatePipeline::from_config(
            config,
            Arc::clone(&services.files),
            Arc::clone(&services.network),
        )?;
        tracing::info!(
            layer = %self.name,
            cache_name = %config.cache_name,
            absent_cleared = self.pyramid.absent_resources().len(),
            "layer reconfigured"
        );
        self.pyramid = pyramid;
        self.pipeline = pipeline;
        self.loader.clear_queue();
        Ok(())
    }

    fn apply_completion(&mut self, completion: Completion, stats: &mut FrameStats) {
        stats.completed += 1;
        let Completion { key, outcome, .. } = completion;
        match outcome {
            FetchOutcome::Loaded(payload) => self.memory.put(key, payload),
            FetchOutcome::Absent(e) => {
                stats.absent += 1;
                tracing::debug!(layer = %self.name, %key, error = %e, "tile unavailable");
                self.pyramid.mark_key_absent(key);
            }
            FetchOutcome::Failed(e) => {
                stats.failed += 1;
                tracing::warn!(layer = %self.name, %key, error = %e, "tile fetch failed, will retry");
            }
        }
    }
}
