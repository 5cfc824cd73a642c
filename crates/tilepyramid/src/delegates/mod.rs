//! The per-source fetch pipeline.
//!
//! A pipeline is composed of swappable delegates resolved by name from the
//! source configuration:
//!
//! - [`Requester`]: turns a request into deferred work, or resolves it on the
//!   spot
//! - [`Retriever`]: network transport
//! - [`PayloadReader`]s: specialty decoders tried before the generic image
//!   decoder
//! - [`Transformer`]s: post-decode processing applied in order
//! - [`TileFactory`]: creates the pyramid's tiles
//!
//! [`FetchContext::execute`] runs one fetch: disk cache first, then the
//! network with write-through to disk. It never returns an error; every
//! failure becomes a [`FetchOutcome`].

mod reader;
mod requester;
mod retriever;
mod tile_factory;
mod transformer;

pub use reader::{BilReader, DdsReader, GenericImageReader, PayloadReader, ReadContext, ReaderChain};
pub use requester::{DeferredRequester, MemoryFirstRequester, RequestContext, Requester};
pub use retriever::{HttpRetriever, OfflineRetriever, RetrieveFuture, Retriever};
pub use tile_factory::{QuadTileFactory, TileFactory};
pub use transformer::{ElevationScale, Grayscale, Invert, Transformer};

pub(crate) use reader::reader_by_name;
pub(crate) use requester::requester_by_name;
pub(crate) use retriever::retriever_by_name;
pub(crate) use tile_factory::tile_factory_by_name;
pub(crate) use transformer::transformer_by_name;

use crate::{
    config::TileSourceConfig,
    disk::FileStore,
    error::{Error, FailureKind, Result},
    memory::TilePayload,
    network::{self, NetworkStatus},
    pyramid::TilePyramid,
    tile::{Tile, TileKey},
};
use std::{path::PathBuf, sync::Arc, time::SystemTime};

/// Everything needed to fetch one tile.
#[derive(Debug, Clone)]
pub struct TileRequest {
    /// Transformed cache key.
    pub key: TileKey,
    /// The requested tile.
    pub tile: Tile,
    /// Disk cache location.
    pub local_path: PathBuf,
    /// Remote location, `None` for cache-only sources.
    pub url: Option<String>,
    /// Cached files older than this are ignored.
    pub expiry: Option<SystemTime>,
}

/// Deferred fetch work produced by a [`Requester`].
#[derive(Debug, Clone)]
pub struct FetchTask {
    /// The request to execute.
    pub request: TileRequest,
}

/// Result of a fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The payload was read or retrieved and decoded.
    Loaded(Arc<TilePayload>),
    /// The resource does not exist or cannot be decoded.
    Absent(Error),
    /// The fetch failed for a reason that may clear up; retry later.
    Failed(Error),
}

impl FetchOutcome {
    /// Classify an error by its [`FailureKind`].
    #[must_use]
    pub fn from_error(error: Error) -> Self {
        match error.failure_kind() {
            FailureKind::Permanent => FetchOutcome::Absent(error),
            FailureKind::Transient => FetchOutcome::Failed(error),
        }
    }
}

/// A finished fetch, delivered to the owner thread.
#[derive(Debug)]
pub struct Completion {
    /// Transformed cache key.
    pub key: TileKey,
    /// The fetched tile.
    pub tile: Tile,
    /// What happened.
    pub outcome: FetchOutcome,
}

/// Shared state for executing fetches on worker threads.
#[derive(Debug, Clone)]
pub struct FetchContext {
    retriever: Arc<dyn Retriever>,
    readers: ReaderChain,
    transformers: Vec<Arc<dyn Transformer>>,
    read: ReadContext,
    files: Arc<FileStore>,
    network: Arc<NetworkStatus>,
}

impl FetchContext {
    /// Decode bytes and apply the transformers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if no reader can decode the data.
    pub fn decode(&self, data: &[u8]) -> Result<TilePayload> {
        let payload = self.readers.read(&self.read, data)?;
        Ok(self
            .transformers
            .iter()
            .fold(payload, |payload, transformer| transformer.transform(payload)))
    }

    /// Fetch one tile: disk cache first, then the retriever.
    ///
    /// A cached file that fails to decode is deleted and the tile is
    /// retrieved again. Retrieved bytes are decoded and written to the disk
    /// cache concurrently; a failed write is logged and does not affect the
    /// outcome.
    pub async fn execute(self: Arc<Self>, request: TileRequest) -> FetchOutcome {
        match self.read_local(&request).await {
            Ok(Some(payload)) => {
                tracing::trace!(key = %request.key, "loaded from disk cache");
                return FetchOutcome::Loaded(Arc::new(payload));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %request.key, error = %e, "disk cache read failed"),
        }
        self.retrieve_remote(&request).await
    }

    async fn read_local(self: &Arc<Self>, request: &TileRequest) -> Result<Option<TilePayload>> {
        let ctx = Arc::clone(self);
        let request = request.clone();
        tokio::task::spawn_blocking(move || ctx.read_local_blocking(&request)).await?
    }

    fn read_local_blocking(&self, request: &TileRequest) -> Result<Option<TilePayload>> {
        let cache_name = &request.key.cache_name;
        let Some(data) = self
            .files
            .read(cache_name, &request.local_path, request.expiry)?
        else {
            return Ok(None);
        };

        match self.decode(&data) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                tracing::warn!(
                    path = %request.local_path.display(),
                    error = %e,
                    "corrupt cached tile, removing"
                );
                if let Err(e) = self.files.remove(cache_name, &request.local_path) {
                    tracing::warn!(error = %e, "failed to remove corrupt cached tile");
                }
                Ok(None)
            }
        }
    }

    async fn retrieve_remote(self: &Arc<Self>, request: &TileRequest) -> FetchOutcome {
        let Some(url) = request.url.as_deref() else {
            return FetchOutcome::from_error(Error::InvalidData {
                context: "tile source",
                detail: format!("{} is not cached and the source has no service", request.key),
            });
        };
        if !self.network.is_network_enabled() {
            return FetchOutcome::Failed(Error::NetworkDisabled);
        }
        if self.network.is_host_unavailable(url) {
            return FetchOutcome::Failed(Error::HostUnreachable {
                host: network::host_of(url).unwrap_or_else(|| url.to_string()),
            });
        }

        let data = match self.retriever.retrieve(url).await {
            Ok(data) => {
                self.network.host_available(url);
                Arc::new(data)
            }
            Err(e) => {
                if matches!(e, Error::Http { .. }) {
                    self.network.host_unavailable(url);
                }
                return FetchOutcome::from_error(e);
            }
        };

        let decode = {
            let ctx = Arc::clone(self);
            let data = Arc::clone(&data);
            tokio::task::spawn_blocking(move || ctx.decode(&data))
        };
        let write = {
            let files = Arc::clone(&self.files);
            let cache_name = Arc::clone(&request.key.cache_name);
            let path = request.local_path.clone();
            let data = Arc::clone(&data);
            tokio::task::spawn_blocking(move || files.write(&cache_name, &path, &data))
        };
        let (decoded, written) = tokio::join!(decode, write);
        let decoded = decoded.map_err(Error::from).and_then(|r| r);
        let written = written.map_err(Error::from).and_then(|r| r);

        match decoded {
            Ok(payload) => {
                if let Err(e) = written {
                    tracing::warn!(key = %request.key, error = %e, "write-through failed");
                }
                FetchOutcome::Loaded(Arc::new(payload))
            }
            Err(e) => {
                tracing::debug!(key = %request.key, error = %e, "retrieved tile failed to decode");
                if written.is_ok() {
                    let files = Arc::clone(&self.files);
                    let cache_name = Arc::clone(&request.key.cache_name);
                    let path = request.local_path.clone();
                    let removed =
                        tokio::task::spawn_blocking(move || files.remove(&cache_name, &path)).await;
                    if let Err(e) = removed.map_err(Error::from).and_then(|r| r) {
                        tracing::warn!(error = %e, "failed to remove undecodable tile");
                    }
                }
                FetchOutcome::from_error(e)
            }
        }
    }
}

/// The resolved delegates of one tile source.
#[derive(Debug, Clone)]
pub struct DelegatePipeline {
    requester: Arc<dyn Requester>,
    fetch: Arc<FetchContext>,
}

impl DelegatePipeline {
    /// Resolve the delegates named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a delegate name is unknown.
    pub fn from_config(
        config: &TileSourceConfig,
        files: Arc<FileStore>,
        network: Arc<NetworkStatus>,
    ) -> Result<Self> {
        let names = &config.delegates;
        let requester = requester_by_name(&names.requester)?;
        let retriever = retriever_by_name(&names.retriever)?;
        let specialty = names
            .readers
            .iter()
            .map(|name| reader_by_name(name))
            .collect::<Result<Vec<_>>>()?;
        let transformers = names
            .transformers
            .iter()
            .map(|name| transformer_by_name(name))
            .collect::<Result<Vec<_>>>()?;
        // Validated here so a bad name fails layer construction.
        tile_factory_by_name(&names.tile_factory)?;

        tracing::debug!(
            dataset = %config.dataset,
            requester = requester.name(),
            retriever = retriever.name(),
            readers = ?names.readers,
            transformers = ?names.transformers,
            "resolved delegate pipeline"
        );

        Ok(Self {
            requester,
            fetch: Arc::new(FetchContext {
                retriever,
                readers: ReaderChain::new(specialty),
                transformers,
                read: ReadContext::from_config(config),
                files,
                network,
            }),
        })
    }

    /// Replace the retriever.
    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        let mut fetch = (*self.fetch).clone();
        fetch.retriever = retriever;
        self.fetch = Arc::new(fetch);
        self
    }

    /// Replace the requester.
    #[must_use]
    pub fn with_requester(mut self, requester: Arc<dyn Requester>) -> Self {
        self.requester = requester;
        self
    }

    /// The requester.
    #[must_use]
    pub fn requester(&self) -> &Arc<dyn Requester> {
        &self.requester
    }

    /// Shared fetch state, cloned into worker tasks.
    #[must_use]
    pub fn fetch_context(&self) -> &Arc<FetchContext> {
        &self.fetch
    }

    /// Build the request for `tile` under its transformed key.
    #[must_use]
    pub fn make_request(&self, pyramid: &TilePyramid, tile: &Tile) -> TileRequest {
        let key = pyramid.transformed_key(tile);
        let level = tile.level();
        let local_path =
            self.fetch
                .files
                .tile_path(&key.cache_name, level, tile.row(), tile.column(), None);
        TileRequest {
            url: level.tile_url(tile.row(), tile.column()),
            expiry: level.expiry_time(),
            local_path,
            key,
            tile: tile.clone(),
        }
    }
}
