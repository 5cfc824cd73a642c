//! Engine services shared by every layer.

use crate::{
    config::EngineConfig,
    disk::{DiskCacheCoordinator, FileStore},
    error::Result,
    loader::{InFlightRegistry, TileLoader},
    memory::TileMemoryCache,
    network::NetworkStatus,
};
use std::{sync::Arc, time::Duration};
use tokio::runtime::Handle;

/// Explicitly constructed services injected into layers and elevation
/// models.
///
/// Cloning shares the underlying services.
#[derive(Debug, Clone)]
pub struct Services {
    /// Engine settings.
    pub config: EngineConfig,
    /// Disk cache.
    pub files: Arc<FileStore>,
    /// Network availability.
    pub network: Arc<NetworkStatus>,
    /// Decoded payload cache.
    pub memory: TileMemoryCache,
    /// Keys being fetched by any layer.
    pub in_flight: InFlightRegistry,
    /// Runtime fetch tasks are spawned on.
    pub runtime: Handle,
}

impl Services {
    /// Create services with a fresh disk cache coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration is
    /// invalid.
    pub fn new(config: EngineConfig, runtime: Handle) -> Result<Self> {
        Self::with_coordinator(config, runtime, Arc::new(DiskCacheCoordinator::new()))
    }

    /// Create services sharing an existing disk cache coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration is
    /// invalid.
    pub fn with_coordinator(
        config: EngineConfig,
        runtime: Handle,
        coordinator: Arc<DiskCacheCoordinator>,
    ) -> Result<Self> {
        config.validate()?;
        let files = Arc::new(FileStore::new(config.cache_root.clone(), coordinator));
        let network = Arc::new(NetworkStatus::new(
            config.network_enabled,
            Duration::from_millis(config.host_retry_interval_ms),
        ));
        let memory = TileMemoryCache::with_max_size(config.memory_cache_bytes);
        tracing::info!(
            cache_root = %config.cache_root.display(),
            network_enabled = config.network_enabled,
            max_in_flight = config.max_in_flight,
            "engine services ready"
        );
        Ok(Self {
            config,
            files,
            network,
            memory,
            in_flight: InFlightRegistry::new(),
            runtime,
        })
    }

    /// A loader on the shared runtime that never fetches a key another
    /// loader from these services is already fetching.
    #[must_use]
    pub fn loader(&self) -> TileLoader {
        TileLoader::with_registry(
            self.runtime.clone(),
            self.config.max_in_flight,
            self.in_flight.clone(),
        )
    }
}
