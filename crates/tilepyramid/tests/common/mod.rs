//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tilepyramid::{
    DecodedImage, EngineConfig, GpuResource, GpuResourceCache, GpuUploader, Services, TileKey,
    TileSourceConfig,
    delegates::{DelegatePipeline, RetrieveFuture, Retriever},
};

/// Level 0 tiles of 10 degrees over `[-10, 10]` in both axes: a 2x2 grid.
pub const SOURCE_JSON: &str = r#"{
    "dataset": "bmng",
    "cache_name": "bmng",
    "service": "http://tiles.test/{dataset}/{level}/{row}/{column}.png",
    "format_suffix": ".png",
    "level_zero_tile_delta": { "lat": 10.0, "lon": 10.0 },
    "sector": { "min_lat": -10.0, "max_lat": 10.0, "min_lon": -10.0, "max_lon": 10.0 },
    "num_levels": 3
}"#;

pub fn source() -> TileSourceConfig {
    TileSourceConfig::from_json_str(SOURCE_JSON).unwrap()
}

pub fn services(cache_root: &Path) -> Services {
    services_with(cache_root, |_| {})
}

pub fn services_with(cache_root: &Path, configure: impl FnOnce(&mut EngineConfig)) -> Services {
    let mut config = EngineConfig {
        cache_root: cache_root.to_path_buf(),
        ..EngineConfig::default()
    };
    configure(&mut config);
    Services::new(config, tokio::runtime::Handle::current()).unwrap()
}

pub fn png_bytes(rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(4, 4, image::Rgba(rgba));
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[derive(Debug, Clone)]
pub enum MockResponse {
    Bytes(Vec<u8>),
    Status(u16),
}

/// Serves a fixed response and records call counts and concurrency.
#[derive(Debug)]
pub struct MockRetriever {
    response: MockResponse,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockRetriever {
    pub fn new(response: MockResponse) -> Arc<Self> {
        Self::with_delay(response, Duration::ZERO)
    }

    pub fn with_delay(response: MockResponse, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            response,
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Requested URLs in call order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Retriever for MockRetriever {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn retrieve<'a>(&'a self, url: &'a str) -> RetrieveFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            match &self.response {
                MockResponse::Bytes(data) => Ok(data.clone()),
                MockResponse::Status(status) => Err(tilepyramid::Error::HttpStatus {
                    url: url.to_string(),
                    status: *status,
                }),
            }
        })
    }
}

pub fn pipeline(
    config: &TileSourceConfig,
    services: &Services,
    retriever: Arc<MockRetriever>,
) -> DelegatePipeline {
    DelegatePipeline::from_config(
        config,
        Arc::clone(&services.files),
        Arc::clone(&services.network),
    )
    .unwrap()
    .with_retriever(retriever)
}

#[derive(Debug)]
pub struct MockTexture {
    pub bytes: usize,
}

impl GpuResource for MockTexture {
    fn size_in_bytes(&self) -> usize {
        self.bytes
    }
}

#[derive(Debug, Default)]
pub struct MockUploader {
    pub uploads: Vec<TileKey>,
}

impl GpuUploader for MockUploader {
    type Resource = MockTexture;

    fn upload_texture(
        &mut self,
        key: &TileKey,
        image: &DecodedImage,
    ) -> tilepyramid::Result<MockTexture> {
        self.uploads.push(key.clone());
        Ok(MockTexture {
            bytes: image.size_in_bytes(),
        })
    }
}

pub fn gpu_cache() -> Arc<GpuResourceCache<MockTexture>> {
    Arc::new(GpuResourceCache::new(1 << 20, 1 << 19, 30))
}
