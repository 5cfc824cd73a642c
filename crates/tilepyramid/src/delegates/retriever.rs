//! Network transport delegates.

use crate::error::{Error, Result};
use std::{fmt, future::Future, pin::Pin, sync::Arc};

/// Future type for retrievals.
pub type RetrieveFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Fetches the raw bytes of a remote tile.
///
/// Transport failures are reported as [`Error::Http`]; responses with a
/// non-success status as [`Error::HttpStatus`].
pub trait Retriever: Send + Sync + fmt::Debug {
    /// Name the retriever is configured by.
    fn name(&self) -> &'static str;

    /// Retrieve `url`.
    fn retrieve<'a>(&'a self, url: &'a str) -> RetrieveFuture<'a>;
}

/// Retrieves tiles over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpRetriever {
    http: reqwest::Client,
}

impl HttpRetriever {
    /// Create a retriever with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Create a retriever with a custom HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "fetching");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(data.to_vec())
    }
}

impl Retriever for HttpRetriever {
    fn name(&self) -> &'static str {
        "http"
    }

    fn retrieve<'a>(&'a self, url: &'a str) -> RetrieveFuture<'a> {
        Box::pin(self.fetch_bytes(url))
    }
}

/// A retriever for cache-only operation; every retrieval fails transiently.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRetriever;

impl Retriever for OfflineRetriever {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn retrieve<'a>(&'a self, _url: &'a str) -> RetrieveFuture<'a> {
        Box::pin(async { Err(Error::NetworkDisabled) })
    }
}

pub(crate) fn retriever_by_name(name: &str) -> Result<Arc<dyn Retriever>> {
    match name {
        "http" => Ok(Arc::new(HttpRetriever::new())),
        "offline" => Ok(Arc::new(OfflineRetriever)),
        other => Err(Error::config(format!("unknown retriever {other:?}"))),
    }
}
