//! Network availability tracking.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Global network switch plus per-host reachability.
///
/// A host that fails with a transport error is skipped for `retry_interval`
/// before requests to it are attempted again.
#[derive(Debug)]
pub struct NetworkStatus {
    enabled: AtomicBool,
    unavailable_hosts: Mutex<HashMap<String, Instant>>,
    retry_interval: Duration,
}

impl NetworkStatus {
    /// Create a status with network access enabled or not.
    #[must_use]
    pub fn new(enabled: bool, retry_interval: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            unavailable_hosts: Mutex::new(HashMap::new()),
            retry_interval,
        }
    }

    /// Whether remote retrieval is allowed.
    #[must_use]
    pub fn is_network_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Allow or forbid remote retrieval.
    pub fn set_network_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "network retrieval toggled");
    }

    /// Whether the host of `url` is known to be unreachable.
    ///
    /// Markers older than the retry interval are dropped, letting the next
    /// request through.
    #[must_use]
    pub fn is_host_unavailable(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        let mut hosts = self
            .unavailable_hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match hosts.get(&host) {
            Some(since) if since.elapsed() < self.retry_interval => true,
            Some(_) => {
                hosts.remove(&host);
                false
            }
            None => false,
        }
    }

    /// Record a transport failure for the host of `url`.
    pub fn host_unavailable(&self, url: &str) {
        if let Some(host) = host_of(url) {
            tracing::warn!(host, "host unreachable");
            self.unavailable_hosts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(host, Instant::now());
        }
    }

    /// Record a successful request to the host of `url`.
    pub fn host_available(&self, url: &str) {
        if let Some(host) = host_of(url) {
            let removed = self
                .unavailable_hosts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&host);
            if removed.is_some() {
                tracing::info!(host, "host reachable again");
            }
        }
    }
}

pub(crate) fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_marked_and_cleared() {
        let status = NetworkStatus::new(true, Duration::from_secs(60));
        let url = "https://tiles.example.com/a/1/2/3";
        assert!(!status.is_host_unavailable(url));

        status.host_unavailable(url);
        assert!(status.is_host_unavailable(url));
        assert!(status.is_host_unavailable("https://tiles.example.com/other"));
        assert!(!status.is_host_unavailable("https://elsewhere.example.com/"));

        status.host_available(url);
        assert!(!status.is_host_unavailable(url));
    }

    #[test]
    fn test_marker_expires_after_retry_interval() {
        let status = NetworkStatus::new(true, Duration::ZERO);
        let url = "https://tiles.example.com/a";
        status.host_unavailable(url);
        assert!(!status.is_host_unavailable(url));
    }

    #[test]
    fn test_network_toggle() {
        let status = NetworkStatus::new(false, Duration::from_secs(1));
        assert!(!status.is_network_enabled());
        status.set_network_enabled(true);
        assert!(status.is_network_enabled());
    }
}
