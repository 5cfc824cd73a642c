//! Disk cache: namespace coordination and the file store.
//!
//! Every cache namespace has exactly one [`NamespaceToken`], handed out by the
//! [`DiskCacheCoordinator`]. All file I/O inside a namespace happens while
//! holding its token, so pyramids sharing a namespace never interleave writes
//! to the same files.

use crate::{
    error::{Error, Result},
    level::Level,
};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

/// Serializes disk access within one cache namespace.
#[derive(Debug)]
pub struct NamespaceToken {
    name: Arc<str>,
    lock: Mutex<()>,
}

impl NamespaceToken {
    /// Directory name of the namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hold the namespace for the lifetime of the guard.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out one shared token per cache namespace.
#[derive(Debug, Default)]
pub struct DiskCacheCoordinator {
    tokens: Mutex<HashMap<Arc<str>, Arc<NamespaceToken>>>,
}

impl DiskCacheCoordinator {
    /// Create a coordinator with no namespaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The token of `namespace`, created on first use.
    ///
    /// Tokens are keyed by the namespace's directory name, so names that map
    /// to the same directory share a token. Concurrent first requests for
    /// the same namespace receive the same token.
    #[must_use]
    pub fn token(&self, namespace: &str) -> Arc<NamespaceToken> {
        let directory = sanitize(namespace);
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = tokens.get(directory.as_str()) {
            return Arc::clone(token);
        }
        let name: Arc<str> = Arc::from(directory);
        let token = Arc::new(NamespaceToken {
            name: Arc::clone(&name),
            lock: Mutex::new(()),
        });
        tokens.insert(name, Arc::clone(&token));
        tracing::debug!(namespace, "registered cache namespace");
        token
    }

    /// Number of namespaces seen so far.
    #[must_use]
    pub fn namespace_count(&self) -> usize {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Reads and writes cached tile files under a root directory.
///
/// Methods block; the fetch pipeline calls them from blocking worker threads.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    coordinator: Arc<DiskCacheCoordinator>,
}

impl FileStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, coordinator: Arc<DiskCacheCoordinator>) -> Self {
        Self {
            root: root.into(),
            coordinator,
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The shared namespace coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<DiskCacheCoordinator> {
        &self.coordinator
    }

    /// Deterministic cache path of a tile.
    ///
    /// The layout is
    /// `root/<namespace>/<service>/<dataset>/<level>/<row>/<row>_<column>[.<context>]<suffix>`,
    /// where `<service>` is the sanitized host of the service template, or
    /// `local` for sources without one.
    #[must_use]
    pub fn tile_path(
        &self,
        cache_name: &str,
        level: &Level,
        row: i32,
        column: i32,
        context: Option<&str>,
    ) -> PathBuf {
        let service = level
            .service()
            .and_then(|template| {
                reqwest::Url::parse(&template.replace(['{', '}'], ""))
                    .ok()
                    .and_then(|url| url.host_str().map(sanitize))
            })
            .unwrap_or_else(|| "local".to_string());

        let mut file_name = format!("{row}_{column}");
        if let Some(context) = context {
            file_name.push('.');
            file_name.push_str(&sanitize(context));
        }
        file_name.push_str(level.format_suffix());

        self.root
            .join(sanitize(cache_name))
            .join(service)
            .join(sanitize(level.dataset()))
            .join(level.number().to_string())
            .join(row.to_string())
            .join(file_name)
    }

    /// Read a cached file.
    ///
    /// Returns `Ok(None)` if the file does not exist or was last modified
    /// before `expiry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file exists but cannot be read.
    pub fn read(
        &self,
        cache_name: &str,
        path: &Path,
        expiry: Option<SystemTime>,
    ) -> Result<Option<Vec<u8>>> {
        let token = self.coordinator.token(cache_name);
        let _guard = token.lock();

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io("stat", path, &e)),
        };
        if let Some(expiry) = expiry {
            let modified = metadata
                .modified()
                .map_err(|e| Error::io("stat", path, &e))?;
            if modified < expiry {
                tracing::debug!(path = %path.display(), "cached file expired");
                return Ok(None);
            }
        }

        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("read", path, &e)),
        }
    }

    /// Write a cached file atomically.
    ///
    /// The data goes to a temporary sibling first and is renamed into place,
    /// so readers never observe a partial file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a directory or the file cannot be written.
    pub fn write(&self, cache_name: &str, path: &Path, data: &[u8]) -> Result<()> {
        let token = self.coordinator.token(cache_name);
        let _guard = token.lock();
        write_atomic(path, data)
    }

    /// Delete a cached file. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file exists but cannot be removed.
    pub fn remove(&self, cache_name: &str, path: &Path) -> Result<()> {
        let token = self.coordinator.token(cache_name);
        let _guard = token.lock();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("remove", path, &e)),
        }
    }

    /// Write a namespace-level metadata file (e.g. the source configuration
    /// that produced the cache) at `root/<namespace>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub fn write_config(&self, cache_name: &str, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.root.join(sanitize(cache_name)).join(sanitize(name));
        let token = self.coordinator.token(cache_name);
        let _guard = token.lock();
        write_atomic(&path, contents.as_bytes())?;
        Ok(path)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, &e))?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, data).map_err(|e| Error::io("write", &temp, &e))?;
    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        Error::io("rename", path, &e)
    })
}

/// Replace characters that are unsafe in a single path component.
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}
