//! Cache key transforms.
//!
//! Every cache lookup goes through the pyramid's key transform, which lets
//! differently configured layers alias the same cache slots. Transforms must
//! be idempotent: transforming an already transformed key changes nothing.

use crate::tile::TileKey;
use std::{fmt, sync::Arc};

/// Maps a tile's natural key to the key its resources are cached under.
pub trait KeyTransform: Send + Sync + fmt::Debug {
    /// Transform `key`. Must satisfy `transform(transform(k)) == transform(k)`.
    fn transform(&self, key: &TileKey) -> TileKey;
}

/// Leaves keys unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl KeyTransform for IdentityTransform {
    fn transform(&self, key: &TileKey) -> TileKey {
        key.clone()
    }
}

/// Rewrites every key into a shared cache namespace.
#[derive(Debug, Clone)]
pub struct NamespaceAlias {
    cache_name: Arc<str>,
}

impl NamespaceAlias {
    /// Alias keys into `cache_name`.
    #[must_use]
    pub fn new(cache_name: impl Into<Arc<str>>) -> Self {
        Self {
            cache_name: cache_name.into(),
        }
    }
}

impl KeyTransform for NamespaceAlias {
    fn transform(&self, key: &TileKey) -> TileKey {
        TileKey {
            cache_name: Arc::clone(&self.cache_name),
            ..key.clone()
        }
    }
}

/// Build the transform named by a source's `key_alias`.
#[must_use]
pub fn from_alias(alias: Option<&str>) -> Arc<dyn KeyTransform> {
    match alias {
        Some(name) => Arc::new(NamespaceAlias::new(name)),
        None => Arc::new(IdentityTransform),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileCoord;
    use proptest::prelude::*;

    fn key(level: u32, row: i32, column: i32, name: &str) -> TileKey {
        TileKey::new(TileCoord::new(level, row, column), Arc::from(name))
    }

    #[test]
    fn test_alias_shares_slots() {
        let alias = NamespaceAlias::new("shared");
        let a = alias.transform(&key(3, 1, 2, "layer-a"));
        let b = alias.transform(&key(3, 1, 2, "layer-b"));
        assert_eq!(a, b);
        assert_eq!(&*a.cache_name, "shared");
    }

    proptest! {
        #[test]
        fn test_transforms_are_idempotent(
            level in 0u32..20,
            row in -1000i32..1000,
            column in -1000i32..1000,
            alias in proptest::option::of("[a-z]{1,8}"),
        ) {
            let transform = from_alias(alias.as_deref());
            let once = transform.transform(&key(level, row, column, "natural"));
            let twice = transform.transform(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
