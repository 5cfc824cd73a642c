//! A tree of layer descriptors with lazily derived indices.
//!
//! Groups hold layers and other groups. Each node caches indices over its
//! subtree (the flattened leaf layers, the elevation sources and a URI
//! lookup). A structural change to a node discards the cached indices of
//! that node and every ancestor; they are rebuilt on next access under the
//! node's own lock.

use crate::{
    config::{PayloadKind, TileSourceConfig},
    error::{Error, Result},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock, Weak},
};

/// What a node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Holds other nodes.
    Group,
    /// An imagery tile source.
    Imagery,
    /// An elevation tile source.
    Elevation,
}

/// Indices derived from a node's subtree.
#[derive(Debug, Default)]
pub struct DerivedIndex {
    layers: Vec<Arc<LayerNode>>,
    elevation: Vec<Arc<LayerNode>>,
    by_uri: HashMap<String, Arc<LayerNode>>,
}

impl DerivedIndex {
    /// Leaf layers in depth-first order.
    #[must_use]
    pub fn layers(&self) -> &[Arc<LayerNode>] {
        &self.layers
    }

    /// Elevation layers in depth-first order; together they form the
    /// subtree's combined elevation model.
    #[must_use]
    pub fn elevation_layers(&self) -> &[Arc<LayerNode>] {
        &self.elevation
    }

    /// The node with the given URI, anywhere in the subtree.
    #[must_use]
    pub fn find(&self, uri: &str) -> Option<&Arc<LayerNode>> {
        self.by_uri.get(uri)
    }
}

/// A node of the layer tree.
#[derive(Debug)]
pub struct LayerNode {
    name: String,
    uri: Option<String>,
    kind: LayerKind,
    source: Option<TileSourceConfig>,
    parent: Mutex<Weak<LayerNode>>,
    children: RwLock<Vec<Arc<LayerNode>>>,
    derived: Mutex<Option<Arc<DerivedIndex>>>,
}

impl LayerNode {
    fn new(
        name: String,
        uri: Option<String>,
        kind: LayerKind,
        source: Option<TileSourceConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            uri,
            kind,
            source,
            parent: Mutex::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            derived: Mutex::new(None),
        })
    }

    /// Create an empty group.
    #[must_use]
    pub fn group(name: impl Into<String>) -> Arc<Self> {
        Self::new(name.into(), None, LayerKind::Group, None)
    }

    /// Create a leaf layer for a tile source. Its kind follows the source's
    /// payload.
    #[must_use]
    pub fn source(
        name: impl Into<String>,
        uri: impl Into<String>,
        source: TileSourceConfig,
    ) -> Arc<Self> {
        let kind = match source.payload {
            PayloadKind::Image => LayerKind::Imagery,
            PayloadKind::Elevation => LayerKind::Elevation,
        };
        Self::new(name.into(), Some(uri.into()), kind, Some(source))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// The tile source of a leaf layer.
    #[must_use]
    pub fn tile_source(&self) -> Option<&TileSourceConfig> {
        self.source.as_ref()
    }

    /// The enclosing group, if attached and still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<LayerNode>> {
        self.parent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Snapshot of the direct children.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<LayerNode>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Append `child` to this group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if this node is not a group, the child is
    /// already attached somewhere, or attaching it would create a cycle.
    pub fn add_child(self: &Arc<Self>, child: Arc<LayerNode>) -> Result<()> {
        if self.kind != LayerKind::Group {
            return Err(Error::config(format!(
                "cannot add {:?} to non-group layer {:?}",
                child.name, self.name
            )));
        }
        if self.is_within(&child) {
            return Err(Error::config(format!(
                "adding {:?} to {:?} would create a cycle",
                child.name, self.name
            )));
        }
        {
            let mut parent = child.parent.lock().unwrap_or_else(PoisonError::into_inner);
            if parent.upgrade().is_some() {
                return Err(Error::config(format!(
                    "layer {:?} already has a parent",
                    child.name
                )));
            }
            *parent = Arc::downgrade(self);
        }
        self.children
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
        self.invalidate();
        Ok(())
    }

    /// Detach `child` from this group. Returns whether it was a child.
    pub fn remove_child(&self, child: &Arc<LayerNode>) -> bool {
        let removed = {
            let mut children = self
                .children
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let before = children.len();
            children.retain(|c| !Arc::ptr_eq(c, child));
            children.len() != before
        };
        if removed {
            *child.parent.lock().unwrap_or_else(PoisonError::into_inner) = Weak::new();
            self.invalidate();
        }
        removed
    }

    /// Indices over this node's subtree, rebuilt if a structural change
    /// invalidated them.
    pub fn derived(&self) -> Arc<DerivedIndex> {
        let mut derived = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = derived.as_ref() {
            return Arc::clone(index);
        }
        let index = Arc::new(self.build_index());
        tracing::debug!(
            group = %self.name,
            layers = index.layers.len(),
            elevation = index.elevation.len(),
            "rebuilt layer indices"
        );
        *derived = Some(Arc::clone(&index));
        index
    }

    fn build_index(&self) -> DerivedIndex {
        let mut index = DerivedIndex::default();
        for child in self.children() {
            if let Some(uri) = child.uri() {
                index.by_uri.insert(uri.to_string(), Arc::clone(&child));
            }
            match child.kind {
                LayerKind::Group => {
                    let nested = child.derived();
                    index.layers.extend(nested.layers.iter().cloned());
                    index.elevation.extend(nested.elevation.iter().cloned());
                    index.by_uri.extend(
                        nested
                            .by_uri
                            .iter()
                            .map(|(uri, node)| (uri.clone(), Arc::clone(node))),
                    );
                }
                LayerKind::Imagery => index.layers.push(child),
                LayerKind::Elevation => {
                    index.elevation.push(Arc::clone(&child));
                    index.layers.push(child);
                }
            }
        }
        index
    }

    /// Drop cached indices here and in every ancestor.
    fn invalidate(&self) {
        *self.derived.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let mut next = self.parent();
        while let Some(node) = next {
            *node.derived.lock().unwrap_or_else(PoisonError::into_inner) = None;
            next = node.parent();
        }
    }

    /// Whether this node is `other` or lies below it.
    fn is_within(self: &Arc<Self>, other: &Arc<LayerNode>) -> bool {
        let mut next = Some(Arc::clone(self));
        while let Some(node) = next {
            if Arc::ptr_eq(&node, other) {
                return true;
            }
            next = node.parent();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geo::Sector, testing::test_config};

    fn imagery(name: &str) -> Arc<LayerNode> {
        LayerNode::source(name, format!("layer://{name}"), test_config(2, 36.0, Sector::FULL_SPHERE))
    }

    fn elevation(name: &str) -> Arc<LayerNode> {
        let mut config = test_config(2, 36.0, Sector::FULL_SPHERE);
        config.payload = PayloadKind::Elevation;
        LayerNode::source(name, format!("layer://{name}"), config)
    }

    fn names(nodes: &[Arc<LayerNode>]) -> Vec<&str> {
        nodes.iter().map(|n| n.name()).collect()
    }

    #[test]
    fn test_flattened_depth_first() {
        let root = LayerNode::group("root");
        let base = LayerNode::group("base");
        root.add_child(imagery("a")).unwrap();
        root.add_child(Arc::clone(&base)).unwrap();
        base.add_child(imagery("b")).unwrap();
        base.add_child(elevation("srtm")).unwrap();
        root.add_child(imagery("c")).unwrap();

        let index = root.derived();
        assert_eq!(names(index.layers()), ["a", "b", "srtm", "c"]);
        assert_eq!(names(index.elevation_layers()), ["srtm"]);
        assert_eq!(index.find("layer://b").unwrap().name(), "b");
        assert!(index.find("layer://missing").is_none());
    }

    #[test]
    fn test_change_invalidates_ancestors() {
        let root = LayerNode::group("root");
        let inner = LayerNode::group("inner");
        root.add_child(Arc::clone(&inner)).unwrap();
        assert!(root.derived().layers().is_empty());

        let before = root.derived();
        assert!(Arc::ptr_eq(&before, &root.derived()));

        inner.add_child(elevation("dem")).unwrap();
        let after = root.derived();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(names(after.elevation_layers()), ["dem"]);

        let dem = Arc::clone(&inner.children()[0]);
        assert!(inner.remove_child(&dem));
        assert!(dem.parent().is_none());
        assert!(root.derived().layers().is_empty());
        assert!(!inner.remove_child(&dem));
    }

    #[test]
    fn test_structural_errors() {
        let root = LayerNode::group("root");
        let inner = LayerNode::group("inner");
        root.add_child(Arc::clone(&inner)).unwrap();

        assert!(matches!(inner.add_child(Arc::clone(&root)), Err(Error::Config { .. })));
        assert!(matches!(root.add_child(Arc::clone(&root)), Err(Error::Config { .. })));
        assert!(matches!(root.add_child(Arc::clone(&inner)), Err(Error::Config { .. })));

        let leaf = imagery("leaf");
        assert!(matches!(leaf.add_child(imagery("x")), Err(Error::Config { .. })));
        assert_eq!(inner.parent().map(|p| p.name().to_string()), Some("root".to_string()));
    }

    #[test]
    fn test_concurrent_rebuilds() {
        let root = LayerNode::group("root");
        let groups: Vec<_> = (0..4).map(|i| LayerNode::group(format!("g{i}"))).collect();
        for group in &groups {
            root.add_child(Arc::clone(group)).unwrap();
        }

        std::thread::scope(|scope| {
            for (i, group) in groups.iter().enumerate() {
                let root = &root;
                scope.spawn(move || {
                    for j in 0..25 {
                        group.add_child(imagery(&format!("l{i}-{j}"))).unwrap();
                        let _ = root.derived();
                    }
                });
            }
        });

        assert_eq!(root.derived().layers().len(), 100);
        assert_eq!(root.derived().find("layer://l3-24").unwrap().name(), "l3-24");
    }
}
