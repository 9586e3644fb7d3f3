/// Parent index for incremental synchronization
///
/// Tracks, for every node attached to the legend tree:
/// - its parent (None for top-level nodes)
/// - the node itself, so an event's layer id resolves in O(1)
use crate::model::LayerNode;
use crate::ports::LayerId;
use dashmap::DashMap;
use std::sync::Arc;

pub struct ParentIndex {
    /// LayerId → parent LayerId (None = top level)
    parents: Arc<DashMap<LayerId, Option<LayerId>>>,
    /// LayerId → attached node
    nodes: Arc<DashMap<LayerId, Arc<LayerNode>>>,
}

impl ParentIndex {
    pub fn new() -> Self {
        Self {
            parents: Arc::new(DashMap::new()),
            nodes: Arc::new(DashMap::new()),
        }
    }

    /// Rebuild from the root sequence
    pub fn rebuild(&self, roots: &[Arc<LayerNode>]) {
        self.clear();
        for root in roots {
            self.insert_subtree(root, None);
        }
    }

    /// Register `node` and its descendants under `parent`
    pub fn insert_subtree(&self, node: &Arc<LayerNode>, parent: Option<&LayerId>) {
        self.parents.insert(node.id().clone(), parent.cloned());
        self.nodes.insert(node.id().clone(), node.clone());
        for child in node.children() {
            self.insert_subtree(&child, Some(node.id()));
        }
    }

    /// Forget one node, leaving its descendants registered
    pub fn remove(&self, node: &Arc<LayerNode>) {
        let removed = self
            .nodes
            .remove_if(node.id(), |_, current| Arc::ptr_eq(current, node));
        if removed.is_some() {
            self.parents.remove(node.id());
        }
    }

    pub fn node(&self, id: &LayerId) -> Option<Arc<LayerNode>> {
        self.nodes.get(id).map(|n| n.value().clone())
    }

    /// `Some(None)` for a top-level node, `None` if the id is not attached
    pub fn parent(&self, id: &LayerId) -> Option<Option<LayerId>> {
        self.parents.get(id).map(|p| p.value().clone())
    }

    /// Ancestors from the direct parent up to the top level
    pub fn ancestors(&self, id: &LayerId) -> Vec<LayerId> {
        let mut out = Vec::new();
        let mut current = self.parent(id).flatten();
        while let Some(parent) = current {
            current = self.parent(&parent).flatten();
            out.push(parent);
        }
        out
    }

    /// Top-level ancestor (or the node itself if it is top level)
    pub fn top_level_of(&self, id: &LayerId) -> Option<LayerId> {
        if !self.parents.contains_key(id) {
            return None;
        }
        Some(self.ancestors(id).pop().unwrap_or_else(|| id.clone()))
    }

    pub fn contains(&self, id: &LayerId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn clear(&self) {
        self.parents.clear();
        self.nodes.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for ParentIndex {
    fn default() -> Self {
        Self::new()
    }
}
