//! Tree Builder
//!
//! Walks external layers depth-first and produces the legend skeleton
//! synchronously. Entry resolution is left to the caller: every node that
//! owns symbology is reported in `BuildOutput::pending`.
//!
//! Identity is preserved through a reuse registry (LayerId → node). A node
//! taken from the registry is updated in place and returned as the same
//! `Arc`. Whatever is still in the registry after a build is no longer part
//! of the tree and must be detached by the caller.

use crate::adapter::LayerSnapshot;
use crate::model::LayerNode;
use crate::ports::{LayerId, LayerKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Nodes that may be reused by the next build, keyed by layer id
pub type ReuseRegistry = HashMap<LayerId, Arc<LayerNode>>;

/// Registry holding every node of the given subtrees
pub fn registry_of(nodes: &[Arc<LayerNode>]) -> ReuseRegistry {
    let mut registry = ReuseRegistry::new();
    for node in nodes {
        for n in node.descendants() {
            registry.entry(n.id().clone()).or_insert(n);
        }
    }
    registry
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Exclude nodes that are not effectively visible
    pub show_only_visible: bool,
    /// Reverse the top-level sequence
    pub reverse_top_level: bool,
    /// Current map scale, if known
    pub scale: Option<f64>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            show_only_visible: true,
            reverse_top_level: false,
            scale: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildOutput {
    /// Built sequence (the root sequence, or one rebuilt child list)
    pub roots: Vec<Arc<LayerNode>>,
    /// Visited nodes with symbology, depth-first
    pub pending: Vec<Arc<LayerNode>>,
}

pub struct TreeBuilder;

impl TreeBuilder {
    /// Full build of the root sequence
    pub fn build(
        layers: &[LayerSnapshot],
        options: &BuildOptions,
        reuse: &mut ReuseRegistry,
    ) -> BuildOutput {
        let mut pending = Vec::new();
        let mut roots: Vec<_> = layers
            .iter()
            .filter_map(|layer| Self::visit(layer, true, options, reuse, &mut pending))
            .collect();

        if options.reverse_top_level {
            roots.reverse();
        }

        BuildOutput { roots, pending }
    }

    /// Rebuild one child list
    ///
    /// `parent` is `None` for the root sequence. Existing nodes whose id is
    /// not in `changed` are kept as they are, without visiting their
    /// subtree. The registry must hold the current subtree of the scope.
    pub fn build_children(
        sources: &[LayerSnapshot],
        parent: Option<&Arc<LayerNode>>,
        options: &BuildOptions,
        reuse: &mut ReuseRegistry,
        changed: &HashSet<LayerId>,
    ) -> BuildOutput {
        let parent_visible = parent.map_or(true, |p| p.is_effectively_visible());
        let mut pending = Vec::new();
        let mut children = Vec::with_capacity(sources.len());

        for source in sources {
            let id = source.id();
            let keep = !changed.contains(&id)
                && reuse
                    .get(&id)
                    .is_some_and(|existing| existing.kind() == source.kind());

            if keep {
                if let Some(existing) = reuse.remove(&id) {
                    for n in existing.descendants() {
                        reuse.remove(n.id());
                    }
                    children.push(existing);
                }
                continue;
            }

            if let Some(node) = Self::visit(source, parent_visible, options, reuse, &mut pending) {
                children.push(node);
            }
        }

        if parent.is_none() && options.reverse_top_level {
            children.reverse();
        }

        BuildOutput {
            roots: children,
            pending,
        }
    }

    /// Re-evaluate effective visibility of `node` and its subtree in place
    ///
    /// Returns the nodes of the subtree, depth-first.
    pub fn update_visibility(
        node: &Arc<LayerNode>,
        parent_visible: bool,
        scale: Option<f64>,
    ) -> Vec<Arc<LayerNode>> {
        let snapshot = node.snapshot();
        let visible = parent_visible && Self::is_visible(&snapshot, scale);
        node.update_from(&snapshot, visible);

        let mut visited = vec![node.clone()];
        for child in node.children() {
            visited.extend(Self::update_visibility(&child, visible, scale));
        }
        visited
    }

    fn is_visible(snapshot: &LayerSnapshot, scale: Option<f64>) -> bool {
        snapshot.is_visible() && snapshot.is_in_scale_range(scale)
    }

    fn visit(
        snapshot: &LayerSnapshot,
        parent_visible: bool,
        options: &BuildOptions,
        reuse: &mut ReuseRegistry,
        pending: &mut Vec<Arc<LayerNode>>,
    ) -> Option<Arc<LayerNode>> {
        let visible = parent_visible && Self::is_visible(snapshot, options.scale);
        if options.show_only_visible && !visible {
            return None;
        }

        let id = snapshot.id();
        let reusable = reuse
            .get(&id)
            .is_some_and(|existing| existing.kind() == snapshot.kind() && existing.is_attached());
        let node = match reusable.then(|| reuse.remove(&id)).flatten() {
            Some(existing) => {
                existing.update_from(snapshot, visible);
                existing
            }
            None => LayerNode::new(snapshot, visible),
        };

        let mut local_pending = Vec::new();
        let children: Vec<_> = snapshot
            .children()
            .iter()
            .filter_map(|child| Self::visit(child, visible, options, reuse, &mut local_pending))
            .collect();

        if options.show_only_visible && node.kind() == LayerKind::Group && children.is_empty() {
            // Excluded: hand the subtree back so the caller detaches it
            reuse.entry(id).or_insert(node);
            for child in children {
                for n in child.descendants() {
                    reuse.entry(n.id().clone()).or_insert(n);
                }
            }
            return None;
        }

        node.set_children(children);
        if node.kind().has_symbology() {
            pending.push(node.clone());
        }
        pending.extend(local_pending);
        Some(node)
    }
}
