//! Mode projection of the legend tree
//!
//! Tree mode exposes the root sequence as is. Flat mode walks the tree
//! depth-first, elides group nodes (their children take their place), lets
//! map-level nodes contribute their own entries before their sub-layers and
//! lists leaf layers as layer items.

use crate::config::{LayerItemsMode, Templates};
use crate::model::{LayerNode, ViewItem};
use crate::ports::LayerKind;
use std::sync::Arc;

pub fn project(roots: &[Arc<LayerNode>], mode: LayerItemsMode, templates: &Templates) -> Vec<ViewItem> {
    match mode {
        LayerItemsMode::Tree => roots.iter().map(|n| layer_item(n, templates)).collect(),
        LayerItemsMode::Flat => {
            let mut out = Vec::new();
            for root in roots {
                flatten_into(root, templates, &mut out);
            }
            out
        }
    }
}

/// Leaf layer nodes in depth-first order
pub fn flatten_leaves(roots: &[Arc<LayerNode>]) -> Vec<Arc<LayerNode>> {
    roots
        .iter()
        .flat_map(|root| root.descendants())
        .filter(|n| n.kind() != LayerKind::Group && !n.has_children())
        .collect()
}

fn flatten_into(node: &Arc<LayerNode>, templates: &Templates, out: &mut Vec<ViewItem>) {
    let children = node.children();
    if node.kind() == LayerKind::Group {
        for child in &children {
            flatten_into(child, templates, out);
        }
        return;
    }

    if children.is_empty() {
        out.push(layer_item(node, templates));
        return;
    }

    // Map-level node with sub-layers: own entries, then promoted children
    out.extend(node.entries().into_iter().map(|entry| ViewItem::Entry {
        entry,
        template: templates.legend_item.clone(),
    }));
    for child in &children {
        flatten_into(child, templates, out);
    }
}

fn layer_item(node: &Arc<LayerNode>, templates: &Templates) -> ViewItem {
    let template = match node.kind() {
        LayerKind::Map => templates.map_layer.clone(),
        LayerKind::Layer | LayerKind::Group => templates.layer.clone(),
    };
    ViewItem::Layer {
        node: node.clone(),
        template,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::LayerSnapshot;
    use crate::builder::{BuildOptions, ReuseRegistry, TreeBuilder};
    use crate::fixture::MemoryLayer;
    use crate::model::SymbolRef;
    use crate::ports::LegendInfo;

    fn build(layers: Vec<MemoryLayer>) -> Vec<Arc<LayerNode>> {
        let sources: Vec<_> = layers
            .into_iter()
            .map(|l| LayerSnapshot::new(Arc::new(l)))
            .collect();
        let options = BuildOptions {
            show_only_visible: false,
            ..Default::default()
        };
        TreeBuilder::build(&sources, &options, &mut ReuseRegistry::new()).roots
    }

    fn labels(items: &[ViewItem]) -> Vec<String> {
        items.iter().map(ViewItem::label).collect()
    }

    #[test]
    fn test_tree_mode_is_root_sequence() {
        let roots = build(vec![
            MemoryLayer::group("g", "Group", vec![MemoryLayer::new("a", "A")]),
            MemoryLayer::new("b", "B"),
        ]);
        let items = project(&roots, LayerItemsMode::Tree, &Templates::default());
        assert_eq!(labels(&items), vec!["Group", "B"]);
    }

    #[test]
    fn test_flat_mode_elides_groups() {
        let roots = build(vec![
            MemoryLayer::group(
                "g",
                "Group",
                vec![
                    MemoryLayer::new("a", "A"),
                    MemoryLayer::group("inner", "Inner", vec![MemoryLayer::new("b", "B")]),
                ],
            ),
            MemoryLayer::new("c", "C"),
        ]);
        let items = project(&roots, LayerItemsMode::Flat, &Templates::default());
        assert_eq!(labels(&items), vec!["A", "B", "C"]);
        assert_eq!(
            flatten_leaves(&roots)
                .iter()
                .map(|n| n.label())
                .collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
    }

    #[test]
    fn test_flat_mode_map_entries_precede_sub_layers() {
        let roots = build(vec![MemoryLayer::new("svc", "Service")
            .with_kind(LayerKind::Map)
            .with_sub_layers(vec![MemoryLayer::new("a", "A")])]);

        let svc = &roots[0];
        let sym = SymbolRef::new(());
        svc.begin_loading(0);
        svc.apply_resolution(0, Ok(vec![LegendInfo::new("Service swatch", sym)]));

        let templates = Templates {
            layer: Some("layer-row".to_string()),
            legend_item: Some("swatch".to_string()),
            map_layer: Some("map-header".to_string()),
        };
        let items = project(&roots, LayerItemsMode::Flat, &templates);
        assert_eq!(labels(&items), vec!["Service swatch", "A"]);
        assert_eq!(items[0].template(), Some("swatch"));
        assert_eq!(items[1].template(), Some("layer-row"));

        let tree = project(&roots, LayerItemsMode::Tree, &templates);
        assert_eq!(tree[0].template(), Some("map-header"));
    }

    #[test]
    fn test_empty_group_contributes_nothing_in_flat_mode() {
        let roots = build(vec![MemoryLayer::group("g", "Group", vec![])]);
        assert!(project(&roots, LayerItemsMode::Flat, &Templates::default()).is_empty());
        assert!(flatten_leaves(&roots).is_empty());
    }
}
