//! Property tests for tree building and flat projection
//!
//! Random layer trees (groups and leaves, random visibility) are built with
//! `TreeBuilder` and checked against a direct walk of the source shape.

use legend_engine::{
    flatten_leaves, project, BuildOptions, LayerItemsMode, LayerKind, LayerNode, LayerSnapshot,
    MemoryLayer, ReuseRegistry, Templates, TreeBuilder,
};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Shape {
    Leaf { visible: bool },
    Group { visible: bool, children: Vec<Shape> },
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let leaf = any::<bool>().prop_map(|visible| Shape::Leaf { visible });
    leaf.prop_recursive(4, 48, 5, |inner| {
        (any::<bool>(), prop::collection::vec(inner, 0..5))
            .prop_map(|(visible, children)| Shape::Group { visible, children })
    })
}

fn forest_strategy() -> impl Strategy<Value = Vec<Shape>> {
    prop::collection::vec(shape_strategy(), 0..6)
}

/// Source layer plus the expected leaves as `(id, effectively visible)`
fn to_layer(shape: &Shape, next: &mut usize, parent_visible: bool, leaves: &mut Vec<(String, bool)>) -> MemoryLayer {
    let id = format!("n{}", *next);
    *next += 1;

    match shape {
        Shape::Leaf { visible } => {
            leaves.push((id.clone(), parent_visible && *visible));
            MemoryLayer::new(id.clone(), id).with_visible(*visible)
        }
        Shape::Group { visible, children } => {
            let effective = parent_visible && *visible;
            let children = children
                .iter()
                .map(|child| to_layer(child, next, effective, leaves))
                .collect();
            MemoryLayer::group(id.clone(), id, children).with_visible(*visible)
        }
    }
}

fn sources(forest: &[Shape]) -> (Vec<LayerSnapshot>, Vec<(String, bool)>) {
    let mut next = 0;
    let mut leaves = Vec::new();
    let snapshots = forest
        .iter()
        .map(|shape| {
            let layer = to_layer(shape, &mut next, true, &mut leaves);
            LayerSnapshot::new(Arc::new(layer))
        })
        .collect();
    (snapshots, leaves)
}

fn build(sources: &[LayerSnapshot], show_only_visible: bool, reverse: bool) -> Vec<Arc<LayerNode>> {
    let options = BuildOptions {
        show_only_visible,
        reverse_top_level: reverse,
        scale: None,
    };
    TreeBuilder::build(sources, &options, &mut ReuseRegistry::new()).roots
}

fn ids(nodes: &[Arc<LayerNode>]) -> Vec<String> {
    nodes.iter().map(|n| n.id().to_string()).collect()
}

proptest! {
    #[test]
    fn prop_unfiltered_flat_lists_source_leaves(forest in forest_strategy()) {
        let (sources, leaves) = sources(&forest);
        let roots = build(&sources, false, false);

        let expected: Vec<String> = leaves.into_iter().map(|(id, _)| id).collect();
        let projected: Vec<String> = project(&roots, LayerItemsMode::Flat, &Templates::default())
            .iter()
            .filter_map(|item| item.as_layer().map(|n| n.id().to_string()))
            .collect();

        prop_assert_eq!(&projected, &expected);
        prop_assert_eq!(ids(&flatten_leaves(&roots)), expected);
    }

    #[test]
    fn prop_filtered_tree_is_visible_and_ordered(forest in forest_strategy()) {
        let (sources, leaves) = sources(&forest);
        let roots = build(&sources, true, false);

        for root in &roots {
            for node in root.descendants() {
                prop_assert!(node.is_effectively_visible());
                prop_assert!(node.kind() != LayerKind::Group || node.has_children());
            }
        }

        let expected: Vec<String> = leaves
            .into_iter()
            .filter(|(_, visible)| *visible)
            .map(|(id, _)| id)
            .collect();
        prop_assert_eq!(ids(&flatten_leaves(&roots)), expected);
    }

    #[test]
    fn prop_filtered_leaves_are_a_subsequence(forest in forest_strategy()) {
        let (sources, _) = sources(&forest);
        let all = ids(&flatten_leaves(&build(&sources, false, false)));
        let visible = ids(&flatten_leaves(&build(&sources, true, false)));

        let mut remaining = all.iter();
        for id in &visible {
            prop_assert!(remaining.any(|candidate| candidate == id));
        }
    }

    #[test]
    fn prop_reverse_affects_top_level_only(forest in forest_strategy()) {
        let (sources, _) = sources(&forest);
        let forward = build(&sources, false, false);
        let reversed = build(&sources, false, true);

        let mut expected = ids(&forward);
        expected.reverse();
        prop_assert_eq!(ids(&reversed), expected);

        for (a, b) in forward.iter().zip(reversed.iter().rev()) {
            prop_assert_eq!(ids(&a.descendants()), ids(&b.descendants()));
        }
    }
}
