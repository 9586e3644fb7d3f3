//! Integration tests for full legend builds
//!
//! Drives `LegendTree` against the in-memory map:
//! - flat and tree projections
//! - visible-only filtering without re-querying cached renderers
//! - top-level reversal
//! - ordering independent of resolution completion order
//! - failure isolation
//! - refresh idempotence

use legend_engine::{
    LayerId, LayerItemsMode, LayerKind, LegendConfig, LegendError, LegendInfo, LegendTree,
    LoadState, MapFixture, MapSource, MemoryLayer, MemoryMap, RefreshedEvent, StaticRenderer,
    SymbolRef, Templates, ViewItem,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn renderer(labels: &[&str]) -> StaticRenderer {
    StaticRenderer::new(
        labels
            .iter()
            .map(|l| LegendInfo::new(*l, SymbolRef::new(l.to_string())))
            .collect(),
    )
}

fn leaf(id: &str, label: &str) -> MemoryLayer {
    MemoryLayer::new(id, label).with_renderer(renderer(&[&format!("{} symbol", label)]))
}

fn as_source(map: &Arc<MemoryMap>) -> Option<Arc<dyn MapSource>> {
    let source: Arc<dyn MapSource> = map.clone();
    Some(source)
}

fn labels(items: &[ViewItem]) -> Vec<String> {
    items.iter().map(ViewItem::label).collect()
}

fn drain(rx: &mut broadcast::Receiver<RefreshedEvent>) -> Vec<RefreshedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn id(s: &str) -> LayerId {
    LayerId::from(s)
}

#[tokio::test]
async fn test_flat_projection_is_leaves_plus_map_entries() {
    let map = Arc::new(MemoryMap::new(vec![
        MemoryLayer::group(
            "ops",
            "Operations",
            vec![leaf("roads", "Roads"), leaf("rivers", "Rivers")],
        ),
        MemoryLayer::new("svc", "Service map")
            .with_kind(LayerKind::Map)
            .with_renderer(renderer(&["Service"]))
            .with_sub_layers(vec![leaf("parcels", "Parcels")]),
    ]));

    let tree = LegendTree::new();
    tree.set_map(as_source(&map)).await;

    assert_eq!(
        labels(&tree.layer_items_source()),
        vec!["Roads", "Rivers", "Service", "Parcels"]
    );

    tree.set_mode(LayerItemsMode::Tree);
    assert_eq!(
        labels(&tree.layer_items_source()),
        vec!["Operations", "Service map"]
    );

    // The full tree is always available
    let roots = tree.layer_items();
    assert_eq!(roots[0].children().len(), 2);
    assert_eq!(roots[0].children()[0].entries()[0].label(), "Roads symbol");
}

#[tokio::test]
async fn test_templates_tag_projected_items() {
    let map = Arc::new(MemoryMap::new(vec![MemoryLayer::new("svc", "Service")
        .with_kind(LayerKind::Map)
        .with_renderer(renderer(&["Swatch"]))
        .with_sub_layers(vec![leaf("a", "A")])]));
    let tree = LegendTree::new();
    tree.set_templates(Templates {
        layer: Some("layer-row".to_string()),
        legend_item: Some("swatch-row".to_string()),
        map_layer: Some("map-header".to_string()),
    })
    .unwrap();
    tree.set_map(as_source(&map)).await;

    let flat = tree.layer_items_source();
    assert_eq!(flat[0].template(), Some("swatch-row"));
    assert_eq!(flat[1].template(), Some("layer-row"));

    tree.set_mode(LayerItemsMode::Tree);
    assert_eq!(tree.layer_items_source()[0].template(), Some("map-header"));
}

#[tokio::test]
async fn test_filter_toggle_restores_without_requery() {
    let hidden_renderer = Arc::new(renderer(&["Hidden symbol"]));
    let map = Arc::new(MemoryMap::new(vec![
        leaf("a", "A"),
        MemoryLayer::new("b", "B")
            .with_visible(false)
            .with_shared_renderer(hidden_renderer.clone()),
    ]));

    let tree = LegendTree::new();
    tree.set_map(as_source(&map)).await;
    assert_eq!(labels(&tree.layer_items_source()), vec!["A"]);
    assert_eq!(tree.provider_calls(), 1);

    tree.set_show_only_visible_layers(false);
    tree.wait_idle().await;
    assert_eq!(labels(&tree.layer_items_source()), vec!["A", "B"]);
    assert_eq!(hidden_renderer.calls(), 1);

    tree.set_show_only_visible_layers(true);
    tree.wait_idle().await;
    assert_eq!(labels(&tree.layer_items_source()), vec!["A"]);

    tree.set_show_only_visible_layers(false);
    tree.wait_idle().await;
    assert_eq!(labels(&tree.layer_items_source()), vec!["A", "B"]);

    // Restored from the cache
    assert_eq!(hidden_renderer.calls(), 1);
    assert_eq!(tree.provider_calls(), 2);
    let b = tree.find(&id("b")).unwrap();
    assert_eq!(b.load_state(), LoadState::Loaded);
    assert_eq!(b.entries()[0].label(), "Hidden symbol");
}

#[tokio::test]
async fn test_invisible_ancestor_hides_subtree() {
    let map = Arc::new(MemoryMap::new(vec![
        MemoryLayer::group("g", "G", vec![leaf("g1", "G1")]).with_visible(false),
        leaf("b", "B"),
    ]));
    let tree = LegendTree::new();
    tree.set_map(as_source(&map)).await;

    assert!(tree.find(&id("g1")).is_none());
    for root in tree.layer_items() {
        for node in root.descendants() {
            assert!(node.is_effectively_visible());
        }
    }

    tree.set_show_only_visible_layers(false);
    tree.wait_idle().await;
    let g1 = tree.find(&id("g1")).unwrap();
    assert!(g1.is_visible());
    assert!(!g1.is_effectively_visible());
}

#[tokio::test]
async fn test_reverse_inverts_top_level_only() {
    let map = Arc::new(MemoryMap::new(vec![
        MemoryLayer::group("A", "A", vec![leaf("A1", "A1"), leaf("A2", "A2")]),
        leaf("B", "B"),
        leaf("C", "C"),
    ]));
    let config = LegendConfig::default()
        .mode(LayerItemsMode::Tree)
        .reverse_layers_order(true);
    let tree = LegendTree::with_config(config);
    tree.set_map(as_source(&map)).await;

    assert_eq!(labels(&tree.layer_items_source()), vec!["C", "B", "A"]);
    let a = tree.layer_items()[2].clone();
    let children: Vec<_> = a.children().iter().map(|n| n.label()).collect();
    assert_eq!(children, vec!["A1", "A2"]);

    tree.set_reverse_layers_order(false);
    tree.wait_idle().await;
    assert_eq!(labels(&tree.layer_items_source()), vec!["A", "B", "C"]);
    assert!(Arc::ptr_eq(&a, &tree.layer_items()[0]));
}

#[tokio::test(start_paused = true)]
async fn test_order_follows_tree_position_not_completion() {
    let map = Arc::new(MemoryMap::new(vec![
        MemoryLayer::new("l1", "L1")
            .with_renderer(renderer(&["L1 symbol"]).with_delay(Duration::from_millis(200))),
        MemoryLayer::new("l2", "L2")
            .with_renderer(renderer(&["L2 symbol"]).with_delay(Duration::from_millis(10))),
    ]));
    let tree = LegendTree::new();
    let mut rx = tree.subscribe();
    tree.set_map(as_source(&map)).await;

    let completed: Vec<_> = drain(&mut rx)
        .into_iter()
        .map(|e| e.layer_id.to_string())
        .collect();
    assert_eq!(completed, vec!["l2", "l1"]);
    assert_eq!(labels(&tree.layer_items_source()), vec!["L1", "L2"]);
}

#[tokio::test]
async fn test_failure_is_isolated() {
    let map = Arc::new(MemoryMap::new(vec![
        MemoryLayer::new("x", "X").with_renderer(StaticRenderer::failing("symbology service down")),
        leaf("y", "Y"),
        MemoryLayer::new("basemap", "Basemap"),
    ]));
    let tree = LegendTree::new();
    let mut rx = tree.subscribe();
    tree.set_map(as_source(&map)).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    let errors: Vec<_> = events.iter().filter(|e| e.is_error()).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].layer_id, id("x"));

    let x = tree.find(&id("x")).unwrap();
    assert_eq!(x.load_state(), LoadState::Failed);
    assert!(x.entries().is_empty());
    assert!(x.last_error().is_some());

    let y = tree.find(&id("y")).unwrap();
    assert_eq!(y.load_state(), LoadState::Loaded);
    assert_eq!(y.entries().len(), 1);

    // No symbology is not an error
    let basemap = tree.find(&id("basemap")).unwrap();
    assert_eq!(basemap.load_state(), LoadState::Loaded);
    assert!(basemap.entries().is_empty());
    assert!(basemap.last_error().is_none());

    // The failed layer is still listed
    assert_eq!(labels(&tree.layer_items_source()), vec!["X", "Y", "Basemap"]);
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let roads = Arc::new(renderer(&["Highway", "Street"]));
    let map = Arc::new(MemoryMap::new(vec![
        MemoryLayer::group(
            "g",
            "Group",
            vec![MemoryLayer::new("roads", "Roads").with_shared_renderer(roads.clone())],
        ),
    ]));
    let tree = LegendTree::new();
    tree.set_map(as_source(&map)).await;

    tree.refresh().await.unwrap();
    let first_roots = tree.layer_items();
    let first_entries = tree.find(&id("roads")).unwrap().entries();

    tree.refresh().await.unwrap();
    let second_roots = tree.layer_items();
    let second_entries = tree.find(&id("roads")).unwrap().entries();

    // Re-resolved every time
    assert_eq!(roads.calls(), 3);
    assert_eq!(first_roots.len(), second_roots.len());
    assert!(Arc::ptr_eq(&first_roots[0], &second_roots[0]));
    for (a, b) in first_entries.iter().zip(&second_entries) {
        assert!(Arc::ptr_eq(a, b));
    }
}

#[tokio::test]
async fn test_refresh_without_map() {
    let tree = LegendTree::new();
    assert!(matches!(tree.refresh().await, Err(LegendError::NoMap)));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let tree = LegendTree::new();
    let config = LegendConfig::default().templates(Templates {
        legend_item: Some(String::new()),
        ..Templates::default()
    });
    assert!(matches!(tree.set_config(config), Err(LegendError::Config(_))));
    assert_eq!(tree.config(), LegendConfig::default());
}

#[tokio::test]
async fn test_empty_template_name_is_rejected() {
    let tree = LegendTree::new();
    let result = tree.set_templates(Templates {
        map_layer: Some(" ".to_string()),
        ..Templates::default()
    });
    assert!(matches!(result, Err(LegendError::Config(_))));
    assert_eq!(tree.config().templates, Templates::default());
}

#[tokio::test]
async fn test_refresh_retries_failed_layer() {
    let flaky = Arc::new(renderer(&["Parcel"]));
    flaky.set_failure(Some("symbology service down".to_string()));
    let map = Arc::new(MemoryMap::new(vec![
        MemoryLayer::new("parcels", "Parcels").with_shared_renderer(flaky.clone()),
    ]));
    let tree = LegendTree::new();
    let mut rx = tree.subscribe();
    tree.set_map(as_source(&map)).await;

    let parcels = tree.find(&id("parcels")).unwrap();
    assert_eq!(parcels.load_state(), LoadState::Failed);

    flaky.set_failure(None);
    tree.refresh().await.unwrap();

    let outcomes: Vec<_> = drain(&mut rx).iter().map(|e| e.is_error()).collect();
    assert_eq!(outcomes, vec![true, false]);
    assert_eq!(parcels.load_state(), LoadState::Loaded);
    assert!(parcels.last_error().is_none());
    assert_eq!(parcels.entries()[0].label(), "Parcel");
}

#[tokio::test]
async fn test_event_carries_attached_node() {
    let map = Arc::new(MemoryMap::new(vec![leaf("a", "A")]));
    let tree = LegendTree::new();
    let mut rx = tree.subscribe();
    tree.set_map(as_source(&map)).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(Arc::ptr_eq(&events[0].node, &tree.find(&id("a")).unwrap()));
    assert_eq!(events[0].top_level, id("a"));
    assert!(events[0].node.is_attached());
}

#[tokio::test]
async fn test_demo_city_fixture() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/city.yaml");
    let map: Arc<dyn MapSource> = Arc::new(MapFixture::from_yaml(&path).unwrap().into_map());
    let tree = LegendTree::new();
    let mut rx = tree.subscribe();
    tree.set_map(Some(map)).await;

    assert_eq!(
        labels(&tree.layer_items_source()),
        vec![
            "Basemap",
            "Roads",
            "Rail",
            "Service area",
            "Water mains",
            "Parcels",
            "Flood zones"
        ]
    );
    let failed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.is_error())
        .map(|e| e.layer_id.to_string())
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&"parcels".to_string()));
    assert!(failed.contains(&"flood-zones".to_string()));
}
