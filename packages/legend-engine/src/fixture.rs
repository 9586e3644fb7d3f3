//! In-memory map, layers and renderers
//!
//! Implements the collaborator ports without a real map engine. Used by the
//! tests, by the `legend-dump` CLI (YAML fixtures) and by UI shells that need
//! placeholder content when no map is bound (`design_time_fixture`).

use crate::model::SymbolRef;
use crate::ports::{
    Layer, LayerId, LayerKind, LayerProperty, LegendInfo, LoadStatus, MapEvent, MapSource,
    Renderer, ScaleRange,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Renderer returning a fixed list of legend infos
pub struct StaticRenderer {
    infos: Vec<LegendInfo>,
    failure: Mutex<Option<String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticRenderer {
    pub fn new(infos: Vec<LegendInfo>) -> Self {
        Self {
            infos,
            failure: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Renderer whose legend computation always fails
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Mutex::new(Some(reason.into())),
            ..Self::new(Vec::new())
        }
    }

    /// Delay each `legend_infos` call (simulates a slow symbology service)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make later calls fail with `reason`, or succeed again with `None`
    pub fn set_failure(&self, reason: Option<String>) {
        *self.failure.lock() = reason;
    }

    /// Number of times `legend_infos` was invoked
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn legend_infos(&self) -> Result<Vec<LegendInfo>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().clone();
        match failure {
            Some(reason) => Err(reason),
            None => Ok(self.infos.clone()),
        }
    }
}

struct MemoryLayerState {
    label: String,
    visible: bool,
    scale_range: ScaleRange,
    sub_layers: Vec<Arc<MemoryLayer>>,
    renderer: Option<Arc<dyn Renderer>>,
}

/// Mutable in-memory layer
pub struct MemoryLayer {
    id: LayerId,
    kind: LayerKind,
    state: RwLock<MemoryLayerState>,
    load_tx: watch::Sender<LoadStatus>,
}

impl MemoryLayer {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let (load_tx, _) = watch::channel(LoadStatus::Loaded);
        Self {
            id: LayerId::new(id),
            kind: LayerKind::Layer,
            state: RwLock::new(MemoryLayerState {
                label: label.into(),
                visible: true,
                scale_range: ScaleRange::UNBOUNDED,
                sub_layers: Vec::new(),
                renderer: None,
            }),
            load_tx,
        }
    }

    pub fn group(id: impl Into<String>, label: impl Into<String>, children: Vec<MemoryLayer>) -> Self {
        Self::new(id, label)
            .with_kind(LayerKind::Group)
            .with_sub_layers(children)
    }

    pub fn with_kind(mut self, kind: LayerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_renderer(self, renderer: impl Renderer + 'static) -> Self {
        self.state.write().renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_shared_renderer(self, renderer: Arc<dyn Renderer>) -> Self {
        self.state.write().renderer = Some(renderer);
        self
    }

    pub fn with_sub_layers(self, children: Vec<MemoryLayer>) -> Self {
        self.state.write().sub_layers = children.into_iter().map(Arc::new).collect();
        self
    }

    pub fn with_visible(self, visible: bool) -> Self {
        self.state.write().visible = visible;
        self
    }

    pub fn with_scale_range(self, range: ScaleRange) -> Self {
        self.state.write().scale_range = range;
        self
    }

    pub fn with_load_status(self, status: LoadStatus) -> Self {
        self.load_tx.send_replace(status);
        self
    }

    pub fn layer_id(&self) -> &LayerId {
        &self.id
    }

    pub fn set_visible(&self, visible: bool) {
        self.state.write().visible = visible;
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.state.write().label = label.into();
    }

    pub fn set_scale_range(&self, range: ScaleRange) {
        self.state.write().scale_range = range;
    }

    pub fn set_renderer(&self, renderer: Option<Arc<dyn Renderer>>) {
        self.state.write().renderer = renderer;
    }

    /// Wakes every pending `wait_loaded`
    pub fn set_load_status(&self, status: LoadStatus) {
        self.load_tx.send_replace(status);
    }

    pub fn sub_layer_handles(&self) -> Vec<Arc<MemoryLayer>> {
        self.state.read().sub_layers.clone()
    }

    pub fn insert_sub_layer(&self, index: usize, layer: Arc<MemoryLayer>) {
        let mut st = self.state.write();
        let index = index.min(st.sub_layers.len());
        st.sub_layers.insert(index, layer);
    }

    pub fn remove_sub_layer(&self, id: &LayerId) -> Option<Arc<MemoryLayer>> {
        let mut st = self.state.write();
        let pos = st.sub_layers.iter().position(|l| &l.id == id)?;
        Some(st.sub_layers.remove(pos))
    }

    /// Depth-first search through this layer's subtree
    pub fn find(self: &Arc<Self>, id: &LayerId) -> Option<Arc<MemoryLayer>> {
        if &self.id == id {
            return Some(self.clone());
        }
        self.sub_layer_handles()
            .iter()
            .find_map(|child| child.find(id))
    }
}

#[async_trait]
impl Layer for MemoryLayer {
    fn id(&self) -> LayerId {
        self.id.clone()
    }

    fn label(&self) -> String {
        self.state.read().label.clone()
    }

    fn kind(&self) -> LayerKind {
        self.kind
    }

    fn is_visible(&self) -> bool {
        self.state.read().visible
    }

    fn scale_range(&self) -> ScaleRange {
        self.state.read().scale_range
    }

    fn load_status(&self) -> LoadStatus {
        self.load_tx.borrow().clone()
    }

    fn sub_layers(&self) -> Vec<Arc<dyn Layer>> {
        self.state
            .read()
            .sub_layers
            .iter()
            .map(|l| l.clone() as Arc<dyn Layer>)
            .collect()
    }

    fn renderer(&self) -> Option<Arc<dyn Renderer>> {
        self.state.read().renderer.clone()
    }

    async fn wait_loaded(&self) -> Result<(), String> {
        let mut rx = self.load_tx.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                LoadStatus::Loaded => return Ok(()),
                LoadStatus::Failed(reason) => return Err(reason),
                LoadStatus::NotLoaded | LoadStatus::Loading => {}
            }
            if rx.changed().await.is_err() {
                return Err(format!("layer {} was dropped while loading", self.id));
            }
        }
    }
}

/// Mutable in-memory map that notifies subscribers of every change
pub struct MemoryMap {
    layers: RwLock<Vec<Arc<MemoryLayer>>>,
    scale: RwLock<Option<f64>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MapEvent>>>,
}

impl MemoryMap {
    pub fn new(layers: Vec<MemoryLayer>) -> Self {
        Self {
            layers: RwLock::new(layers.into_iter().map(Arc::new).collect()),
            scale: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scale(self, scale: f64) -> Self {
        *self.scale.write() = Some(scale);
        self
    }

    pub fn find(&self, id: &LayerId) -> Option<Arc<MemoryLayer>> {
        self.layers.read().iter().find_map(|l| l.find(id))
    }

    pub fn add_layer(&self, layer: MemoryLayer) -> Arc<MemoryLayer> {
        let layer = Arc::new(layer);
        self.layers.write().push(layer.clone());
        self.notify(MapEvent::LayersChanged { parent: None });
        layer
    }

    pub fn insert_layer(&self, index: usize, layer: MemoryLayer) -> Arc<MemoryLayer> {
        let layer = Arc::new(layer);
        {
            let mut layers = self.layers.write();
            let index = index.min(layers.len());
            layers.insert(index, layer.clone());
        }
        self.notify(MapEvent::LayersChanged { parent: None });
        layer
    }

    /// Remove a layer anywhere in the tree
    pub fn remove_layer(&self, id: &LayerId) -> Option<Arc<MemoryLayer>> {
        let top_level = {
            let mut layers = self.layers.write();
            layers
                .iter()
                .position(|l| &l.id == id)
                .map(|pos| layers.remove(pos))
        };
        if let Some(removed) = top_level {
            self.notify(MapEvent::LayersChanged { parent: None });
            return Some(removed);
        }

        let parent = self.find_parent(id)?;
        let removed = parent.remove_sub_layer(id)?;
        self.notify(MapEvent::LayersChanged {
            parent: Some(parent.id.clone()),
        });
        Some(removed)
    }

    pub fn move_layer(&self, from: usize, to: usize) {
        {
            let mut layers = self.layers.write();
            if from >= layers.len() {
                return;
            }
            let layer = layers.remove(from);
            let to = to.min(layers.len());
            layers.insert(to, layer);
        }
        self.notify(MapEvent::LayersChanged { parent: None });
    }

    pub fn add_sub_layer(&self, parent: &LayerId, layer: MemoryLayer) -> Option<Arc<MemoryLayer>> {
        let parent_layer = self.find(parent)?;
        let layer = Arc::new(layer);
        parent_layer.insert_sub_layer(usize::MAX, layer.clone());
        self.notify(MapEvent::LayersChanged {
            parent: Some(parent.clone()),
        });
        Some(layer)
    }

    pub fn set_visible(&self, id: &LayerId, visible: bool) {
        if let Some(layer) = self.find(id) {
            layer.set_visible(visible);
            self.notify_property(id, LayerProperty::Visibility);
        }
    }

    pub fn set_renderer(&self, id: &LayerId, renderer: Option<Arc<dyn Renderer>>) {
        if let Some(layer) = self.find(id) {
            layer.set_renderer(renderer);
            self.notify_property(id, LayerProperty::Renderer);
        }
    }

    pub fn set_load_status(&self, id: &LayerId, status: LoadStatus) {
        if let Some(layer) = self.find(id) {
            layer.set_load_status(status);
            self.notify_property(id, LayerProperty::LoadState);
        }
    }

    pub fn set_scale(&self, scale: Option<f64>) {
        *self.scale.write() = scale;
        self.notify(MapEvent::ScaleChanged);
    }

    fn notify_property(&self, id: &LayerId, property: LayerProperty) {
        self.notify(MapEvent::LayerPropertyChanged {
            layer: id.clone(),
            property,
        });
    }

    /// Broadcast to every live subscriber, dropping closed ones
    pub fn notify(&self, event: MapEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn find_parent(&self, id: &LayerId) -> Option<Arc<MemoryLayer>> {
        fn walk(layer: &Arc<MemoryLayer>, id: &LayerId) -> Option<Arc<MemoryLayer>> {
            let children = layer.sub_layer_handles();
            if children.iter().any(|c| &c.id == id) {
                return Some(layer.clone());
            }
            children.iter().find_map(|c| walk(c, id))
        }
        self.layers.read().iter().find_map(|l| walk(l, id))
    }
}

impl MapSource for MemoryMap {
    fn layers(&self) -> Vec<Arc<dyn Layer>> {
        self.layers
            .read()
            .iter()
            .map(|l| l.clone() as Arc<dyn Layer>)
            .collect()
    }

    fn scale(&self) -> Option<f64> {
        *self.scale.read()
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<MapEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Some(rx)
    }
}

// ═══════════════════════════════════════════════════════════════
// Serializable fixtures
// ═══════════════════════════════════════════════════════════════

/// One legend item of a fixture layer; the symbol is kept as its name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegendFixture {
    pub label: String,
    pub symbol: String,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerFixture {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub kind: LayerKind,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub scale_range: Option<ScaleRange>,
    /// Legend items; absent means "no renderer"
    #[serde(default)]
    pub legend: Option<Vec<LegendFixture>>,
    /// Renderer failure message
    #[serde(default)]
    pub renderer_error: Option<String>,
    /// Layer load failure message
    #[serde(default)]
    pub load_error: Option<String>,
    #[serde(default)]
    pub layers: Vec<LayerFixture>,
}

impl LayerFixture {
    pub fn into_layer(self) -> MemoryLayer {
        let label = self.label.unwrap_or_else(|| self.id.clone());
        let mut layer = MemoryLayer::new(self.id, label)
            .with_kind(self.kind)
            .with_visible(self.visible)
            .with_scale_range(self.scale_range.unwrap_or_default());

        if let Some(reason) = self.renderer_error {
            layer = layer.with_renderer(StaticRenderer::failing(reason));
        } else if let Some(legend) = self.legend {
            let infos = legend
                .into_iter()
                .map(|item| LegendInfo::new(item.label, SymbolRef::new(item.symbol)))
                .collect();
            layer = layer.with_renderer(StaticRenderer::new(infos));
        }

        if let Some(reason) = self.load_error {
            layer = layer.with_load_status(LoadStatus::Failed(reason));
        }

        layer.with_sub_layers(self.layers.into_iter().map(LayerFixture::into_layer).collect())
    }
}

/// YAML/JSON description of a whole map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapFixture {
    #[serde(default)]
    pub scale: Option<f64>,
    pub layers: Vec<LayerFixture>,
}

impl MapFixture {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_yaml_str(&text)?)
    }

    pub fn into_map(self) -> MemoryMap {
        let map = MemoryMap::new(self.layers.into_iter().map(LayerFixture::into_layer).collect());
        match self.scale {
            Some(scale) => map.with_scale(scale),
            None => map,
        }
    }
}

/// Placeholder hierarchy shown by a UI shell when no map is bound:
/// `MapLayerItem → LayerItem → {LegendItem1, LegendItem2}`
pub fn design_time_fixture() -> MemoryMap {
    let layer_item = MemoryLayer::new("layer-item", "LayerItem").with_renderer(StaticRenderer::new(
        vec![
            LegendInfo::new("LegendItem1", SymbolRef::new("circle:red".to_string())),
            LegendInfo::new("LegendItem2", SymbolRef::new("diamond:green".to_string())),
        ],
    ));
    let map_layer = MemoryLayer::new("map-layer-item", "MapLayerItem")
        .with_kind(LayerKind::Map)
        .with_sub_layers(vec![layer_item]);
    MemoryMap::new(vec![map_layer])
}
