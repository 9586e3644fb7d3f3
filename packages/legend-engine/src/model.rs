//! Legend view model: `LayerNode`, `LegendEntry`, `ViewItem`
//!
//! Nodes are shared as `Arc<LayerNode>` and their identity is pointer
//! identity. The synchronizer mutates a node in place so observers holding
//! an `Arc` keep seeing the same object across refreshes.

use crate::adapter::LayerSnapshot;
use crate::error::LayerError;
use crate::ports::{Layer, LayerId, LayerKind, LegendInfo, ScaleRange};
use crate::state::{LoadState, LoadStateMachine};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Opaque symbol handle, passed through from the symbology library untouched
#[derive(Clone)]
pub struct SymbolRef(Arc<dyn Any + Send + Sync>);

impl SymbolRef {
    pub fn new<T: Any + Send + Sync>(symbol: T) -> Self {
        Self(Arc::new(symbol))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Same underlying allocation?
    pub fn ptr_eq(&self, other: &SymbolRef) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl fmt::Debug for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolRef({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// A leaf symbology item
pub struct LegendEntry {
    label: String,
    symbol: SymbolRef,
    owner_id: LayerId,
    owner: Weak<LayerNode>,
}

impl LegendEntry {
    fn new(info: &LegendInfo, owner: &Arc<LayerNode>) -> Self {
        Self {
            label: info.label.clone(),
            symbol: info.symbol.clone(),
            owner_id: owner.id().clone(),
            owner: Arc::downgrade(owner),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn symbol(&self) -> &SymbolRef {
        &self.symbol
    }

    pub fn owner_id(&self) -> &LayerId {
        &self.owner_id
    }

    /// Owning node, if it is still alive
    pub fn owner(&self) -> Option<Arc<LayerNode>> {
        self.owner.upgrade()
    }

    fn matches(&self, info: &LegendInfo) -> bool {
        self.label == info.label && self.symbol.ptr_eq(&info.symbol)
    }
}

impl PartialEq for LegendEntry {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.owner_id == other.owner_id
            && self.symbol.ptr_eq(&other.symbol)
    }
}

impl fmt::Debug for LegendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegendEntry")
            .field("label", &self.label)
            .field("owner", &self.owner_id)
            .field("symbol", &self.symbol)
            .finish()
    }
}

struct NodeState {
    source: Arc<dyn Layer>,
    label: String,
    visible: bool,
    effective_visible: bool,
    scale_range: ScaleRange,
    children: Vec<Arc<LayerNode>>,
    entries: Vec<Arc<LegendEntry>>,
    load: LoadStateMachine,
    last_error: Option<LayerError>,
    generation: u64,
}

/// One entry in the legend tree
pub struct LayerNode {
    id: LayerId,
    kind: LayerKind,
    attached: AtomicBool,
    state: RwLock<NodeState>,
}

/// Outcome of applying a finished resolution to a node
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Applied {
    Loaded,
    Failed(LayerError),
    /// Node detached or generation moved on; nothing was changed
    Stale,
}

impl LayerNode {
    pub(crate) fn new(snapshot: &LayerSnapshot, effective_visible: bool) -> Arc<Self> {
        Arc::new(Self {
            id: snapshot.id(),
            kind: snapshot.kind(),
            attached: AtomicBool::new(true),
            state: RwLock::new(NodeState {
                source: snapshot.layer().clone(),
                label: snapshot.label(),
                visible: snapshot.is_visible(),
                effective_visible,
                scale_range: snapshot.scale_range(),
                children: Vec::new(),
                entries: Vec::new(),
                load: LoadStateMachine::default(),
                last_error: None,
                generation: 0,
            }),
        })
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn label(&self) -> String {
        self.state.read().label.clone()
    }

    /// Own visibility flag, as reported by the layer
    pub fn is_visible(&self) -> bool {
        self.state.read().visible
    }

    /// Own visibility AND in scale range AND every ancestor effectively visible
    pub fn is_effectively_visible(&self) -> bool {
        self.state.read().effective_visible
    }

    pub fn scale_range(&self) -> ScaleRange {
        self.state.read().scale_range
    }

    pub fn children(&self) -> Vec<Arc<LayerNode>> {
        self.state.read().children.clone()
    }

    pub fn has_children(&self) -> bool {
        !self.state.read().children.is_empty()
    }

    pub fn entries(&self) -> Vec<Arc<LegendEntry>> {
        self.state.read().entries.clone()
    }

    pub fn load_state(&self) -> LoadState {
        self.state.read().load.state()
    }

    pub fn last_error(&self) -> Option<LayerError> {
        self.state.read().last_error.clone()
    }

    /// Renderer generation the current entries (or in-flight request) belong to
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// False once the node has been removed or filtered out of the tree
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot::new(self.state.read().source.clone())
    }

    /// Refresh the read-only attributes from the external layer
    pub(crate) fn update_from(&self, snapshot: &LayerSnapshot, effective_visible: bool) {
        let mut st = self.state.write();
        st.source = snapshot.layer().clone();
        st.label = snapshot.label();
        st.visible = snapshot.is_visible();
        st.scale_range = snapshot.scale_range();
        st.effective_visible = effective_visible;
    }

    pub(crate) fn set_label(&self, label: String) {
        self.state.write().label = label;
    }

    pub(crate) fn set_children(&self, children: Vec<Arc<LayerNode>>) {
        self.state.write().children = children;
    }

    /// Enter LOADING for `generation`.
    ///
    /// Returns false when a resolution for the same generation is already in
    /// flight, so the caller must not start another one.
    pub(crate) fn begin_loading(&self, generation: u64) -> bool {
        let mut st = self.state.write();
        if st.load.state() == LoadState::Loading {
            if st.generation == generation {
                return false;
            }
            // Superseded request; its result fails the generation check later
            st.generation = generation;
            return true;
        }
        st.generation = generation;
        match st.load.start() {
            Ok(()) => true,
            Err(e) => {
                debug!("Layer {}: {}", self.id, e);
                false
            }
        }
    }

    /// Populate from a cache hit without going through LOADING
    pub(crate) fn restore(self: &Arc<Self>, generation: u64, infos: &[LegendInfo]) -> bool {
        let mut st = self.state.write();
        if st.load.restore().is_err() {
            return false;
        }
        st.generation = generation;
        st.entries = self.merge_entries(&st.entries, infos);
        st.last_error = None;
        true
    }

    /// Apply a finished resolution, unless it went stale meanwhile
    pub(crate) fn apply_resolution(
        self: &Arc<Self>,
        generation: u64,
        result: std::result::Result<Vec<LegendInfo>, LayerError>,
    ) -> Applied {
        if !self.is_attached() {
            return Applied::Stale;
        }

        let mut st = self.state.write();
        if st.generation != generation || st.load.state() != LoadState::Loading {
            return Applied::Stale;
        }

        match result {
            Ok(infos) => {
                st.entries = self.merge_entries(&st.entries, &infos);
                st.last_error = None;
                // Loading is checked above, so this cannot fail
                let _ = st.load.complete();
                Applied::Loaded
            }
            Err(err) => {
                // Previously resolved entries are kept
                st.last_error = Some(err.clone());
                let _ = st.load.fail();
                Applied::Failed(err)
            }
        }
    }

    /// Reuse existing entry `Arc`s that still match, so identical results
    /// keep entry identity
    fn merge_entries(
        self: &Arc<Self>,
        existing: &[Arc<LegendEntry>],
        infos: &[LegendInfo],
    ) -> Vec<Arc<LegendEntry>> {
        let unchanged = existing.len() == infos.len()
            && existing.iter().zip(infos).all(|(e, i)| e.matches(i));
        if unchanged {
            return existing.to_vec();
        }
        infos
            .iter()
            .map(|info| Arc::new(LegendEntry::new(info, self)))
            .collect()
    }

    /// Detach this node and its whole subtree
    pub(crate) fn detach(&self) {
        self.mark_detached();
        for child in self.children() {
            child.detach();
        }
    }

    /// Detach this node only; its children may live on elsewhere
    pub(crate) fn mark_detached(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// This node followed by all descendants, depth-first
    pub fn descendants(self: &Arc<Self>) -> Vec<Arc<LayerNode>> {
        let mut out = vec![self.clone()];
        for child in self.children() {
            out.extend(child.descendants());
        }
        out
    }
}

impl fmt::Debug for LayerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.read();
        f.debug_struct("LayerNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &st.label)
            .field("load_state", &st.load.state())
            .field("children", &st.children.len())
            .field("entries", &st.entries.len())
            .finish()
    }
}

/// Item of the projected sequence exposed to consumers
#[derive(Debug, Clone)]
pub enum ViewItem {
    Layer {
        node: Arc<LayerNode>,
        template: Option<String>,
    },
    Entry {
        entry: Arc<LegendEntry>,
        template: Option<String>,
    },
}

impl ViewItem {
    pub fn label(&self) -> String {
        match self {
            ViewItem::Layer { node, .. } => node.label(),
            ViewItem::Entry { entry, .. } => entry.label().to_string(),
        }
    }

    pub fn template(&self) -> Option<&str> {
        match self {
            ViewItem::Layer { template, .. } | ViewItem::Entry { template, .. } => {
                template.as_deref()
            }
        }
    }

    pub fn as_layer(&self) -> Option<&Arc<LayerNode>> {
        match self {
            ViewItem::Layer { node, .. } => Some(node),
            ViewItem::Entry { .. } => None,
        }
    }

    pub fn as_entry(&self) -> Option<&Arc<LegendEntry>> {
        match self {
            ViewItem::Entry { entry, .. } => Some(entry),
            ViewItem::Layer { .. } => None,
        }
    }

    /// Identity comparison (same node / same entry allocation)
    pub fn same_item(&self, other: &ViewItem) -> bool {
        match (self, other) {
            (ViewItem::Layer { node: a, .. }, ViewItem::Layer { node: b, .. }) => Arc::ptr_eq(a, b),
            (ViewItem::Entry { entry: a, .. }, ViewItem::Entry { entry: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}
