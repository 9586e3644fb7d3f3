//! LegendTree - aggregate root and incremental synchronizer
//!
//! Owns the root sequence, the configuration and the bound map.
//!
//! ━━━ Passes ━━━
//! A full rebuild pass walks the whole map, builds the skeleton under the
//! state lock, spawns one resolution task per layer that needs entries and
//! awaits them. Passes are serialized by `pass_lock`. Every request takes a
//! ticket; a pass serves all tickets issued before it started, so requests
//! queued behind a running pass collapse into a single pass.
//!
//! ━━━ Incremental events ━━━
//! Map events are applied synchronously under the state lock and only touch
//! the smallest affected child list. The map listener never waits for a
//! running pass: events that need one queue it in the background.
//!
//! ━━━ Staleness ━━━
//! A finished resolution is dropped (no mutation, no event) when the map was
//! reassigned meanwhile (epoch), the node was detached, or the layer's
//! renderer generation moved on.

use crate::adapter::LayerSnapshot;
use crate::builder::{registry_of, BuildOptions, BuildOutput, ReuseRegistry, TreeBuilder};
use crate::config::{LayerItemsMode, LegendConfig, Templates};
use crate::error::{ErrorCategory, LayerError, LegendError, Result};
use crate::index::ParentIndex;
use crate::model::{Applied, LayerNode, ViewItem};
use crate::ports::{LayerId, LayerKind, LayerProperty, MapEvent, MapSource};
use crate::projection;
use crate::resolver::{LegendResolver, Resolution};
use crate::state::LoadState;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Emitted once per completed resolution of an attached layer
#[derive(Debug, Clone)]
pub struct RefreshedEvent {
    pub layer_id: LayerId,
    /// Top-level layer the refreshed layer belongs to (itself at the top)
    pub top_level: LayerId,
    pub node: Arc<LayerNode>,
    /// Set when the resolution failed; the node keeps its previous entries
    pub error: Option<LayerError>,
}

impl RefreshedEvent {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

struct TreeState {
    map: Option<Arc<dyn MapSource>>,
    config: LegendConfig,
    roots: Vec<Arc<LayerNode>>,
    index: ParentIndex,
    /// Bumped on every map assignment
    epoch: u64,
    /// Renderer generation per layer; numbers are never reused
    generations: HashMap<LayerId, u64>,
    next_generation: u64,
}

impl TreeState {
    fn new(config: LegendConfig) -> Self {
        Self {
            map: None,
            config,
            roots: Vec::new(),
            index: ParentIndex::new(),
            epoch: 0,
            generations: HashMap::new(),
            next_generation: 1,
        }
    }

    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            show_only_visible: self.config.show_only_visible_layers,
            reverse_top_level: self.config.reverse_layers_order,
            scale: self.map.as_ref().and_then(|m| m.scale()),
        }
    }

    fn generation_of(&mut self, id: &LayerId) -> u64 {
        if let Some(generation) = self.generations.get(id) {
            return *generation;
        }
        let generation = self.allocate_generation();
        self.generations.insert(id.clone(), generation);
        generation
    }

    fn bump_generation(&mut self, id: &LayerId) -> u64 {
        let generation = self.allocate_generation();
        self.generations.insert(id.clone(), generation);
        generation
    }

    fn allocate_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn set_roots(&mut self, roots: Vec<Arc<LayerNode>>) {
        self.roots = roots;
        self.index.rebuild(&self.roots);
    }

    fn detach_all(&mut self) {
        for root in self.roots.drain(..) {
            root.detach();
        }
        self.index.clear();
    }

    /// Ids from the top level down to `id` (inclusive), following the map
    fn source_path(&self, id: &LayerId) -> Option<Vec<LayerId>> {
        fn walk(layers: Vec<LayerSnapshot>, id: &LayerId, path: &mut Vec<LayerId>) -> bool {
            for layer in layers {
                let layer_id = layer.id();
                let found = &layer_id == id;
                path.push(layer_id);
                if found || walk(layer.children(), id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let map = self.map.as_ref()?;
        let mut path = Vec::new();
        walk(snapshots(map.as_ref()), id, &mut path).then_some(path)
    }

    fn parent_visible(&self, id: &LayerId) -> bool {
        self.index
            .parent(id)
            .flatten()
            .and_then(|parent| self.index.node(&parent))
            .map_or(true, |parent| parent.is_effectively_visible())
    }
}

fn snapshots(map: &dyn MapSource) -> Vec<LayerSnapshot> {
    map.layers().into_iter().map(LayerSnapshot::new).collect()
}

/// Detach what a build left in the registry
fn detach_leftovers(index: &ParentIndex, reuse: ReuseRegistry) -> usize {
    let count = reuse.len();
    for node in reuse.into_values() {
        index.remove(&node);
        node.mark_detached();
    }
    count
}

struct Inner {
    state: Mutex<TreeState>,
    resolver: LegendResolver,
    events: broadcast::Sender<RefreshedEvent>,
    pass_lock: tokio::sync::Mutex<()>,
    requested: AtomicU64,
    completed: AtomicU64,
    force_requested: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Counts a background task until dropped
struct TaskGuard(Arc<Inner>);

impl TaskGuard {
    fn new(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

impl Inner {
    fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Replace the map; every node of the previous tree is detached
    fn bind(&self, map: Option<Arc<dyn MapSource>>) -> u64 {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }

        let mut st = self.state.lock();
        st.epoch += 1;
        st.detach_all();
        st.generations.clear();
        st.map = map;
        self.resolver.clear();

        info!(
            "Legend bound to {} (epoch {})",
            if st.map.is_some() { "a new map" } else { "no map" },
            st.epoch
        );
        st.epoch
    }

    // ═══════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════

    /// Bring `node`'s entries up to date with its renderer generation
    ///
    /// Cache hits are applied in place. Otherwise a resolution task is
    /// spawned unless one for the same generation is already running.
    fn schedule(
        self: &Arc<Self>,
        st: &mut TreeState,
        node: &Arc<LayerNode>,
        force: bool,
    ) -> Option<JoinHandle<()>> {
        if !node.kind().has_symbology() || !node.is_attached() {
            return None;
        }

        let generation = st.generation_of(node.id());
        if !force {
            if node.generation() == generation && node.load_state() == LoadState::Loaded {
                return None;
            }
            if let Some(infos) = self.resolver.cached(node.id(), generation) {
                if node.restore(generation, &infos) {
                    debug!("Layer {}: restored {} cached entries", node.id(), infos.len());
                    return None;
                }
            }
        }

        if !node.begin_loading(generation) {
            return None;
        }

        let guard = TaskGuard::new(self);
        let inner = self.clone();
        let node = node.clone();
        let snapshot = node.snapshot();
        let epoch = st.epoch;

        Some(tokio::spawn(async move {
            let _guard = guard;
            let result = inner.resolver.resolve(&snapshot, generation).await;
            inner.complete(&node, generation, epoch, result);
        }))
    }

    fn schedule_all(
        self: &Arc<Self>,
        st: &mut TreeState,
        nodes: &[Arc<LayerNode>],
        force: bool,
    ) -> Vec<JoinHandle<()>> {
        nodes
            .iter()
            .filter_map(|node| self.schedule(st, node, force))
            .collect()
    }

    fn complete(&self, node: &Arc<LayerNode>, generation: u64, epoch: u64, result: Resolution) {
        // Held while applying so detaching and applying never interleave
        let st = self.state.lock();
        if st.epoch != epoch {
            debug!("Layer {}: discarding resolution for a previous map", node.id());
            return;
        }

        match node.apply_resolution(generation, result) {
            Applied::Loaded => {
                debug!(
                    "Layer {}: {} legend entries resolved",
                    node.id(),
                    node.entries().len()
                );
                self.emit(&st.index, node, None);
            }
            Applied::Failed(err) => {
                warn!(
                    "Layer {}: legend resolution failed ({}): {}",
                    node.id(),
                    err.category(),
                    err
                );
                self.emit(&st.index, node, Some(err));
            }
            Applied::Stale => {
                debug!(
                    "Layer {}: discarding stale resolution (generation {})",
                    node.id(),
                    generation
                );
            }
        }
    }

    fn emit(&self, index: &ParentIndex, node: &Arc<LayerNode>, error: Option<LayerError>) {
        let top_level = index
            .top_level_of(node.id())
            .unwrap_or_else(|| node.id().clone());
        // No receivers is fine
        let _ = self.events.send(RefreshedEvent {
            layer_id: node.id().clone(),
            top_level,
            node: node.clone(),
            error,
        });
    }

    // ═══════════════════════════════════════════════════════════════
    // Full passes
    // ═══════════════════════════════════════════════════════════════

    async fn rebuild(self: &Arc<Self>, force: bool) {
        if force {
            self.force_requested.store(true, Ordering::SeqCst);
        }
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;

        let _pass = self.pass_lock.lock().await;
        if self.completed.load(Ordering::SeqCst) >= ticket {
            debug!("Rebuild request {} served by an earlier pass", ticket);
            return;
        }

        let served = self.requested.load(Ordering::SeqCst);
        let force = self.force_requested.swap(false, Ordering::SeqCst);
        let start = Instant::now();

        let handles = self.build_pass(force);
        self.completed.store(served, Ordering::SeqCst);

        let spawned = handles.len();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Resolution task ended abnormally: {}", e);
            }
        }

        info!(
            "Rebuild pass {} finished - {} resolutions in {}ms",
            served,
            spawned,
            start.elapsed().as_millis()
        );
    }

    fn build_pass(self: &Arc<Self>, force: bool) -> Vec<JoinHandle<()>> {
        let mut st = self.state.lock();
        let Some(map) = st.map.clone() else {
            st.detach_all();
            return Vec::new();
        };

        if force {
            self.resolver.clear_cache();
        }

        let options = st.build_options();
        let mut reuse = registry_of(&st.roots);
        let BuildOutput { roots, pending } =
            TreeBuilder::build(&snapshots(map.as_ref()), &options, &mut reuse);
        let detached = detach_leftovers(&st.index, reuse);
        st.set_roots(roots);

        info!(
            "Rebuild pass: {} top-level layers, {} with symbology, {} detached{}",
            st.roots.len(),
            pending.len(),
            detached,
            if force { " (forced)" } else { "" }
        );

        self.schedule_all(&mut st, &pending, force)
    }

    /// Spawn a rebuild pass in the background
    fn request_rebuild(self: &Arc<Self>) {
        if self.state.lock().map.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, rebuild request dropped");
            return;
        };

        let guard = TaskGuard::new(self);
        let inner = self.clone();
        runtime.spawn(async move {
            let _guard = guard;
            inner.rebuild(false).await;
        });
    }

    // ═══════════════════════════════════════════════════════════════
    // Incremental synchronization
    // ═══════════════════════════════════════════════════════════════

    async fn handle_event(self: &Arc<Self>, event: MapEvent) {
        let needs_pass = self.apply_event(event);
        if needs_pass {
            self.rebuild(false).await;
        }
    }

    /// Returns true when the event needs a full pass
    fn apply_event(self: &Arc<Self>, event: MapEvent) -> bool {
        let mut st = self.state.lock();
        if st.map.is_none() {
            return false;
        }

        match event {
            MapEvent::LayersChanged { parent: None } => {
                self.rescope(&mut st, None, HashSet::new());
            }
            MapEvent::LayersChanged { parent: Some(parent) } => {
                if st.index.contains(&parent) {
                    self.rescope(&mut st, Some(parent), HashSet::new());
                } else {
                    // Parent filtered out; it may have to appear now
                    self.rescope_path(&mut st, &parent);
                }
            }
            MapEvent::ScaleChanged => {
                if st.config.show_only_visible_layers {
                    return true;
                }
                for root in st.roots.clone() {
                    self.refresh_visibility(&mut st, &root, true);
                }
            }
            MapEvent::LayerPropertyChanged { layer, property } => {
                debug!("Layer {}: {:?} changed", layer, property);

                match property {
                    LayerProperty::Renderer => self.renderer_changed(&mut st, &layer),
                    LayerProperty::Visibility | LayerProperty::ScaleRange => {
                        self.visibility_changed(&mut st, &layer)
                    }
                    LayerProperty::LoadState => self.load_state_changed(&mut st, &layer),
                    LayerProperty::Label => {
                        if let Some(node) = st.index.node(&layer) {
                            node.set_label(node.snapshot().label());
                        }
                    }
                }
            }
        }
        false
    }

    fn renderer_changed(self: &Arc<Self>, st: &mut TreeState, id: &LayerId) {
        let generation = st.bump_generation(id);
        self.resolver.invalidate(id);

        if let Some(node) = st.index.node(id) {
            debug!("Layer {}: renderer replaced, generation {}", id, generation);
            self.schedule(st, &node, false);
        }
    }

    fn visibility_changed(self: &Arc<Self>, st: &mut TreeState, id: &LayerId) {
        if st.config.show_only_visible_layers {
            // Inclusion may change: rebuild the nearest attached scope
            self.rescope_path(st, id);
            return;
        }

        if let Some(node) = st.index.node(id) {
            let parent_visible = st.parent_visible(id);
            self.refresh_visibility(st, &node, parent_visible);
        }
    }

    fn load_state_changed(self: &Arc<Self>, st: &mut TreeState, id: &LayerId) {
        let Some(node) = st.index.node(id) else {
            return;
        };

        // Sub-layers may only be known once the layer is loaded
        if node.has_children() || !node.snapshot().children().is_empty() {
            self.rescope(st, Some(id.clone()), HashSet::new());
        }

        // Renderer failures are not fixed by a reload; they wait for a
        // renderer change, a visibility change or refresh()
        let retry = match node.load_state() {
            LoadState::NotLoaded => true,
            LoadState::Failed => node
                .last_error()
                .map_or(true, |e| e.category() == ErrorCategory::Transient),
            LoadState::Loading | LoadState::Loaded => false,
        };
        if retry {
            self.schedule(st, &node, false);
        }
    }

    /// Re-evaluate effective visibility below `node`, retrying failed
    /// layers that became visible
    fn refresh_visibility(self: &Arc<Self>, st: &mut TreeState, node: &Arc<LayerNode>, parent_visible: bool) {
        let scale = st.build_options().scale;
        for visited in TreeBuilder::update_visibility(node, parent_visible, scale) {
            if visited.load_state() == LoadState::Failed && visited.is_effectively_visible() {
                self.schedule(st, &visited, false);
            }
        }
    }

    /// Rebuild the nearest attached strict ancestor of `id`, revisiting the
    /// path down to `id`
    fn rescope_path(self: &Arc<Self>, st: &mut TreeState, id: &LayerId) {
        let Some(path) = st.source_path(id) else {
            debug!("Layer {}: not part of the map, event ignored", id);
            return;
        };

        let ancestors = &path[..path.len() - 1];
        let scope_at = ancestors.iter().rposition(|a| st.index.contains(a));
        let (scope, below) = match scope_at {
            Some(i) => (Some(ancestors[i].clone()), &path[i + 1..]),
            None => (None, &path[..]),
        };

        let changed = below.iter().cloned().collect();
        self.rescope(st, scope, changed);
    }

    /// Rebuild the child list of `scope` (`None` = top level) and splice it
    /// into the tree
    fn rescope(
        self: &Arc<Self>,
        st: &mut TreeState,
        scope: Option<LayerId>,
        changed: HashSet<LayerId>,
    ) {
        let Some(map) = st.map.clone() else {
            return;
        };
        let options = st.build_options();

        let Some(scope_id) = scope else {
            let mut reuse = registry_of(&st.roots);
            let out = TreeBuilder::build_children(
                &snapshots(map.as_ref()),
                None,
                &options,
                &mut reuse,
                &changed,
            );
            let detached = detach_leftovers(&st.index, reuse);
            st.set_roots(out.roots);
            debug!(
                "Top level rescoped: {} layers, {} revisited, {} detached",
                st.roots.len(),
                out.pending.len(),
                detached
            );
            self.schedule_all(st, &out.pending, false);
            return;
        };

        let Some(parent) = st.index.node(&scope_id) else {
            return;
        };
        let mut reuse = registry_of(&parent.children());
        let out = TreeBuilder::build_children(
            &parent.snapshot().children(),
            Some(&parent),
            &options,
            &mut reuse,
            &changed,
        );

        if options.show_only_visible && parent.kind() == LayerKind::Group && out.roots.is_empty() {
            debug!("Group {} left empty, rescoping its parent", scope_id);
            let grandparent = st.index.parent(&scope_id).flatten();
            let mut changed = changed;
            changed.insert(scope_id);
            self.rescope(st, grandparent, changed);
            return;
        }

        let detached = detach_leftovers(&st.index, reuse);
        for child in &out.roots {
            st.index.insert_subtree(child, Some(&scope_id));
        }
        debug!(
            "Layer {}: children rescoped, {} layers, {} revisited, {} detached",
            scope_id,
            out.roots.len(),
            out.pending.len(),
            detached
        );
        parent.set_children(out.roots);
        self.schedule_all(st, &out.pending, false);
    }
}

/// Legend view model bound to one map
///
/// Cheap to clone; clones share the same tree. Background work (resolution
/// tasks, queued passes, the map listener) needs a tokio runtime.
#[derive(Clone)]
pub struct LegendTree {
    inner: Arc<Inner>,
}

impl LegendTree {
    pub fn new() -> Self {
        Self::with_config(LegendConfig::default())
    }

    pub fn with_config(config: LegendConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TreeState::new(config)),
                resolver: LegendResolver::new(),
                events,
                pass_lock: tokio::sync::Mutex::new(()),
                requested: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                force_requested: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                listener: Mutex::new(None),
            }),
        }
    }

    // ━━━ Configuration ━━━

    pub fn config(&self) -> LegendConfig {
        self.inner.state.lock().config.clone()
    }

    pub fn mode(&self) -> LayerItemsMode {
        self.inner.state.lock().config.mode
    }

    /// Projection only, the tree is untouched
    pub fn set_mode(&self, mode: LayerItemsMode) {
        self.inner.state.lock().config.mode = mode;
    }

    /// Projection only; rejected like `set_config` when a name is empty
    pub fn set_templates(&self, templates: Templates) -> Result<()> {
        let mut st = self.inner.state.lock();
        let config = st.config.clone().templates(templates);
        config.validate()?;
        st.config = config;
        Ok(())
    }

    pub fn set_show_only_visible_layers(&self, value: bool) {
        let changed = {
            let mut st = self.inner.state.lock();
            let changed = st.config.show_only_visible_layers != value;
            st.config.show_only_visible_layers = value;
            changed
        };
        if changed {
            self.inner.request_rebuild();
        }
    }

    pub fn set_reverse_layers_order(&self, value: bool) {
        let changed = {
            let mut st = self.inner.state.lock();
            let changed = st.config.reverse_layers_order != value;
            st.config.reverse_layers_order = value;
            changed
        };
        if changed {
            self.inner.request_rebuild();
        }
    }

    pub fn set_config(&self, config: LegendConfig) -> Result<()> {
        config.validate()?;
        let needs_pass = {
            let mut st = self.inner.state.lock();
            let needs_pass = st.config.show_only_visible_layers != config.show_only_visible_layers
                || st.config.reverse_layers_order != config.reverse_layers_order;
            st.config = config;
            needs_pass
        };
        if needs_pass {
            self.inner.request_rebuild();
        }
        Ok(())
    }

    // ━━━ Map binding ━━━

    pub fn map(&self) -> Option<Arc<dyn MapSource>> {
        self.inner.state.lock().map.clone()
    }

    /// Bind `map` (or unbind) and run a full pass, waiting for its
    /// resolutions
    pub async fn set_map(&self, map: Option<Arc<dyn MapSource>>) {
        self.inner.bind(map);
        self.inner.rebuild(false).await;
    }

    /// Bind `map`, queue a full pass and follow its change notifications
    pub fn attach(&self, map: Arc<dyn MapSource>) {
        let notifications = map.subscribe();
        let epoch = self.inner.bind(Some(map));
        self.inner.request_rebuild();

        let Some(mut rx) = notifications else {
            debug!("Map offers no change notifications, legend will not follow it");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let listener = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.epoch() != epoch {
                    break;
                }
                // Never wait for the pass here, later events must apply now
                if inner.apply_event(event) {
                    inner.request_rebuild();
                }
            }
            debug!("Map listener for epoch {} stopped", epoch);
        });
        *self.inner.listener.lock() = Some(listener);
    }

    // ━━━ Reading ━━━

    /// Root sequence of the full tree
    pub fn layer_items(&self) -> Vec<Arc<LayerNode>> {
        self.inner.state.lock().roots.clone()
    }

    /// Projected sequence for the current mode
    pub fn layer_items_source(&self) -> Vec<ViewItem> {
        let st = self.inner.state.lock();
        projection::project(&st.roots, st.config.mode, &st.config.templates)
    }

    /// Attached node for `id`
    pub fn find(&self, id: &LayerId) -> Option<Arc<LayerNode>> {
        self.inner.state.lock().index.node(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshedEvent> {
        self.inner.events.subscribe()
    }

    /// How many times a renderer was actually queried
    pub fn provider_calls(&self) -> usize {
        self.inner.resolver.provider_calls()
    }

    // ━━━ Driving ━━━

    /// Full rebuild and re-resolution of every layer, bypassing caches
    pub async fn refresh(&self) -> Result<()> {
        let bound = self.inner.state.lock().map.is_some();
        if !bound {
            return Err(LegendError::NoMap);
        }
        self.inner.rebuild(true).await;
        Ok(())
    }

    /// Apply one map event; an event that needs a full pass waits for it
    pub async fn handle_event(&self, event: MapEvent) {
        self.inner.handle_event(event).await;
    }

    /// Resolves once no resolution task or queued pass is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for LegendTree {
    fn default() -> Self {
        Self::new()
    }
}
