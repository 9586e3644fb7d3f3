/*
 * Legend Engine - Hierarchical Legend Aggregation
 *
 * Keeps a legend view model in sync with a live map layer tree.
 *
 * Architecture:
 * - Ports (map, layer, renderer contracts)
 * - Tree Builder (group recursion, visibility filter, identity reuse)
 * - Legend Resolver (async, de-duplicated, cached per renderer generation)
 * - Mode Projection (flat / tree)
 * - Incremental Synchronizer (scoped rebuilds, stale result discard)
 */

// Public modules
pub mod adapter;
pub mod builder;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fixture;
pub mod index;
pub mod model;
pub mod ports;
pub mod projection;
pub mod resolver;
pub mod state;
pub mod telemetry;

// Re-exports
pub use adapter::LayerSnapshot;
pub use builder::{BuildOptions, BuildOutput, ReuseRegistry, TreeBuilder};
pub use cache::{EntryCache, EntryKey};
pub use config::{ConfigError, LayerItemsMode, LegendConfig, Templates};
pub use engine::{LegendTree, RefreshedEvent};
pub use error::{ErrorCategory, LayerError, LegendError, Result};
pub use fixture::{design_time_fixture, MapFixture, MemoryLayer, MemoryMap, StaticRenderer};
pub use index::ParentIndex;
pub use model::{LayerNode, LegendEntry, SymbolRef, ViewItem};
pub use ports::{
    Layer, LayerId, LayerKind, LayerProperty, LegendInfo, LoadStatus, MapEvent, MapSource,
    Renderer, ScaleRange,
};
pub use projection::{flatten_leaves, project};
pub use resolver::LegendResolver;
pub use state::{LoadState, LoadStateMachine};
