//! Legend entry resolver
//!
//! Resolves one layer's legend infos with:
//! - in-flight de-duplication per (layer, generation) via a shared future
//! - a result cache so re-included layers don't query the renderer again
//! - failure capture as `LayerError` (never cached, so a later trigger retries)
//!
//! `clear()` starts a new cache epoch: resolutions still running for the
//! previous map finish for their waiters but no longer fill the cache.

use crate::adapter::LayerSnapshot;
use crate::cache::{EntryCache, EntryKey};
use crate::error::LayerError;
use crate::ports::{LayerId, LegendInfo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub type Resolution = Result<Vec<LegendInfo>, LayerError>;

type SharedResolution = Shared<BoxFuture<'static, Resolution>>;

pub struct LegendResolver {
    cache: Arc<EntryCache>,
    in_flight: Arc<DashMap<EntryKey, SharedResolution>>,
    fetches: Arc<AtomicUsize>,
    epoch: Arc<AtomicU64>,
}

impl LegendResolver {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(EntryCache::new()),
            in_flight: Arc::new(DashMap::new()),
            fetches: Arc::new(AtomicUsize::new(0)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Resolve `snapshot`'s entries for the given renderer generation
    pub async fn resolve(&self, snapshot: &LayerSnapshot, generation: u64) -> Resolution {
        let key = EntryKey::new(snapshot.id(), generation);
        if let Some(hit) = self.cache.load(&key) {
            debug!("Layer {}: legend cache hit (generation {})", key.layer, generation);
            return Ok(hit);
        }
        self.join_or_start(key, snapshot.clone()).await
    }

    /// Cached entries, without starting any work
    pub fn cached(&self, layer: &LayerId, generation: u64) -> Option<Vec<LegendInfo>> {
        self.cache.load(&EntryKey::new(layer.clone(), generation))
    }

    pub fn invalidate(&self, layer: &LayerId) {
        self.cache.invalidate(layer);
    }

    /// Drop cached results, keeping in-flight work
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Forget everything (map reassigned)
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
        self.in_flight.clear();
    }

    /// How many times a layer was actually asked for its legend
    pub fn provider_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn join_or_start(&self, key: EntryKey, snapshot: LayerSnapshot) -> SharedResolution {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    "Layer {}: joining in-flight resolution (generation {})",
                    key.layer, key.generation
                );
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let cache = self.cache.clone();
                let in_flight = self.in_flight.clone();
                let fetches = self.fetches.clone();
                let epoch = self.epoch.clone();
                let started_in = epoch.load(Ordering::SeqCst);

                let fut = async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    let result = snapshot.fetch_legend_entries().await;
                    if epoch.load(Ordering::SeqCst) != started_in {
                        debug!("Layer {}: resolution outlived its map, not cached", key.layer);
                        return result;
                    }
                    if let Ok(infos) = &result {
                        cache.store(key.clone(), infos.clone());
                    }
                    in_flight.remove(&key);
                    result
                }
                .boxed()
                .shared();

                slot.insert(fut.clone());
                fut
            }
        }
    }
}

impl Default for LegendResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{MemoryLayer, StaticRenderer};
    use crate::model::SymbolRef;
    use std::time::Duration;

    fn slow_layer(id: &str) -> (LayerSnapshot, Arc<StaticRenderer>) {
        let renderer = Arc::new(
            StaticRenderer::new(vec![LegendInfo::new("Item", SymbolRef::new(0u8))])
                .with_delay(Duration::from_millis(50)),
        );
        let layer = MemoryLayer::new(id, id).with_shared_renderer(renderer.clone());
        (LayerSnapshot::new(Arc::new(layer)), renderer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_deduplicated() {
        let resolver = LegendResolver::new();
        let (snapshot, renderer) = slow_layer("roads");

        let (a, b) = tokio::join!(resolver.resolve(&snapshot, 0), resolver.resolve(&snapshot, 0));

        tokio_test::assert_ok!(&a);
        assert_eq!(a, b);
        assert_eq!(renderer.calls(), 1);
        assert_eq!(resolver.provider_calls(), 1);
        assert!(resolver.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_results_of_running_resolutions() {
        let resolver = Arc::new(LegendResolver::new());
        let (snapshot, renderer) = slow_layer("roads");

        let running = {
            let resolver = resolver.clone();
            let snapshot = snapshot.clone();
            tokio::spawn(async move { resolver.resolve(&snapshot, 0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        resolver.clear();

        // The waiter still gets its result
        tokio_test::assert_ok!(running.await.unwrap());
        assert_eq!(renderer.calls(), 1);
        assert!(resolver.cached(&snapshot.id(), 0).is_none());
        assert!(resolver.cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_cached() {
        let resolver = LegendResolver::new();
        let (snapshot, renderer) = slow_layer("roads");

        resolver.resolve(&snapshot, 0).await.unwrap();
        resolver.resolve(&snapshot, 0).await.unwrap();

        assert_eq!(renderer.calls(), 1);
        assert!(resolver.cached(&snapshot.id(), 0).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_generation_queries_again() {
        let resolver = LegendResolver::new();
        let (snapshot, renderer) = slow_layer("roads");

        resolver.resolve(&snapshot, 0).await.unwrap();
        resolver.resolve(&snapshot, 1).await.unwrap();

        assert_eq!(renderer.calls(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let resolver = LegendResolver::new();
        let renderer = Arc::new(StaticRenderer::failing("boom"));
        let layer = MemoryLayer::new("bad", "Bad").with_shared_renderer(renderer.clone());
        let snapshot = LayerSnapshot::new(Arc::new(layer));

        assert!(resolver.resolve(&snapshot, 0).await.is_err());
        assert!(resolver.resolve(&snapshot, 0).await.is_err());

        assert_eq!(renderer.calls(), 2);
        assert!(resolver.cached(&snapshot.id(), 0).is_none());
    }

    #[tokio::test]
    async fn test_no_renderer_resolves_empty() {
        let resolver = LegendResolver::new();
        let snapshot = LayerSnapshot::new(Arc::new(MemoryLayer::new("basemap", "Basemap")));

        let infos = resolver.resolve(&snapshot, 0).await.unwrap();
        assert!(infos.is_empty());
    }
}
