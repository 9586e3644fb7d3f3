use crate::ports::{LayerId, LegendInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache key: layer + renderer generation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub layer: LayerId,
    pub generation: u64,
}

impl EntryKey {
    pub fn new(layer: LayerId, generation: u64) -> Self {
        Self { layer, generation }
    }
}

/// Resolved legend infos, kept across filtering so re-included layers don't
/// hit the symbology library again. Failures are never stored.
pub struct EntryCache {
    entries: Arc<Mutex<HashMap<EntryKey, Vec<LegendInfo>>>>,
}

impl EntryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Save entries; older generations of the same layer are dropped
    pub fn store(&self, key: EntryKey, infos: Vec<LegendInfo>) {
        let mut entries = self.entries.lock();
        entries.retain(|k, _| !(k.layer == key.layer && k.generation < key.generation));
        entries.insert(key, infos);
    }

    pub fn load(&self, key: &EntryKey) -> Option<Vec<LegendInfo>> {
        self.entries.lock().get(key).cloned()
    }

    /// Drop every generation of one layer
    pub fn invalidate(&self, layer: &LayerId) {
        self.entries.lock().retain(|k, _| &k.layer != layer);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new()
    }
}
