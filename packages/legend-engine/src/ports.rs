//! Ports - collaborator contracts consumed by the legend engine
//!
//! The map/layer object model and the symbology library live outside this
//! crate. The engine only talks to them through these traits.

use crate::model::SymbolRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Stable identity of an external layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Ordinary layer with its own renderer
    #[default]
    Layer,
    /// Group layer: children only, no renderer
    Group,
    /// Map-level layer (e.g. a map service): may own sub-layers and entries
    Map,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Layer => "layer",
            LayerKind::Group => "group",
            LayerKind::Map => "map",
        }
    }

    /// Does this kind own symbology that has to be resolved?
    pub fn has_symbology(&self) -> bool {
        !matches!(self, LayerKind::Group)
    }
}

/// Scale range as map-scale denominators, `0.0` meaning "no limit"
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScaleRange {
    /// Smallest scale (largest denominator) the layer is drawn at
    #[serde(default)]
    pub min_scale: f64,
    /// Largest scale (smallest denominator) the layer is drawn at
    #[serde(default)]
    pub max_scale: f64,
}

impl ScaleRange {
    pub const UNBOUNDED: ScaleRange = ScaleRange {
        min_scale: 0.0,
        max_scale: 0.0,
    };

    pub fn new(min_scale: f64, max_scale: f64) -> Self {
        Self {
            min_scale,
            max_scale,
        }
    }

    /// Unknown map scale counts as in range
    pub fn contains(&self, scale: Option<f64>) -> bool {
        let Some(scale) = scale else {
            return true;
        };
        (self.min_scale == 0.0 || scale <= self.min_scale)
            && (self.max_scale == 0.0 || scale >= self.max_scale)
    }
}

/// Load status reported by an external layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    NotLoaded,
    Loading,
    Loaded,
    Failed(String),
}

/// One `(label, symbol)` pair produced by the symbology library
#[derive(Debug, Clone)]
pub struct LegendInfo {
    pub label: String,
    pub symbol: SymbolRef,
}

impl LegendInfo {
    pub fn new(label: impl Into<String>, symbol: SymbolRef) -> Self {
        Self {
            label: label.into(),
            symbol,
        }
    }
}

impl PartialEq for LegendInfo {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.symbol.ptr_eq(&other.symbol)
    }
}

/// Renderer / symbology handle
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Ordered legend infos for this renderer
    async fn legend_infos(&self) -> std::result::Result<Vec<LegendInfo>, String>;
}

/// External layer
#[async_trait]
pub trait Layer: Send + Sync {
    fn id(&self) -> LayerId;

    fn label(&self) -> String;

    fn kind(&self) -> LayerKind {
        LayerKind::Layer
    }

    fn is_visible(&self) -> bool;

    fn scale_range(&self) -> ScaleRange {
        ScaleRange::UNBOUNDED
    }

    fn load_status(&self) -> LoadStatus {
        LoadStatus::Loaded
    }

    /// Ordered sub-layers (empty for leaf layers)
    fn sub_layers(&self) -> Vec<Arc<dyn Layer>> {
        Vec::new()
    }

    fn renderer(&self) -> Option<Arc<dyn Renderer>>;

    /// Suspend until the layer has finished loading
    async fn wait_loaded(&self) -> std::result::Result<(), String> {
        match self.load_status() {
            LoadStatus::Failed(reason) => Err(reason),
            _ => Ok(()),
        }
    }
}

/// Layer property that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerProperty {
    Visibility,
    Renderer,
    ScaleRange,
    LoadState,
    Label,
}

/// Change notification emitted by the map
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// Layer collection changed (add/remove/move) under `parent`,
    /// `None` meaning the map's top-level collection
    LayersChanged { parent: Option<LayerId> },
    LayerPropertyChanged {
        layer: LayerId,
        property: LayerProperty,
    },
    /// Map scale changed
    ScaleChanged,
}

/// The map the legend is bound to
pub trait MapSource: Send + Sync {
    /// Ordered top-level layers, bottom-most first
    fn layers(&self) -> Vec<Arc<dyn Layer>>;

    /// Current scale denominator, if known
    fn scale(&self) -> Option<f64> {
        None
    }

    /// Register for change notifications
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<MapEvent>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_range_unbounded() {
        assert!(ScaleRange::UNBOUNDED.contains(Some(1_000_000.0)));
        assert!(ScaleRange::UNBOUNDED.contains(None));
    }

    #[test]
    fn test_scale_range_limits() {
        // Visible between 1:5000 and 1:100000
        let range = ScaleRange::new(100_000.0, 5_000.0);
        assert!(range.contains(Some(50_000.0)));
        assert!(!range.contains(Some(200_000.0)));
        assert!(!range.contains(Some(1_000.0)));
        assert!(range.contains(None));
    }

    #[test]
    fn test_group_has_no_symbology() {
        assert!(!LayerKind::Group.has_symbology());
        assert!(LayerKind::Map.has_symbology());
        assert!(LayerKind::Layer.has_symbology());
    }
}
