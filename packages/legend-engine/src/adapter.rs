use crate::error::LayerError;
use crate::ports::{Layer, LayerId, LayerKind, LegendInfo, LoadStatus, ScaleRange};
use std::fmt;
use std::sync::Arc;

/// Read-only view of one external layer
///
/// Never mutates the wrapped layer.
#[derive(Clone)]
pub struct LayerSnapshot {
    layer: Arc<dyn Layer>,
}

impl LayerSnapshot {
    pub fn new(layer: Arc<dyn Layer>) -> Self {
        Self { layer }
    }

    pub fn layer(&self) -> &Arc<dyn Layer> {
        &self.layer
    }

    pub fn id(&self) -> LayerId {
        self.layer.id()
    }

    pub fn label(&self) -> String {
        self.layer.label()
    }

    pub fn kind(&self) -> LayerKind {
        self.layer.kind()
    }

    pub fn is_visible(&self) -> bool {
        self.layer.is_visible()
    }

    pub fn scale_range(&self) -> ScaleRange {
        self.layer.scale_range()
    }

    pub fn is_in_scale_range(&self, scale: Option<f64>) -> bool {
        self.layer.scale_range().contains(scale)
    }

    pub fn load_status(&self) -> LoadStatus {
        self.layer.load_status()
    }

    /// Ordered sub-layers, empty for leaf layers
    pub fn children(&self) -> Vec<LayerSnapshot> {
        self.layer
            .sub_layers()
            .into_iter()
            .map(LayerSnapshot::new)
            .collect()
    }

    /// Fetch the layer's legend infos.
    ///
    /// Waits for the layer to load first. A layer without a renderer has no
    /// symbology and yields an empty list.
    pub async fn fetch_legend_entries(&self) -> Result<Vec<LegendInfo>, LayerError> {
        let id = self.id();

        self.layer
            .wait_loaded()
            .await
            .map_err(|e| LayerError::load_failed(id.clone(), e))?;

        let Some(renderer) = self.layer.renderer() else {
            return Ok(Vec::new());
        };

        renderer
            .legend_infos()
            .await
            .map_err(|e| LayerError::resolve(id, e))
    }
}

impl fmt::Debug for LayerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerSnapshot")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
