//! Configuration I/O (YAML schema)
//!
//! Loading and saving live on `LegendConfig`; this module only defines the
//! on-disk shape.

use super::{LayerItemsMode, Templates};
use serde::{Deserialize, Serialize};

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegendConfigV1 {
    /// Schema version (always 1 for v1)
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<LayerItemsMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_only_visible_layers: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_layers_order: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Templates>,
}
