//! Legend configuration
//!
//! Presentation settings of a `LegendTree`:
//! - `mode`: Flat (groups elided) or Tree projection
//! - `show_only_visible_layers`: hide layers that are not effectively visible
//! - `reverse_layers_order`: reverse the top-level sequence
//! - `templates`: opaque template names attached to projected items
//!
//! Settings are set programmatically or loaded from a versioned YAML file:
//!
//! ```yaml
//! version: 1
//! mode: tree
//! show_only_visible_layers: false
//! templates:
//!   legend_item: swatch-row
//! ```

pub mod error;
pub mod io;

pub use error::{ConfigError, ConfigResult};
pub use io::LegendConfigV1;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How the tree is exposed through `layer_items_source`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerItemsMode {
    /// Groups elided, leaf layers and map-level entries in tree order
    #[default]
    Flat,
    /// Top-level nodes only; children reached through each node
    Tree,
}

impl LayerItemsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerItemsMode::Flat => "flat",
            LayerItemsMode::Tree => "tree",
        }
    }
}

impl fmt::Display for LayerItemsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerItemsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(LayerItemsMode::Flat),
            "tree" => Ok(LayerItemsMode::Tree),
            _ => Err(format!("Unknown layer items mode: {}", s)),
        }
    }
}

/// Template names per item kind; `None` leaves the choice to the UI shell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Templates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legend_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_layer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegendConfig {
    pub mode: LayerItemsMode,
    pub show_only_visible_layers: bool,
    pub reverse_layers_order: bool,
    pub templates: Templates,
}

impl Default for LegendConfig {
    fn default() -> Self {
        Self {
            mode: LayerItemsMode::Flat,
            show_only_visible_layers: true,
            reverse_layers_order: false,
            templates: Templates::default(),
        }
    }
}

impl LegendConfig {
    pub fn mode(mut self, mode: LayerItemsMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn show_only_visible_layers(mut self, value: bool) -> Self {
        self.show_only_visible_layers = value;
        self
    }

    pub fn reverse_layers_order(mut self, value: bool) -> Self {
        self.reverse_layers_order = value;
        self
    }

    pub fn templates(mut self, templates: Templates) -> Self {
        self.templates = templates;
        self
    }

    /// Reject settings the projection cannot honour
    pub fn validate(&self) -> ConfigResult<()> {
        let named = [
            ("layer", &self.templates.layer),
            ("legend_item", &self.templates.legend_item),
            ("map_layer", &self.templates.map_layer),
        ];
        for (slot, name) in named {
            if matches!(name, Some(n) if n.trim().is_empty()) {
                return Err(ConfigError::Conflict {
                    issue: format!("template '{}' is set to an empty name", slot),
                    fix: format!("remove 'templates.{}' or give it a name", slot),
                });
            }
        }
        Ok(())
    }

    /// Parse a v1 YAML document; absent keys keep their defaults
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        if value.get("version").is_none() {
            return Err(ConfigError::MissingVersion);
        }

        let doc: LegendConfigV1 = serde_yaml::from_value(value)?;
        if !io::SUPPORTED_VERSIONS.contains(&doc.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: doc.version,
                supported: io::SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let defaults = Self::default();
        let config = Self {
            mode: doc.mode.unwrap_or(defaults.mode),
            show_only_visible_layers: doc
                .show_only_visible_layers
                .unwrap_or(defaults.show_only_visible_layers),
            reverse_layers_order: doc
                .reverse_layers_order
                .unwrap_or(defaults.reverse_layers_order),
            templates: doc.templates.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let doc = LegendConfigV1 {
            version: 1,
            mode: Some(self.mode),
            show_only_visible_layers: Some(self.show_only_visible_layers),
            reverse_layers_order: Some(self.reverse_layers_order),
            templates: Some(self.templates.clone()),
        };
        Ok(serde_yaml::to_string(&doc)?)
    }
}
