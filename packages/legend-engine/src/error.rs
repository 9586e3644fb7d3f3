use crate::config::ConfigError;
use crate::ports::LayerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LegendError>;

/// Per-layer failure.
///
/// Captured on the owning `LayerNode` and reported through exactly one
/// `RefreshedEvent`; never propagated out of a build pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("Layer {layer} failed to load: {reason}")]
    LayerLoadFailed { layer: LayerId, reason: String },

    #[error("Legend resolution failed for layer {layer}: {reason}")]
    Resolve { layer: LayerId, reason: String },
}

impl LayerError {
    pub fn load_failed<E: std::fmt::Display>(layer: LayerId, e: E) -> Self {
        Self::LayerLoadFailed {
            layer,
            reason: e.to_string(),
        }
    }

    pub fn resolve<E: std::fmt::Display>(layer: LayerId, e: E) -> Self {
        Self::Resolve {
            layer,
            reason: e.to_string(),
        }
    }

    /// Layer the failure originated from
    pub fn layer_id(&self) -> &LayerId {
        match self {
            LayerError::LayerLoadFailed { layer, .. } => layer,
            LayerError::Resolve { layer, .. } => layer,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            // The layer may load on a later attempt (e.g. network back up)
            LayerError::LayerLoadFailed { .. } => ErrorCategory::Transient,
            LayerError::Resolve { .. } => ErrorCategory::Permanent,
        }
    }
}

#[derive(Error, Debug)]
pub enum LegendError {
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Reserved for invalid mode/filter combinations
    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No map bound to the legend")]
    NoMap,
}

/// Error category
///
/// A load-state change of the layer retries only `Transient` failures.
/// Both kinds are retried on a renderer change, when the layer becomes
/// visible again, and on `refresh()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - the layer may load on a later attempt
    Transient,
    /// Permanent error - the renderer rejected the request
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
