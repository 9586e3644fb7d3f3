use crate::error::{LegendError, Result};
use serde::{Deserialize, Serialize};

/// Load state of a legend node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

impl LoadState {
    pub fn state_name(&self) -> &'static str {
        match self {
            LoadState::NotLoaded => "not_loaded",
            LoadState::Loading => "loading",
            LoadState::Loaded => "loaded",
            LoadState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state_name())
    }
}

/// Load state machine for transitions
///
/// ```text
/// NotLoaded ─► Loading ─► Loaded
///                 ▲   └─► Failed
///                 └───────┘ (retry / renderer change)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStateMachine {
    state: LoadState,
}

impl LoadStateMachine {
    pub fn new(state: LoadState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Transition: {NotLoaded, Failed, Loaded} → LOADING
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LoadState::NotLoaded | LoadState::Failed | LoadState::Loaded => {
                self.state = LoadState::Loading;
                Ok(())
            }
            LoadState::Loading => Err(self.invalid("loading")),
        }
    }

    /// Transition: LOADING → LOADED
    pub fn complete(&mut self) -> Result<()> {
        match self.state {
            LoadState::Loading => {
                self.state = LoadState::Loaded;
                Ok(())
            }
            _ => Err(self.invalid("loaded")),
        }
    }

    /// Transition: LOADING → FAILED
    pub fn fail(&mut self) -> Result<()> {
        match self.state {
            LoadState::Loading => {
                self.state = LoadState::Failed;
                Ok(())
            }
            _ => Err(self.invalid("failed")),
        }
    }

    /// Cache hit: skip straight to LOADED
    pub fn restore(&mut self) -> Result<()> {
        match self.state {
            LoadState::NotLoaded | LoadState::Loading => {
                self.state = LoadState::Loaded;
                Ok(())
            }
            _ => Err(self.invalid("loaded (restored)")),
        }
    }

    fn invalid(&self, to: &str) -> LegendError {
        LegendError::InvalidStateTransition {
            from: self.state.state_name().to_string(),
            to: to.to_string(),
        }
    }
}
