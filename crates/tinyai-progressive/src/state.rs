//! Per-layer load state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one layer inside a progressive loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LayerState {
    /// Not counted against the budget. Initial and final state.
    #[default]
    Unloaded,
    /// Budget reserved, store fetch in progress.
    Loading,
    /// Resident and counted against the budget.
    Loaded,
    /// Being released from the store.
    Unloading,
    /// Being handed to the store as a prefetch hint. Ends when the hint is
    /// accepted or refused, not when the store has filled its cache.
    Prefetching,
}

impl LayerState {
    /// Other callers must wait for the layer to leave this state.
    pub const fn is_transitional(self) -> bool {
        matches!(self, Self::Loading | Self::Unloading | Self::Prefetching)
    }

    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unloaded, Self::Loading)
                | (Self::Loading, Self::Loaded)
                | (Self::Loading, Self::Unloaded)
                | (Self::Loaded, Self::Unloading)
                | (Self::Unloading, Self::Unloaded)
                | (Self::Unloaded, Self::Prefetching)
                | (Self::Prefetching, Self::Unloaded)
        )
    }
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::Prefetching => "prefetching",
        };
        f.write_str(s)
    }
}
