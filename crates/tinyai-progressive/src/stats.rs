//! Memory and per-layer statistics snapshots.

use std::time::Duration;

use serde::Serialize;

use crate::state::LayerState;

/// Snapshot of one layer's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStats {
    pub index: usize,
    pub state: LayerState,
    pub size: usize,
    pub access_count: u64,
    /// Loader tick of the most recent request; zero if never requested.
    pub last_access: u64,
    pub load_count: u64,
    /// Running mean of store fetch latency.
    pub avg_load_time: Duration,
    pub custom_priority: f32,
    pub dependencies: Vec<usize>,
    pub dependents: Vec<usize>,
}

/// Snapshot returned by [`crate::ProgressiveLoader::memory_stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    /// Bytes of layers in the Loaded state.
    pub current: usize,
    pub peak: usize,
    pub budget: usize,
    /// Bytes set aside for loads in flight.
    pub reserved: usize,
    pub total_model_size: usize,
    pub loaded_layers: usize,
    pub access_counter: u64,
    pub evictions: u64,
    pub prefetches_issued: u64,
    /// Hints the store could not act on.
    pub prefetch_failures: u64,
    pub load_failures: u64,
    pub layers: Vec<LayerStats>,
}

impl MemoryStats {
    /// Fraction of the budget in use.
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.budget == 0 { 0.0 } else { self.current as f64 / self.budget as f64 }
    }
}
