//! Memory-mapped model store.
//!
//! [`MappedModel`] maps a TMAI file read-only, serves per-layer weight
//! copies from a bounded cache, and optionally runs background workers that
//! fill spare cache space ahead of use. When the cache is full the entry
//! with the lowest [`eviction_score`] that nobody currently holds is
//! dropped.
//!
//! ```no_run
//! use tinyai_common::MmapConfig;
//! use tinyai_mmap::MappedModel;
//!
//! let model = MappedModel::open("model.tmai", MmapConfig::default()).unwrap();
//! let weights = model.get_weights(0).unwrap();
//! println!("layer 0: {} bytes", weights.len());
//! ```

mod cache;
mod clock;
mod model;
mod prefetch;
mod weights;

pub use cache::{CacheStats, DEFAULT_PRIORITY, eviction_score};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use model::MappedModel;
pub use prefetch::SWEEP_INTERVAL;
pub use weights::LayerWeights;

use tinyai_common::Result;
use tinyai_format::LayerDescriptor;

/// A source of per-layer weights with its own cache.
///
/// [`MappedModel`] is the production implementation; the progressive
/// loader is generic over this trait.
pub trait WeightStore: Send + Sync {
    fn layer_count(&self) -> usize;

    fn describe(&self, index: usize) -> Option<&LayerDescriptor>;

    /// Cached or freshly materialised weights; counts as an access.
    fn get_weights(&self, index: usize) -> Result<LayerWeights>;

    /// Cache without counting an access. `false` if it could not be cached.
    fn prefetch(&self, index: usize) -> bool;

    /// Queue a prefetch for a background worker without blocking.
    fn schedule_prefetch(&self, index: usize) -> Result<()>;

    /// Drop the cached copy. Returns whether one existed.
    fn release(&self, index: usize) -> bool;

    fn is_cached(&self, index: usize) -> bool;

    fn set_priority(&self, index: usize, priority: f32) -> Result<()>;

    /// Bytes charged against the cache cap.
    fn memory_usage(&self) -> usize;
}
