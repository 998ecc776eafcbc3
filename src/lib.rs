//! TinyAI weight loading.
//!
//! Facade over the loader crates:
//!
//! - [`format`]: the TMAI container (parsing and a builder for writing).
//! - [`mmap`]: [`MappedModel`], a read-only mapping with a bounded cache of
//!   per-layer copies and background prefetch workers.
//! - [`progressive`]: [`ProgressiveLoader`], budgeted loading with layer
//!   dependencies and usage-driven prefetch.
//! - [`common`]: configuration and the shared error type.
//!
//! ```no_run
//! use tinyai::{ProgressiveConfig, ProgressiveLoader};
//!
//! let config = ProgressiveConfig { max_memory_budget: 64 << 20, ..Default::default() };
//! let loader = ProgressiveLoader::open("model.tmai", config)?;
//! for layer in 0..loader.layer_count() {
//!     let weights = loader.request(layer)?;
//!     println!("layer {layer}: {} bytes", weights.len());
//! }
//! # Ok::<(), tinyai::TinyAiError>(())
//! ```

pub use tinyai_common as common;
pub use tinyai_format as format;
pub use tinyai_mmap as mmap;
pub use tinyai_progressive as progressive;

pub use tinyai_common::{
    ErrorKind, MmapConfig, PriorityStrategy, ProgressiveConfig, Result, TinyAiConfig, TinyAiError,
};
pub use tinyai_format::{Precision, TmaiBuilder};
pub use tinyai_mmap::{LayerWeights, MappedModel, WeightStore};
pub use tinyai_progressive::{LayerState, MemoryStats, ProgressiveLoader, UsagePattern};
