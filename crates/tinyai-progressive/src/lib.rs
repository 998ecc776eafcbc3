//! Progressive layer loading on top of a [`WeightStore`].
//!
//! A [`ProgressiveLoader`] keeps the bytes of Loaded layers under a memory
//! budget. Requesting a layer first loads whatever it depends on, evicting
//! other layers per the configured [`PriorityStrategy`] when the budget is
//! tight. Recent requests are classified into a [`UsagePattern`] that
//! drives which layers are handed to the store as prefetch hints.
//!
//! ```no_run
//! use tinyai_common::ProgressiveConfig;
//! use tinyai_progressive::ProgressiveLoader;
//!
//! let loader = ProgressiveLoader::open("model.tmai", ProgressiveConfig::default()).unwrap();
//! loader.add_dependency(1, 0).unwrap();
//! let weights = loader.request(1).unwrap();
//! assert!(loader.is_loaded(0));
//! println!("layer 1: {} bytes", weights.len());
//! ```
//!
//! [`WeightStore`]: tinyai_mmap::WeightStore
//! [`PriorityStrategy`]: tinyai_common::PriorityStrategy

mod graph;
mod history;
mod loader;
mod policy;
mod state;
mod stats;

pub use graph::DependencyGraph;
pub use history::{AccessHistory, MIN_CLASSIFY_ACCESSES, UsageAnalysis, UsagePattern, classify};
pub use loader::ProgressiveLoader;
pub use state::LayerState;
pub use stats::{LayerStats, MemoryStats};
