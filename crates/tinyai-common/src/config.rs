//! Configuration types for the mapped model store and the progressive loader

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TinyAiError};

/// Combined loader configuration, as read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TinyAiConfig {
    pub mmap: MmapConfig,
    pub progressive: ProgressiveConfig,
}

impl TinyAiConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TinyAiError::InvalidConfig(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.mmap.validate()?;
        self.progressive.validate()
    }
}

/// Mapped model store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmapConfig {
    /// Hard cap on the bytes held by cached layer buffers.
    pub max_cache_size: usize,
    /// Start background prefetch workers.
    pub prefetch_enabled: bool,
    /// Number of background prefetch workers.
    pub prefetch_threads: usize,
    /// Raise the priority of a layer each time it is requested again after
    /// being evicted. Eviction order always uses the combined score.
    pub adaptive_caching: bool,
    /// Smallest size a cached layer is charged against the cache cap.
    pub min_layer_cache_size: usize,
    /// Start address alignment of every cached buffer.
    pub buffer_alignment: usize,
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 256 * 1024 * 1024,
            prefetch_enabled: true,
            prefetch_threads: 1,
            adaptive_caching: true,
            min_layer_cache_size: 4096,
            buffer_alignment: 64,
        }
    }
}

impl MmapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size == 0 {
            return Err(TinyAiError::InvalidConfig("max_cache_size must be non-zero".into()));
        }
        if self.prefetch_enabled && self.prefetch_threads == 0 {
            return Err(TinyAiError::InvalidConfig(
                "prefetch_threads must be at least 1 when prefetching is enabled".into(),
            ));
        }
        if !self.buffer_alignment.is_power_of_two() {
            return Err(TinyAiError::InvalidConfig(format!(
                "buffer_alignment {} is not a power of two",
                self.buffer_alignment
            )));
        }
        Ok(())
    }

    /// Size a layer of `size` bytes is charged against the cache cap.
    pub fn charged_size(&self, size: usize) -> usize {
        size.max(self.min_layer_cache_size)
    }
}

/// Victim selection policy used when the memory budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityStrategy {
    /// Evict the layer accessed longest ago.
    #[default]
    Lru,
    /// Evict the layer with the fewest accesses. The historical name is
    /// "most frequently used"; it keeps the most frequently used layers.
    Mfu,
    /// Evict the layer with the lowest user or optimizer priority.
    Custom,
    /// Evict the lowest-indexed loaded layer.
    Fifo,
}

/// Progressive loader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressiveConfig {
    /// Ceiling on the bytes of layers in the Loaded state.
    pub max_memory_budget: usize,
    /// Allow the loader to evict Loaded layers to stay inside the budget.
    pub enable_layer_unloading: bool,
    pub priority_strategy: PriorityStrategy,
    /// Minimum classifier confidence before a predicted prefetch is issued.
    pub prefetch_threshold: f32,
    /// Most layers handed to the store for prefetch per access.
    pub max_prefetch_layers: usize,
    /// Maintain the access history and the dependency graph.
    pub enable_dependency_tracking: bool,
    /// Forwarded to the store as its buffer alignment when the loader opens it.
    pub cache_alignment: usize,
    /// Length of the access history ring.
    pub history_size: usize,
}

impl Default for ProgressiveConfig {
    fn default() -> Self {
        Self {
            max_memory_budget: 1024 * 1024 * 1024,
            enable_layer_unloading: true,
            priority_strategy: PriorityStrategy::Lru,
            prefetch_threshold: 0.7,
            max_prefetch_layers: 2,
            enable_dependency_tracking: true,
            cache_alignment: 64,
            history_size: 100,
        }
    }
}

impl ProgressiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_budget == 0 {
            return Err(TinyAiError::InvalidConfig("max_memory_budget must be non-zero".into()));
        }
        if !self.prefetch_threshold.is_finite() {
            return Err(TinyAiError::InvalidConfig("prefetch_threshold must be finite".into()));
        }
        if !self.cache_alignment.is_power_of_two() {
            return Err(TinyAiError::InvalidConfig(format!(
                "cache_alignment {} is not a power of two",
                self.cache_alignment
            )));
        }
        if self.enable_dependency_tracking && self.history_size < 2 {
            return Err(TinyAiError::InvalidConfig(
                "history_size must be at least 2 with dependency tracking".into(),
            ));
        }
        Ok(())
    }
}
