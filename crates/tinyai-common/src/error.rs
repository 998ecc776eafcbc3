//! Error types for model mapping and progressive loading.

use std::path::PathBuf;

use thiserror::Error;

/// Broad classification of a [`TinyAiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse (bad index, illegal edge). Never worth retrying.
    Programmer,
    /// Cache or budget pressure. State is intact; release something and retry.
    ResourcePressure,
    /// File system, mapping or on-disk format failure.
    Io,
}

/// Errors produced by the TinyAI loader crates.
#[derive(Debug, Error)]
pub enum TinyAiError {
    #[error("model file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid model format: {0}")]
    InvalidFormat(String),

    #[error("too many layers: {count} (max {max})")]
    TooManyLayers { count: usize, max: usize },

    #[error("failed to map {}: {source}", path.display())]
    MapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("layer index {index} out of range (layer count {count})")]
    OutOfRange { index: usize, count: usize },

    #[error(
        "cannot cache layer {index}: needs {required} bytes, {available} reclaimable of {capacity}"
    )]
    OutOfCacheBudget { index: usize, required: usize, available: usize, capacity: usize },

    #[error("memory budget exhausted: need {required} bytes, budget is {budget}")]
    BudgetExhausted { required: usize, budget: usize },

    #[error("layer {layer}: dependency {dependency} failed to load: {source}")]
    DependencyFailed {
        layer: usize,
        dependency: usize,
        #[source]
        source: Box<TinyAiError>,
    },

    #[error("edge {dependent} -> {dependency} would create a dependency cycle")]
    Cycle { dependent: usize, dependency: usize },

    #[error("layer {0} cannot depend on itself")]
    SelfDependency(usize),

    #[error("layer {dependent} already depends on layer {dependency}")]
    DuplicateDependency { dependent: usize, dependency: usize },

    #[error("layer {dependent} is loaded but its new dependency {dependency} is not")]
    DependencyNotLoaded { dependent: usize, dependency: usize },

    #[error("layer {layer} cannot be unloaded while dependent layer {dependent} is loaded")]
    DependentsLoaded { layer: usize, dependent: usize },

    #[error("dependency tracking is disabled")]
    DependencyTrackingDisabled,

    #[error("background prefetching is disabled")]
    PrefetchDisabled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TinyAiError {
    /// Classify the error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfCacheBudget { .. } | Self::BudgetExhausted { .. } => {
                ErrorKind::ResourcePressure
            }
            Self::DependencyFailed { source, .. } => source.kind(),
            Self::NotFound { .. }
            | Self::Io(_)
            | Self::InvalidFormat(_)
            | Self::TooManyLayers { .. }
            | Self::MapFailed { .. } => ErrorKind::Io,
            Self::OutOfRange { .. }
            | Self::Cycle { .. }
            | Self::SelfDependency(_)
            | Self::DuplicateDependency { .. }
            | Self::DependencyNotLoaded { .. }
            | Self::DependentsLoaded { .. }
            | Self::DependencyTrackingDisabled
            | Self::PrefetchDisabled
            | Self::InvalidConfig(_) => ErrorKind::Programmer,
        }
    }

    /// `true` when releasing layers and retrying may succeed.
    pub fn is_resource_pressure(&self) -> bool {
        self.kind() == ErrorKind::ResourcePressure
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, TinyAiError>;
