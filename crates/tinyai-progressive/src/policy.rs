//! Victim and prefetch-candidate selection.

use std::cmp::Reverse;

use tinyai_common::PriorityStrategy;

use crate::history::{UsageAnalysis, UsagePattern};

/// Eviction-relevant view of one Loaded layer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub(crate) index: usize,
    pub(crate) size: usize,
    pub(crate) last_access: u64,
    pub(crate) access_count: u64,
    pub(crate) priority: f32,
}

/// Ordering used to pick the next victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Picker {
    Strategy(PriorityStrategy),
    /// Largest first, ties to the lowest index. Used when shrinking the budget.
    Largest,
}

impl Picker {
    pub(crate) fn pick(self, candidates: &[Candidate]) -> Option<Candidate> {
        let it = candidates.iter().copied();
        match self {
            Self::Strategy(PriorityStrategy::Lru) => it.min_by_key(|c| (c.last_access, c.index)),
            // Among equally cold layers the most recently inserted one goes.
            Self::Strategy(PriorityStrategy::Mfu) => {
                it.min_by_key(|c| (c.access_count, Reverse(c.index)))
            }
            Self::Strategy(PriorityStrategy::Custom) => it.min_by(|a, b| {
                a.priority.total_cmp(&b.priority).then(b.index.cmp(&a.index))
            }),
            Self::Strategy(PriorityStrategy::Fifo) => it.min_by_key(|c| c.index),
            Self::Largest => it.min_by_key(|c| (Reverse(c.size), c.index)),
        }
    }
}

/// Layers worth prefetching after an access to `index`.
///
/// `available(j)` reports whether `j` is Unloaded and `access_counts` is the
/// per-layer request count. A confident Sequential or Repeated verdict is
/// required unless the pattern is still Unknown, which falls back to the
/// next layer.
pub(crate) fn propose_prefetch(
    analysis: UsageAnalysis,
    threshold: f32,
    index: usize,
    max_layers: usize,
    access_counts: &[u64],
    available: impl Fn(usize) -> bool,
) -> Vec<usize> {
    let layer_count = access_counts.len();
    if max_layers == 0 {
        return Vec::new();
    }
    match analysis.pattern {
        UsagePattern::Unknown => {
            (index + 1..layer_count).take(1).filter(|&j| available(j)).collect()
        }
        UsagePattern::Random => Vec::new(),
        _ if analysis.confidence < threshold => Vec::new(),
        UsagePattern::Sequential => {
            (index + 1..layer_count).take(max_layers).filter(|&j| available(j)).collect()
        }
        UsagePattern::Repeated => {
            let mut hot: Vec<usize> = (0..layer_count)
                .filter(|&j| j != index && access_counts[j] > 0 && available(j))
                .collect();
            hot.sort_by_key(|&j| (Reverse(access_counts[j]), j));
            hot.truncate(max_layers);
            hot
        }
    }
}
