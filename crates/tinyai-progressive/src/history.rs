//! Access history ring and usage-pattern classifier.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Accesses required before the classifier commits to a pattern.
pub const MIN_CLASSIFY_ACCESSES: u64 = 10;

const SEQUENTIAL_RATIO: f32 = 0.6;
const REPEATED_RATIO: f32 = 0.4;

/// Fixed-capacity ring of recently requested layer indices.
#[derive(Debug, Clone)]
pub struct AccessHistory {
    buf: Vec<usize>,
    head: usize,
    len: usize,
}

impl AccessHistory {
    pub fn new(capacity: usize) -> Self {
        Self { buf: vec![0; capacity], head: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, layer: usize) {
        if self.buf.is_empty() {
            return;
        }
        self.buf[self.head] = layer;
        self.head = (self.head + 1) % self.buf.len();
        self.len = (self.len + 1).min(self.buf.len());
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let cap = self.buf.len();
        let start = (self.head + cap - self.len) % cap.max(1);
        (0..self.len).map(move |k| self.buf[(start + k) % cap])
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// Coarse shape of recent layer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsagePattern {
    /// Not enough history, or tracking is off.
    Unknown,
    /// Mostly `i` followed by `i + 1`.
    Sequential,
    /// A small working set revisited often.
    Repeated,
    Random,
}

/// Classifier verdict with the ratio that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageAnalysis {
    pub pattern: UsagePattern,
    /// In `[0, 1]`; zero for [`UsagePattern::Unknown`].
    pub confidence: f32,
}

impl UsageAnalysis {
    pub const UNKNOWN: Self = Self { pattern: UsagePattern::Unknown, confidence: 0.0 };
}

/// Classify the history window.
///
/// With `h` valid entries, `seq` counts adjacent pairs where the later index
/// is the earlier plus one and `rep` counts entries that already appeared
/// earlier in the window. Sequential wins above `seq / h > 0.6`, then
/// Repeated above `rep / h > 0.4`.
#[allow(clippy::cast_precision_loss)]
pub fn classify(history: &AccessHistory, access_counter: u64) -> UsageAnalysis {
    let h = history.len();
    if access_counter < MIN_CLASSIFY_ACCESSES || h == 0 {
        return UsageAnalysis::UNKNOWN;
    }

    let mut seq = 0usize;
    let mut rep = 0usize;
    let mut seen = HashSet::with_capacity(h);
    let mut prev: Option<usize> = None;
    for layer in history.iter() {
        if prev.is_some_and(|p| layer == p + 1) {
            seq += 1;
        }
        if !seen.insert(layer) {
            rep += 1;
        }
        prev = Some(layer);
    }

    let seq_ratio = seq as f32 / h as f32;
    let rep_ratio = rep as f32 / h as f32;
    if seq_ratio > SEQUENTIAL_RATIO {
        UsageAnalysis { pattern: UsagePattern::Sequential, confidence: seq_ratio }
    } else if rep_ratio > REPEATED_RATIO {
        UsageAnalysis { pattern: UsagePattern::Repeated, confidence: rep_ratio }
    } else {
        UsageAnalysis { pattern: UsagePattern::Random, confidence: 1.0 - seq_ratio.max(rep_ratio) }
    }
}
