//! Bounded layer cache: entries, scoring and eviction planning.
//!
//! Everything here runs under the store mutex. The cache never decides on
//! its own when to load; it only answers "which entries go if `n` more
//! bytes must fit" and applies the answer.

use std::sync::Arc;

use crate::weights::AlignedBuf;

/// Default user priority of every layer.
pub const DEFAULT_PRIORITY: f32 = 1.0;

/// Priority added when an evicted layer is requested again.
pub const READMIT_BOOST: f32 = 0.25;

/// Re-admission boosts stop at this priority.
pub const MAX_ADAPTIVE_PRIORITY: f32 = 2.0;

// ── Statistics ────────────────────────────────────────────────────────────

/// Runtime counters for a [`crate::MappedModel`] cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `get_weights` calls served from the cache.
    pub hits: u64,
    /// `get_weights` calls that had to copy from the mapping.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries inserted by prefetch paths.
    pub prefetched: u64,
    /// Background fills skipped for lack of free space.
    pub prefetch_skips: u64,
    pub cached_layers: usize,
    pub cached_bytes: usize,
}

impl CacheStats {
    /// Hit rate as a fraction in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        #[allow(clippy::cast_precision_loss)]
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

// ── Scoring ───────────────────────────────────────────────────────────────

/// Eviction score; the lowest score is evicted first.
///
/// `0.6 * priority + 0.3 * recency + 0.1 * frequency`, where recency decays
/// by half after one second idle and frequency saturates at 100 accesses.
#[allow(clippy::cast_precision_loss)]
pub fn eviction_score(priority: f32, last_accessed: u64, access_count: u64, now: u64) -> f64 {
    let idle = now.saturating_sub(last_accessed) as f64;
    let recency = 1.0 / (1.0 + idle / 1000.0);
    let frequency = (access_count as f64 / 100.0).min(1.0);
    0.6 * f64::from(priority) + 0.3 * recency + 0.1 * frequency
}

// ── Entries ───────────────────────────────────────────────────────────────

pub(crate) struct CacheEntry {
    pub(crate) buf: Arc<AlignedBuf>,
    /// Bytes counted against the cache cap.
    pub(crate) charged: usize,
    pub(crate) last_accessed: u64,
    pub(crate) access_count: u64,
}

impl CacheEntry {
    /// A live `LayerWeights` holds a second reference.
    pub(crate) fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.buf) > 1
    }
}

/// Result of planning room for a new entry.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Plan {
    Fits,
    Evict(Vec<usize>),
    Impossible { reclaimable: usize },
}

pub(crate) struct CacheState {
    entries: Vec<Option<CacheEntry>>,
    priorities: Vec<f32>,
    /// Set when an entry was dropped to make room, cleared on re-admission.
    evicted: Vec<bool>,
    used: usize,
    capacity: usize,
    pub(crate) stats: CacheStats,
}

impl CacheState {
    pub(crate) fn new(layer_count: usize, capacity: usize) -> Self {
        Self {
            entries: (0..layer_count).map(|_| None).collect(),
            priorities: vec![DEFAULT_PRIORITY; layer_count],
            evicted: vec![false; layer_count],
            used: 0,
            capacity,
            stats: CacheStats::default(),
        }
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&CacheEntry> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut CacheEntry> {
        self.entries.get_mut(index).and_then(Option::as_mut)
    }

    pub(crate) fn priority(&self, index: usize) -> Option<f32> {
        self.priorities.get(index).copied()
    }

    pub(crate) fn set_priority(&mut self, index: usize, priority: f32) {
        self.priorities[index] = priority;
    }

    pub(crate) fn reset_priorities(&mut self) {
        self.priorities.fill(DEFAULT_PRIORITY);
        self.evicted.fill(false);
    }

    /// Raise the priority of a layer that is wanted again after eviction.
    /// Returns the new priority, or `None` if `index` was not evicted.
    pub(crate) fn readmit(&mut self, index: usize) -> Option<f32> {
        if !std::mem::take(self.evicted.get_mut(index)?) {
            return None;
        }
        let priority = &mut self.priorities[index];
        if *priority < MAX_ADAPTIVE_PRIORITY {
            *priority = (*priority + READMIT_BOOST).min(MAX_ADAPTIVE_PRIORITY);
        }
        Some(*priority)
    }

    pub(crate) fn cached_indices(&self) -> Vec<usize> {
        self.entries.iter().enumerate().filter(|(_, e)| e.is_some()).map(|(i, _)| i).collect()
    }

    pub(crate) fn insert(&mut self, index: usize, entry: CacheEntry) {
        self.used += entry.charged;
        if let Some(old) = self.entries[index].replace(entry) {
            self.used -= old.charged;
        }
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(index)?.take()?;
        self.used -= entry.charged;
        Some(entry)
    }

    /// Drop `index` to make room for another entry.
    pub(crate) fn evict(&mut self, index: usize) -> Option<CacheEntry> {
        let entry = self.remove(index)?;
        self.evicted[index] = true;
        self.stats.evictions += 1;
        Some(entry)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.used = 0;
    }

    /// Choose the entries to drop so that `needed` more bytes fit.
    ///
    /// Pinned entries are never chosen. Candidates go in ascending
    /// [`eviction_score`] order, ties to the lowest index.
    pub(crate) fn plan(&self, needed: usize, now: u64) -> Plan {
        if needed <= self.free() {
            return Plan::Fits;
        }

        let mut candidates: Vec<(usize, f64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
            .filter(|(_, e)| !e.is_pinned())
            .map(|(i, e)| {
                let score =
                    eviction_score(self.priorities[i], e.last_accessed, e.access_count, now);
                (i, score, e.charged)
            })
            .collect();
        let reclaimable: usize = candidates.iter().map(|c| c.2).sum();
        if needed > self.capacity || needed > self.free() + reclaimable {
            return Plan::Impossible { reclaimable };
        }

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut free = self.free();
        let mut victims = Vec::new();
        for (index, _, charged) in candidates {
            if free >= needed {
                break;
            }
            free += charged;
            victims.push(index);
        }
        Plan::Evict(victims)
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            cached_layers: self.entries.iter().filter(|e| e.is_some()).count(),
            cached_bytes: self.used,
            ..self.stats.clone()
        }
    }
}
