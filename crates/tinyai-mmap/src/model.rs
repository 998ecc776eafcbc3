//! The mapped model store.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use memmap2::Mmap;
use tinyai_common::{MmapConfig, Result, TinyAiError};
use tinyai_format::{LayerDescriptor, ModelLayout, parse_layout};
use tracing::{debug, info, trace};

use crate::cache::{CacheEntry, CacheState, CacheStats, Plan};
use crate::clock::{Clock, MonotonicClock};
use crate::prefetch::PrefetchWorkers;
use crate::weights::{AlignedBuf, LayerWeights};
use crate::WeightStore;

/// How a fill may treat existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    /// Caller-requested prefetch: may evict unpinned entries.
    Evicting,
    /// Background sweep: only uses free space.
    FreeSpaceOnly,
}

/// State shared between the store handle and its prefetch workers.
pub(crate) struct Shared {
    path: PathBuf,
    mmap: Mmap,
    layout: ModelLayout,
    config: MmapConfig,
    clock: Arc<dyn Clock>,
    cache: Mutex<CacheState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn layer_count(&self) -> usize {
        self.layout.layers.len()
    }

    fn check_index(&self, index: usize) -> Result<&LayerDescriptor> {
        self.layout
            .layers
            .get(index)
            .ok_or(TinyAiError::OutOfRange { index, count: self.layer_count() })
    }

    fn copy_layer(&self, desc: &LayerDescriptor) -> Arc<AlignedBuf> {
        Arc::new(AlignedBuf::copy_from(&self.mmap[desc.range()], self.config.buffer_alignment))
    }

    /// Apply an eviction plan for `needed` bytes. Nothing is evicted on failure.
    fn make_room(
        &self,
        cache: &mut CacheState,
        index: usize,
        needed: usize,
        now: u64,
    ) -> Result<()> {
        match cache.plan(needed, now) {
            Plan::Fits => Ok(()),
            Plan::Evict(victims) => {
                for victim in victims {
                    cache.evict(victim);
                    debug!(victim, for_layer = index, "evicted layer from cache");
                }
                Ok(())
            }
            Plan::Impossible { reclaimable } => Err(TinyAiError::OutOfCacheBudget {
                index,
                required: needed,
                available: cache.free() + reclaimable,
                capacity: cache.capacity(),
            }),
        }
    }

    pub(crate) fn get_weights(&self, index: usize) -> Result<LayerWeights> {
        let desc = self.check_index(index)?;
        let mut cache = self.lock();
        let now = self.clock.now_ms();

        if let Some(entry) = cache.get_mut(index) {
            entry.last_accessed = entry.last_accessed.max(now);
            entry.access_count = entry.access_count.saturating_add(1);
            let buf = Arc::clone(&entry.buf);
            cache.stats.hits += 1;
            trace!(index, "cache hit");
            return Ok(LayerWeights::from_shared(index, buf));
        }

        cache.stats.misses += 1;
        if self.config.adaptive_caching {
            if let Some(priority) = cache.readmit(index) {
                debug!(index, priority, "raised priority of re-admitted layer");
            }
        }
        let charged = self.config.charged_size(desc.size);
        self.make_room(&mut cache, index, charged, now)?;
        let buf = self.copy_layer(desc);
        cache.insert(
            index,
            CacheEntry { buf: Arc::clone(&buf), charged, last_accessed: now, access_count: 1 },
        );
        debug!(index, bytes = desc.size, used = cache.used(), "cached layer from mapping");
        Ok(LayerWeights::from_shared(index, buf))
    }

    /// Insert `index` without touching access statistics.
    fn fill(&self, index: usize, mode: Fill) -> Result<bool> {
        let desc = self.check_index(index)?;
        let mut cache = self.lock();
        if cache.get(index).is_some() {
            return Ok(false);
        }

        let now = self.clock.now_ms();
        let charged = self.config.charged_size(desc.size);
        match mode {
            Fill::Evicting => self.make_room(&mut cache, index, charged, now)?,
            Fill::FreeSpaceOnly if charged > cache.free() => {
                cache.stats.prefetch_skips += 1;
                return Ok(false);
            }
            Fill::FreeSpaceOnly => {}
        }

        let buf = self.copy_layer(desc);
        cache.insert(index, CacheEntry { buf, charged, last_accessed: now, access_count: 0 });
        cache.stats.prefetched += 1;
        trace!(index, ?mode, "prefetched layer");
        Ok(true)
    }

    pub(crate) fn prefetch(&self, index: usize) -> bool {
        match self.fill(index, Fill::Evicting) {
            Ok(_) => true,
            Err(e) => {
                debug!(index, error = %e, "prefetch skipped");
                false
            }
        }
    }

    /// Background sweep step. Never evicts and never fails.
    pub(crate) fn sweep_fill(&self, index: usize) {
        let _ = self.fill(index, Fill::FreeSpaceOnly);
    }
}

/// A read-only TMAI model mapping with a bounded cache of layer copies.
///
/// Layer buffers are reference counted: a [`LayerWeights`] returned by
/// [`MappedModel::get_weights`] keeps its bytes alive and pins the layer
/// against eviction until every clone of it is dropped. [`release`] drops
/// the cache entry unconditionally; outstanding views stay valid.
///
/// The file must not be modified or truncated while it is mapped.
///
/// [`release`]: MappedModel::release
pub struct MappedModel {
    shared: Arc<Shared>,
    workers: Option<PrefetchWorkers>,
}

impl MappedModel {
    /// Map `path` and start prefetch workers if the config enables them.
    pub fn open(path: impl AsRef<Path>, config: MmapConfig) -> Result<Self> {
        Self::open_with_clock(path, config, Arc::new(MonotonicClock::new()))
    }

    /// Like [`MappedModel::open`] with an explicit tick source.
    pub fn open_with_clock(
        path: impl AsRef<Path>,
        config: MmapConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TinyAiError::NotFound { path: path.clone() },
            _ => TinyAiError::Io(e),
        })?;
        let file_len = file.metadata()?.len();
        if file_len < tinyai_format::HEADER_SIZE as u64 {
            return Err(TinyAiError::InvalidFormat(format!(
                "{} is {file_len} bytes, too small for a model header",
                path.display()
            )));
        }

        // SAFETY: the mapping is read-only and callers must keep the file
        // unchanged for the lifetime of the store.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|source| TinyAiError::MapFailed { path: path.clone(), source })?;
        let layout = parse_layout(&mmap)?;

        info!(
            path = %path.display(),
            model = %layout.header.name,
            version = layout.header.version,
            layers = layout.layer_count(),
            "mapped model"
        );

        let cache = CacheState::new(layout.layer_count(), config.max_cache_size);
        let shared = Arc::new(Shared { path, mmap, layout, config, clock, cache: Mutex::new(cache) });
        let workers = if shared.config.prefetch_enabled {
            Some(PrefetchWorkers::spawn(&shared, shared.config.prefetch_threads)?)
        } else {
            None
        };

        Ok(Self { shared, workers })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn model_name(&self) -> &str {
        &self.shared.layout.header.name
    }

    pub fn version(&self) -> u32 {
        self.shared.layout.header.version
    }

    pub fn file_size(&self) -> usize {
        self.shared.mmap.len()
    }

    pub fn config(&self) -> &MmapConfig {
        &self.shared.config
    }

    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.shared.layout.layers
    }

    /// Raw bytes of layer `index` straight from the mapping.
    pub fn mapped_bytes(&self, index: usize) -> Option<&[u8]> {
        let desc = self.shared.layout.layers.get(index)?;
        Some(&self.shared.mmap[desc.range()])
    }

    pub fn layer_count(&self) -> usize {
        self.shared.layer_count()
    }

    pub fn describe(&self, index: usize) -> Option<&LayerDescriptor> {
        self.shared.layout.layers.get(index)
    }

    /// Return the cached copy of layer `index`, materialising it if needed.
    pub fn get_weights(&self, index: usize) -> Result<LayerWeights> {
        self.shared.get_weights(index)
    }

    /// Cache layer `index` without counting an access. May evict.
    pub fn prefetch(&self, index: usize) -> bool {
        self.shared.prefetch(index)
    }

    /// Hand `index` to the background workers and return immediately.
    pub fn schedule_prefetch(&self, index: usize) -> Result<()> {
        self.shared.check_index(index)?;
        match &self.workers {
            Some(workers) => workers.schedule(index),
            None => Err(TinyAiError::PrefetchDisabled),
        }
    }

    /// Drop the cached copy of `index`. Returns whether it was cached.
    pub fn release(&self, index: usize) -> bool {
        let removed = self.shared.lock().remove(index).is_some();
        if removed {
            debug!(index, "released layer");
        }
        removed
    }

    pub fn is_cached(&self, index: usize) -> bool {
        self.shared.lock().get(index).is_some()
    }

    /// `true` while some [`LayerWeights`] for `index` is alive.
    pub fn is_pinned(&self, index: usize) -> bool {
        self.shared.lock().get(index).is_some_and(CacheEntry::is_pinned)
    }

    pub fn cached_layers(&self) -> Vec<usize> {
        self.shared.lock().cached_indices()
    }

    pub fn set_priority(&self, index: usize, priority: f32) -> Result<()> {
        self.shared.check_index(index)?;
        self.shared.lock().set_priority(index, priority);
        Ok(())
    }

    pub fn priority(&self, index: usize) -> Option<f32> {
        self.shared.lock().priority(index)
    }

    pub fn reset_priorities(&self) {
        self.shared.lock().reset_priorities();
    }

    /// Bytes currently charged against `max_cache_size`.
    pub fn memory_usage(&self) -> usize {
        self.shared.lock().used()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.lock().snapshot()
    }

    /// Access count and last access tick of a cached layer.
    pub fn access_info(&self, index: usize) -> Option<(u64, u64)> {
        self.shared.lock().get(index).map(|e| (e.access_count, e.last_accessed))
    }
}

impl fmt::Debug for MappedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedModel")
            .field("path", &self.shared.path)
            .field("layers", &self.layer_count())
            .field("cache_used", &self.memory_usage())
            .field("cache_capacity", &self.shared.config.max_cache_size)
            .field("workers", &self.workers.is_some())
            .finish()
    }
}

impl Drop for MappedModel {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
        self.shared.lock().clear();
        info!(path = %self.shared.path.display(), "unmapped model");
    }
}

impl WeightStore for MappedModel {
    fn layer_count(&self) -> usize {
        MappedModel::layer_count(self)
    }

    fn describe(&self, index: usize) -> Option<&LayerDescriptor> {
        MappedModel::describe(self, index)
    }

    fn get_weights(&self, index: usize) -> Result<LayerWeights> {
        MappedModel::get_weights(self, index)
    }

    fn prefetch(&self, index: usize) -> bool {
        MappedModel::prefetch(self, index)
    }

    fn schedule_prefetch(&self, index: usize) -> Result<()> {
        MappedModel::schedule_prefetch(self, index)
    }

    fn release(&self, index: usize) -> bool {
        MappedModel::release(self, index)
    }

    fn is_cached(&self, index: usize) -> bool {
        MappedModel::is_cached(self, index)
    }

    fn set_priority(&self, index: usize, priority: f32) -> Result<()> {
        MappedModel::set_priority(self, index, priority)
    }

    fn memory_usage(&self) -> usize {
        MappedModel::memory_usage(self)
    }
}
