//! Budgeted progressive loader over a [`WeightStore`].

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tinyai_common::{MmapConfig, PriorityStrategy, ProgressiveConfig, Result, TinyAiConfig, TinyAiError};
use tinyai_mmap::{LayerWeights, MappedModel, WeightStore};
use tracing::{debug, info, trace, warn};

use crate::graph::DependencyGraph;
use crate::history::{AccessHistory, UsageAnalysis, UsagePattern, classify};
use crate::policy::{Candidate, Picker, propose_prefetch};
use crate::state::LayerState;
use crate::stats::{LayerStats, MemoryStats};

// ── Per-layer bookkeeping ─────────────────────────────────────────────────

#[derive(Debug)]
struct Slot {
    state: LayerState,
    size: usize,
    /// Held while Loaded; keeps the layer pinned in the store.
    weights: Option<LayerWeights>,
    last_access: u64,
    access_count: u64,
    custom_priority: f32,
    load_count: u64,
    avg_load_time: Duration,
    /// In-flight requests that need this layer to stay put.
    pins: u32,
    /// A prefetch hint was ever handed to the store for this layer.
    prefetched: bool,
}

impl Slot {
    fn new(size: usize) -> Self {
        Self {
            state: LayerState::Unloaded,
            size,
            weights: None,
            last_access: 0,
            access_count: 0,
            custom_priority: 1.0,
            load_count: 0,
            avg_load_time: Duration::ZERO,
            pins: 0,
            prefetched: false,
        }
    }

    fn reset_stats(&mut self) {
        self.last_access = 0;
        self.access_count = 0;
        self.load_count = 0;
        self.avg_load_time = Duration::ZERO;
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_load_time(&mut self, elapsed: Duration) {
        self.load_count += 1;
        let n = self.load_count as f64;
        let mean = self.avg_load_time.as_secs_f64() * (n - 1.0) / n + elapsed.as_secs_f64() / n;
        self.avg_load_time = Duration::from_secs_f64(mean);
    }
}

struct Inner {
    config: ProgressiveConfig,
    slots: Vec<Slot>,
    graph: DependencyGraph,
    history: AccessHistory,
    current_memory: usize,
    peak_memory: usize,
    reserved: usize,
    access_counter: u64,
    prefetch_enabled: bool,
    evictions: u64,
    prefetches_issued: u64,
    prefetch_failures: u64,
    load_failures: u64,
}

impl Inner {
    fn set_state(&mut self, index: usize, next: LayerState) {
        let slot = &mut self.slots[index];
        debug_assert!(
            slot.state.can_transition_to(next),
            "illegal transition {} -> {next} for layer {index}",
            slot.state
        );
        trace!(layer = index, from = %slot.state, to = %next, "layer state");
        slot.state = next;
    }

    fn is_loaded(&self, index: usize) -> bool {
        self.slots[index].state == LayerState::Loaded
    }

    /// First dependent that is Loaded or Loading, if any.
    fn blocking_dependent(&self, index: usize) -> Option<usize> {
        self.graph.dependents(index).iter().copied().find(|&d| {
            matches!(self.slots[d].state, LayerState::Loaded | LayerState::Loading)
        })
    }

    fn can_unload(&self, index: usize) -> bool {
        self.is_loaded(index) && self.blocking_dependent(index).is_none()
    }

    fn record_access(&mut self, index: usize) {
        self.access_counter += 1;
        let slot = &mut self.slots[index];
        slot.last_access = self.access_counter;
        slot.access_count = slot.access_count.saturating_add(1);
        if self.config.enable_dependency_tracking {
            self.history.push(index);
        }
    }

    fn analysis(&self) -> UsageAnalysis {
        if !self.config.enable_dependency_tracking {
            return UsageAnalysis::UNKNOWN;
        }
        classify(&self.history, self.access_counter)
    }

    fn proposal(&self, index: usize) -> Vec<usize> {
        let counts: Vec<u64> = self.slots.iter().map(|s| s.access_count).collect();
        propose_prefetch(
            self.analysis(),
            self.config.prefetch_threshold,
            index,
            self.config.max_prefetch_layers,
            &counts,
            |j| self.slots[j].state == LayerState::Unloaded,
        )
    }

    /// Mark the proposal for `index` as Prefetching and return it.
    fn begin_prefetch(&mut self, index: usize) -> Vec<usize> {
        if !self.prefetch_enabled {
            return Vec::new();
        }
        let layers = self.proposal(index);
        for &j in &layers {
            self.set_state(j, LayerState::Prefetching);
            self.slots[j].prefetched = true;
        }
        self.prefetches_issued += layers.len() as u64;
        layers
    }

    /// Loaded → Unloading; the bytes stop counting immediately.
    fn begin_unload(&mut self, index: usize) {
        self.set_state(index, LayerState::Unloading);
        let slot = &mut self.slots[index];
        slot.weights = None;
        self.current_memory -= slot.size;
    }

    /// Victims that bring usage down to `bytes`, largest first.
    fn plan_shrink(&self, bytes: usize, unloading: bool) -> Result<Vec<usize>> {
        let usage = self.current_memory + self.reserved;
        if usage <= bytes {
            return Ok(Vec::new());
        }
        let exhausted = TinyAiError::BudgetExhausted { required: usage, budget: bytes };
        if !unloading {
            return Err(exhausted);
        }
        self.plan_victims(None, bytes, Picker::Largest).ok_or(exhausted)
    }

    /// Simulate evictions until `current + reserved <= target`.
    ///
    /// `exclude` and pinned layers are never chosen; a layer only becomes a
    /// candidate once none of its dependents remains Loaded or Loading in
    /// the simulation. Returns `None` if the target cannot be reached.
    fn plan_victims(&self, exclude: Option<usize>, target: usize, picker: Picker) -> Option<Vec<usize>> {
        let mut removed = vec![false; self.slots.len()];
        let mut victims = Vec::new();
        let mut usage = self.current_memory + self.reserved;
        while usage > target {
            let candidates: Vec<Candidate> = self
                .slots
                .iter()
                .enumerate()
                .filter(|&(i, s)| {
                    s.state == LayerState::Loaded
                        && !removed[i]
                        && Some(i) != exclude
                        && s.pins == 0
                        && !self.graph.dependents(i).iter().any(|&d| {
                            let st = self.slots[d].state;
                            st == LayerState::Loading || (st == LayerState::Loaded && !removed[d])
                        })
                })
                .map(|(index, s)| Candidate {
                    index,
                    size: s.size,
                    last_access: s.last_access,
                    access_count: s.access_count,
                    priority: s.custom_priority,
                })
                .collect();
            let victim = picker.pick(&candidates)?;
            removed[victim.index] = true;
            usage -= victim.size;
            victims.push(victim.index);
        }
        Some(victims)
    }
}

/// Outcome of one attempt to bring a layer to Loaded.
enum Step {
    Ready(LayerWeights),
    /// The dependency set changed underneath the plan.
    Replan,
}

// ── ProgressiveLoader ─────────────────────────────────────────────────────

/// Loads layers on demand inside a memory budget.
///
/// Every Loaded layer holds a [`LayerWeights`] view, so it stays pinned in
/// the store for as long as it is Loaded. The loader mutex is never held
/// while calling into the store; layers in a transitional state make other
/// callers wait on a condition variable instead.
pub struct ProgressiveLoader<S: WeightStore = MappedModel> {
    store: Arc<S>,
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl<S: WeightStore> fmt::Debug for ProgressiveLoader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ProgressiveLoader")
            .field("layers", &inner.slots.len())
            .field("budget", &inner.config.max_memory_budget)
            .field("current_memory", &inner.current_memory)
            .field("strategy", &inner.config.priority_strategy)
            .field("loaded", &inner.slots.iter().filter(|s| s.state == LayerState::Loaded).count())
            .finish()
    }
}

impl ProgressiveLoader<MappedModel> {
    /// Open `path` with a store of its own. The store's buffer alignment
    /// follows `config.cache_alignment`.
    pub fn open(path: impl AsRef<Path>, config: ProgressiveConfig) -> Result<Self> {
        let mmap = MmapConfig { buffer_alignment: config.cache_alignment, ..Default::default() };
        Self::from_store(Arc::new(MappedModel::open(path, mmap)?), config)
    }

    /// Open `path` with both configurations. The larger of the two
    /// alignments is used for store buffers.
    pub fn open_with_config(path: impl AsRef<Path>, config: &TinyAiConfig) -> Result<Self> {
        config.validate()?;
        let mmap = MmapConfig {
            buffer_alignment: config.mmap.buffer_alignment.max(config.progressive.cache_alignment),
            ..config.mmap.clone()
        };
        Self::from_store(Arc::new(MappedModel::open(path, mmap)?), config.progressive.clone())
    }
}

impl<S: WeightStore> ProgressiveLoader<S> {
    /// Wrap an existing store. The store may be shared with other users.
    pub fn from_store(store: Arc<S>, config: ProgressiveConfig) -> Result<Self> {
        config.validate()?;
        let layer_count = store.layer_count();
        let slots = (0..layer_count)
            .map(|i| Slot::new(store.describe(i).map_or(0, |d| d.size)))
            .collect();
        let history_len = if config.enable_dependency_tracking { config.history_size } else { 0 };

        info!(
            layers = layer_count,
            budget = config.max_memory_budget,
            strategy = ?config.priority_strategy,
            "progressive loader ready"
        );

        Ok(Self {
            store,
            inner: Mutex::new(Inner {
                slots,
                graph: DependencyGraph::new(layer_count),
                history: AccessHistory::new(history_len),
                current_memory: 0,
                peak_memory: 0,
                reserved: 0,
                access_counter: 0,
                prefetch_enabled: true,
                evictions: 0,
                prefetches_issued: 0,
                prefetch_failures: 0,
                load_failures: 0,
                config,
            }),
            changed: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, index: usize) -> Result<()> {
        let count = self.store.layer_count();
        if index < count { Ok(()) } else { Err(TinyAiError::OutOfRange { index, count }) }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn layer_count(&self) -> usize {
        self.store.layer_count()
    }

    pub fn total_model_size(&self) -> usize {
        self.lock().slots.iter().map(|s| s.size).sum()
    }

    pub fn config(&self) -> ProgressiveConfig {
        self.lock().config.clone()
    }

    // ── loading ──────────────────────────────────────────────────────────

    /// Make layer `index` and everything it depends on Loaded and return its
    /// weights. Evicts other layers per the priority strategy when the
    /// budget requires it, then hands predicted layers to the store.
    ///
    /// Hints normally go to the store's background workers. A store without
    /// workers gets a synchronous [`WeightStore::prefetch`] instead, so with
    /// such a store this call also pays for copying every predicted layer.
    pub fn request(&self, index: usize) -> Result<LayerWeights> {
        self.request_inner(index, true)
    }

    /// Same as [`ProgressiveLoader::request`].
    pub fn get_weights(&self, index: usize) -> Result<LayerWeights> {
        self.request(index)
    }

    fn request_inner(&self, index: usize, prefetch: bool) -> Result<LayerWeights> {
        self.check(index)?;
        let weights = loop {
            let (members, order) = {
                let mut inner = self.lock();
                loop {
                    let slot = &inner.slots[index];
                    if slot.state == LayerState::Loaded {
                        if let Some(w) = slot.weights.clone() {
                            inner.record_access(index);
                            let hints = if prefetch { inner.begin_prefetch(index) } else { Vec::new() };
                            drop(inner);
                            self.issue_prefetches(&hints);
                            return Ok(w);
                        }
                    }
                    if !slot.state.is_transitional() {
                        break;
                    }
                    inner = self.wait(inner);
                }

                let mut members = inner.graph.closure(index);
                members.push(index);
                for &m in &members {
                    inner.slots[m].pins += 1;
                }
                let order = inner.graph.load_order(index, |j| inner.is_loaded(j));
                (members, order)
            };

            let outcome = self.load_plan(index, &order);

            {
                let mut inner = self.lock();
                for &m in &members {
                    inner.slots[m].pins -= 1;
                }
            }
            self.changed.notify_all();

            match outcome? {
                Step::Ready(w) => break w,
                Step::Replan => debug!(layer = index, "dependencies changed, replanning"),
            }
        };

        if prefetch {
            let hints = self.lock().begin_prefetch(index);
            self.issue_prefetches(&hints);
        }
        Ok(weights)
    }

    fn load_plan(&self, root: usize, order: &[usize]) -> Result<Step> {
        for &layer in order {
            match self.load_one(layer) {
                Ok(Step::Ready(w)) if layer == root => return Ok(Step::Ready(w)),
                Ok(Step::Ready(_)) => {}
                Ok(Step::Replan) => return Ok(Step::Replan),
                Err(e) if layer == root => return Err(e),
                Err(e) => {
                    return Err(TinyAiError::DependencyFailed {
                        layer: root,
                        dependency: layer,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(Step::Replan)
    }

    /// Bring one layer to Loaded, assuming its dependencies already are.
    fn load_one(&self, index: usize) -> Result<Step> {
        let mut inner = self.lock();
        loop {
            let slot = &inner.slots[index];
            if slot.state == LayerState::Loaded {
                if let Some(w) = slot.weights.clone() {
                    inner.record_access(index);
                    return Ok(Step::Ready(w));
                }
            }
            if !slot.state.is_transitional() {
                break;
            }
            inner = self.wait(inner);
        }

        if inner.graph.dependencies(index).iter().any(|&d| !inner.is_loaded(d)) {
            return Ok(Step::Replan);
        }

        let size = inner.slots[index].size;
        let budget = inner.config.max_memory_budget;
        let exhausted = TinyAiError::BudgetExhausted { required: size, budget };
        let mut victims = Vec::new();
        if inner.current_memory + inner.reserved + size > budget {
            let Some(target) = budget.checked_sub(size) else {
                return Err(exhausted);
            };
            if !inner.config.enable_layer_unloading {
                return Err(exhausted);
            }
            let picker = Picker::Strategy(inner.config.priority_strategy);
            victims = inner.plan_victims(Some(index), target, picker).ok_or(exhausted)?;
            for &v in &victims {
                inner.begin_unload(v);
                inner.evictions += 1;
                debug!(victim = v, for_layer = index, "evicting layer to fit budget");
            }
        }

        inner.set_state(index, LayerState::Loading);
        inner.reserved += size;
        drop(inner);

        self.finish_unloads(&victims);

        let started = Instant::now();
        let fetched = self.store.get_weights(index);
        let elapsed = started.elapsed();

        let mut inner = self.lock();
        inner.reserved -= size;
        let step = match fetched {
            Ok(w) => {
                inner.set_state(index, LayerState::Loaded);
                let slot = &mut inner.slots[index];
                slot.weights = Some(w.clone());
                slot.record_load_time(elapsed);
                inner.current_memory += size;
                inner.peak_memory = inner.peak_memory.max(inner.current_memory);
                inner.record_access(index);
                debug!(layer = index, bytes = size, current = inner.current_memory, "layer loaded");
                Ok(Step::Ready(w))
            }
            Err(e) => {
                inner.set_state(index, LayerState::Unloaded);
                inner.load_failures += 1;
                debug!(layer = index, error = %e, "layer load failed");
                Err(e)
            }
        };
        drop(inner);
        self.changed.notify_all();
        step
    }

    /// Release Unloading layers from the store and mark them Unloaded.
    fn finish_unloads(&self, layers: &[usize]) {
        if layers.is_empty() {
            return;
        }
        for &layer in layers {
            self.store.release(layer);
        }
        let mut inner = self.lock();
        for &layer in layers {
            inner.set_state(layer, LayerState::Unloaded);
        }
        drop(inner);
        self.changed.notify_all();
    }

    /// Hand Prefetching layers to the store, then return them to Unloaded.
    /// The loader does not wait for the store to finish filling its cache.
    fn issue_prefetches(&self, layers: &[usize]) {
        if layers.is_empty() {
            return;
        }
        let mut failed = 0u64;
        for &layer in layers {
            match self.store.schedule_prefetch(layer) {
                Ok(()) => trace!(layer, "prefetch scheduled"),
                Err(TinyAiError::PrefetchDisabled) => {
                    if !self.store.prefetch(layer) {
                        debug!(layer, "prefetch skipped by store");
                        failed += 1;
                    }
                }
                Err(e) => {
                    warn!(layer, error = %e, "prefetch hint rejected");
                    failed += 1;
                }
            }
        }
        let mut inner = self.lock();
        inner.prefetch_failures += failed;
        for &layer in layers {
            if inner.slots[layer].state == LayerState::Prefetching {
                inner.set_state(layer, LayerState::Unloaded);
            }
        }
        drop(inner);
        self.changed.notify_all();
    }

    /// Best-effort load of every listed layer, without prefetching.
    /// Returns `false` if any of them failed.
    pub fn preload_layers(&self, layers: &[usize]) -> bool {
        let mut all = true;
        for &layer in layers {
            if let Err(e) = self.request_inner(layer, false) {
                debug!(layer, error = %e, "preload failed");
                all = false;
            }
        }
        all
    }

    // ── unloading ────────────────────────────────────────────────────────

    /// Unload layer `index`. Already Unloaded layers are fine; a layer with
    /// a Loaded dependent is refused.
    pub fn release(&self, index: usize) -> Result<()> {
        self.check(index)?;
        let mut inner = self.lock();
        loop {
            let slot = &inner.slots[index];
            let busy = slot.state.is_transitional()
                || (slot.state == LayerState::Loaded && slot.pins > 0);
            if !busy {
                break;
            }
            inner = self.wait(inner);
        }

        if !inner.is_loaded(index) {
            return Ok(());
        }
        if let Some(dependent) = inner.blocking_dependent(index) {
            return Err(TinyAiError::DependentsLoaded { layer: index, dependent });
        }
        inner.begin_unload(index);
        drop(inner);
        self.finish_unloads(&[index]);
        debug!(layer = index, "layer released");
        Ok(())
    }

    /// `true` if `index` is Loaded and nothing Loaded depends on it.
    pub fn can_unload(&self, index: usize) -> bool {
        index < self.layer_count() && self.lock().can_unload(index)
    }

    /// Unload everything that can be unloaded, dependents before their
    /// dependencies. Returns `true` if no layer is left Loaded.
    pub fn clear(&self) -> bool {
        loop {
            let batch = {
                let mut inner = self.lock();
                let batch: Vec<usize> = (0..inner.slots.len())
                    .filter(|&i| inner.slots[i].pins == 0 && inner.can_unload(i))
                    .collect();
                if batch.is_empty() {
                    return !inner.slots.iter().any(|s| s.state == LayerState::Loaded);
                }
                for &i in &batch {
                    inner.begin_unload(i);
                }
                batch
            };
            self.finish_unloads(&batch);
        }
    }

    /// Change the memory budget, unloading the largest unloadable layers
    /// first if usage is above it. Fails with state unchanged if the new
    /// budget cannot be met.
    pub fn set_budget(&self, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Err(TinyAiError::InvalidConfig("memory budget must be non-zero".into()));
        }
        let mut inner = self.lock();
        let unloading = inner.config.enable_layer_unloading;
        let victims = inner.plan_shrink(bytes, unloading)?;
        for &v in &victims {
            inner.begin_unload(v);
            inner.evictions += 1;
        }
        inner.config.max_memory_budget = bytes;
        info!(budget = bytes, unloaded = victims.len(), "memory budget changed");
        drop(inner);
        self.finish_unloads(&victims);
        Ok(())
    }

    /// Replace the whole configuration.
    ///
    /// A smaller budget unloads exactly like [`ProgressiveLoader::set_budget`],
    /// judged by the new `enable_layer_unloading`. A new `history_size` keeps
    /// the most recent entries that fit; turning dependency tracking off
    /// empties the history. Existing dependency edges stay in force and
    /// `cache_alignment` only matters when a store is opened. Fails with
    /// nothing changed if the config is invalid or the budget cannot be met.
    pub fn set_config(&self, config: ProgressiveConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.lock();
        let victims =
            inner.plan_shrink(config.max_memory_budget, config.enable_layer_unloading)?;
        for &v in &victims {
            inner.begin_unload(v);
            inner.evictions += 1;
        }

        let history_len = if config.enable_dependency_tracking { config.history_size } else { 0 };
        if history_len != inner.history.capacity() {
            let mut history = AccessHistory::new(history_len);
            inner.history.iter().for_each(|layer| history.push(layer));
            inner.history = history;
        }

        info!(
            budget = config.max_memory_budget,
            strategy = ?config.priority_strategy,
            history = history_len,
            unloaded = victims.len(),
            "configuration replaced"
        );
        inner.config = config;
        drop(inner);
        self.finish_unloads(&victims);
        Ok(())
    }

    /// Cap on the layers one request hands to the store. Zero disables
    /// prediction without touching [`ProgressiveLoader::set_prefetch_enabled`].
    pub fn set_max_prefetch_layers(&self, layers: usize) {
        self.lock().config.max_prefetch_layers = layers;
    }

    /// Unload every layer regardless of dependencies and zero all statistics
    /// and history. The dependency graph and configuration are kept.
    pub fn reset(&self) {
        let loaded = {
            let mut inner = self.lock();
            while inner.slots.iter().any(|s| s.state.is_transitional() || s.pins > 0) {
                inner = self.wait(inner);
            }
            let loaded: Vec<usize> = (0..inner.slots.len()).filter(|&i| inner.is_loaded(i)).collect();
            for &i in &loaded {
                inner.begin_unload(i);
            }
            inner.slots.iter_mut().for_each(Slot::reset_stats);
            inner.history.clear();
            inner.access_counter = 0;
            inner.peak_memory = inner.current_memory;
            inner.evictions = 0;
            inner.prefetches_issued = 0;
            inner.prefetch_failures = 0;
            inner.load_failures = 0;
            loaded
        };
        self.finish_unloads(&loaded);
        info!("progressive loader reset");
    }

    // ── dependencies & priorities ────────────────────────────────────────

    /// Record that `dependent` needs `dependency` Loaded first.
    pub fn add_dependency(&self, dependent: usize, dependency: usize) -> Result<()> {
        self.check(dependent)?;
        self.check(dependency)?;
        let mut inner = self.lock();
        if !inner.config.enable_dependency_tracking {
            return Err(TinyAiError::DependencyTrackingDisabled);
        }
        while inner.slots[dependent].state.is_transitional() {
            inner = self.wait(inner);
        }
        inner.graph.check_edge(dependent, dependency)?;
        if inner.is_loaded(dependent) && !inner.is_loaded(dependency) {
            return Err(TinyAiError::DependencyNotLoaded { dependent, dependency });
        }
        inner.graph.add(dependent, dependency)?;
        debug!(dependent, dependency, "dependency added");
        Ok(())
    }

    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        self.lock().graph.dependencies(index).to_vec()
    }

    pub fn dependents(&self, index: usize) -> Vec<usize> {
        self.lock().graph.dependents(index).to_vec()
    }

    /// User priority, consulted by [`PriorityStrategy::Custom`].
    pub fn set_priority(&self, index: usize, priority: f32) -> Result<()> {
        self.check(index)?;
        self.lock().slots[index].custom_priority = priority;
        Ok(())
    }

    /// Score every layer by `0.4 * frequency + 0.4 * recency + 0.2 * share
    /// of dependents`, switch to [`PriorityStrategy::Custom`] and push the
    /// scores into the store so both caches agree.
    pub fn optimize(&self) {
        let priorities: Vec<f32> = {
            let mut inner = self.lock();
            inner.config.priority_strategy = PriorityStrategy::Custom;
            #[allow(clippy::cast_precision_loss)]
            let ticks = (inner.access_counter + 1) as f32;
            #[allow(clippy::cast_precision_loss)]
            let layers = inner.slots.len().max(1) as f32;
            let tracking = inner.config.enable_dependency_tracking;
            let priorities: Vec<f32> = (0..inner.slots.len())
                .map(|i| {
                    let slot = &inner.slots[i];
                    #[allow(clippy::cast_precision_loss)]
                    let freq = slot.access_count as f32 / ticks;
                    #[allow(clippy::cast_precision_loss)]
                    let recency = slot.last_access as f32 / ticks;
                    #[allow(clippy::cast_precision_loss)]
                    let deps = if tracking {
                        inner.graph.dependents(i).len() as f32 / layers
                    } else {
                        0.0
                    };
                    0.4 * freq + 0.4 * recency + 0.2 * deps
                })
                .collect();
            for (slot, &p) in inner.slots.iter_mut().zip(&priorities) {
                slot.custom_priority = p;
            }
            priorities
        };

        for (i, &p) in priorities.iter().enumerate() {
            if let Err(e) = self.store.set_priority(i, p) {
                warn!(layer = i, error = %e, "could not forward priority to store");
            }
        }
        info!(layers = priorities.len(), "priorities optimized");
    }

    pub fn set_prefetch_enabled(&self, enabled: bool) {
        self.lock().prefetch_enabled = enabled;
    }

    // ── queries ──────────────────────────────────────────────────────────

    pub fn state(&self, index: usize) -> Option<LayerState> {
        self.lock().slots.get(index).map(|s| s.state)
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.state(index) == Some(LayerState::Loaded)
    }

    pub fn loaded_layers(&self) -> Vec<usize> {
        let inner = self.lock();
        (0..inner.slots.len()).filter(|&i| inner.is_loaded(i)).collect()
    }

    pub fn current_memory(&self) -> usize {
        self.lock().current_memory
    }

    pub fn budget(&self) -> usize {
        self.lock().config.max_memory_budget
    }

    pub fn usage_pattern(&self) -> UsagePattern {
        self.analyze_usage().pattern
    }

    pub fn analyze_usage(&self) -> UsageAnalysis {
        self.lock().analysis()
    }

    /// Layers a request for `index` would hand to the store right now.
    pub fn layers_to_preload(&self, index: usize) -> Vec<usize> {
        if index >= self.layer_count() {
            return Vec::new();
        }
        self.lock().proposal(index)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let inner = self.lock();
        let layers: Vec<LayerStats> = inner
            .slots
            .iter()
            .enumerate()
            .map(|(index, s)| LayerStats {
                index,
                state: s.state,
                size: s.size,
                access_count: s.access_count,
                last_access: s.last_access,
                load_count: s.load_count,
                avg_load_time: s.avg_load_time,
                custom_priority: s.custom_priority,
                dependencies: inner.graph.dependencies(index).to_vec(),
                dependents: inner.graph.dependents(index).to_vec(),
            })
            .collect();
        MemoryStats {
            current: inner.current_memory,
            peak: inner.peak_memory,
            budget: inner.config.max_memory_budget,
            reserved: inner.reserved,
            total_model_size: inner.slots.iter().map(|s| s.size).sum(),
            loaded_layers: layers.iter().filter(|l| l.state == LayerState::Loaded).count(),
            access_counter: inner.access_counter,
            evictions: inner.evictions,
            prefetches_issued: inner.prefetches_issued,
            prefetch_failures: inner.prefetch_failures,
            load_failures: inner.load_failures,
            layers,
        }
    }
}

impl<S: WeightStore> Drop for ProgressiveLoader<S> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut released = 0usize;
        for (index, slot) in inner.slots.iter_mut().enumerate() {
            let held = slot.weights.take().is_some();
            if held || slot.prefetched {
                self.store.release(index);
                released += 1;
            }
            slot.state = LayerState::Unloaded;
        }
        inner.current_memory = 0;
        info!(released, "progressive loader dropped");
    }
}
