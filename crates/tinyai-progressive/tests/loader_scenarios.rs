//! End-to-end behaviour of `ProgressiveLoader` over synthetic TMAI files.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tinyai_common::{ErrorKind, MmapConfig, PriorityStrategy, ProgressiveConfig, TinyAiError};
use tinyai_format::{LayerDescriptor, Precision, TmaiBuilder};
use tinyai_mmap::{LayerWeights, MappedModel, WeightStore};
use tinyai_progressive::{LayerState, ProgressiveLoader, UsagePattern};

// ── helpers ─────────────────────────────────────────────────────────────────

const MB: usize = 1 << 20;

fn write_model(dir: &TempDir, sizes: &[usize]) -> PathBuf {
    let path = dir.path().join("model.tmai");
    sizes
        .iter()
        .enumerate()
        .fold(TmaiBuilder::new().model_name("scenario"), |b, (i, &size)| {
            b.layer(Precision::INT4, vec![i as u8; size])
        })
        .write_to_path(&path)
        .unwrap();
    path
}

fn quiet_store(path: &Path) -> Arc<MappedModel> {
    let config = MmapConfig { prefetch_enabled: false, ..Default::default() };
    Arc::new(MappedModel::open(path, config).unwrap())
}

fn config(budget: usize, strategy: PriorityStrategy) -> ProgressiveConfig {
    ProgressiveConfig {
        max_memory_budget: budget,
        priority_strategy: strategy,
        ..Default::default()
    }
}

/// Ten 1 MB layers behind a store without background workers.
fn ten_layer_loader(
    budget: usize,
    strategy: PriorityStrategy,
) -> (TempDir, ProgressiveLoader) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB; 10]);
    let loader = ProgressiveLoader::from_store(quiet_store(&path), config(budget, strategy)).unwrap();
    (dir, loader)
}

fn request_all(loader: &ProgressiveLoader, layers: &[usize]) {
    for &i in layers {
        loader.request(i).unwrap();
    }
}

/// Store wrapper that records every prefetch hint it receives.
struct RecordingStore {
    inner: MappedModel,
    hints: Mutex<Vec<usize>>,
}

impl RecordingStore {
    fn take_hints(&self) -> Vec<usize> {
        std::mem::take(&mut *self.hints.lock().unwrap())
    }
}

impl WeightStore for RecordingStore {
    fn layer_count(&self) -> usize {
        self.inner.layer_count()
    }

    fn describe(&self, index: usize) -> Option<&LayerDescriptor> {
        self.inner.describe(index)
    }

    fn get_weights(&self, index: usize) -> tinyai_common::Result<LayerWeights> {
        self.inner.get_weights(index)
    }

    fn prefetch(&self, index: usize) -> bool {
        self.hints.lock().unwrap().push(index);
        self.inner.prefetch(index)
    }

    fn schedule_prefetch(&self, index: usize) -> tinyai_common::Result<()> {
        self.hints.lock().unwrap().push(index);
        self.inner.prefetch(index);
        Ok(())
    }

    fn release(&self, index: usize) -> bool {
        self.inner.release(index)
    }

    fn is_cached(&self, index: usize) -> bool {
        self.inner.is_cached(index)
    }

    fn set_priority(&self, index: usize, priority: f32) -> tinyai_common::Result<()> {
        self.inner.set_priority(index, priority)
    }

    fn memory_usage(&self) -> usize {
        self.inner.memory_usage()
    }
}

// ── budget & eviction ───────────────────────────────────────────────────────

#[test]
fn sequential_requests_keep_most_recent_layers_under_budget() {
    let (_dir, loader) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    request_all(&loader, &[0, 1, 2, 3, 4]);

    assert_eq!(loader.loaded_layers(), vec![2, 3, 4]);
    assert_eq!(loader.current_memory(), 3 * MB);
    assert_eq!(loader.state(0), Some(LayerState::Unloaded));
    assert_eq!(loader.memory_stats().evictions, 2);
}

#[test]
fn lru_and_mfu_pick_different_victims() {
    let sequence = [0, 1, 2, 0, 0, 0, 3];

    let (_dir, lru) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    request_all(&lru, &sequence);
    assert_eq!(lru.loaded_layers(), vec![0, 2, 3]);

    let (_dir, mfu) = ten_layer_loader(3 * MB, PriorityStrategy::Mfu);
    request_all(&mfu, &sequence);
    assert_eq!(mfu.loaded_layers(), vec![0, 1, 3]);
}

#[test]
fn fifo_evicts_lowest_index() {
    let (_dir, loader) = ten_layer_loader(2 * MB, PriorityStrategy::Fifo);
    request_all(&loader, &[5, 2, 5, 2, 7]);
    assert_eq!(loader.loaded_layers(), vec![5, 7]);
}

#[test]
fn custom_strategy_evicts_lowest_priority() {
    let (_dir, loader) = ten_layer_loader(2 * MB, PriorityStrategy::Custom);
    loader.set_priority(0, 5.0).unwrap();
    loader.set_priority(1, 0.5).unwrap();
    request_all(&loader, &[0, 1, 2]);
    assert_eq!(loader.loaded_layers(), vec![0, 2]);
}

#[test]
fn layer_larger_than_budget_is_budget_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB, 4 * MB]);
    let loader =
        ProgressiveLoader::from_store(quiet_store(&path), config(3 * MB, PriorityStrategy::Lru))
            .unwrap();

    let err = loader.request(1).unwrap_err();
    assert!(matches!(err, TinyAiError::BudgetExhausted { .. }));
    assert_eq!(err.kind(), ErrorKind::ResourcePressure);
    assert_eq!(loader.state(1), Some(LayerState::Unloaded));
    assert_eq!(loader.current_memory(), 0);
}

#[test]
fn disabled_unloading_refuses_to_evict() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB; 4]);
    let cfg = ProgressiveConfig { enable_layer_unloading: false, ..config(2 * MB, PriorityStrategy::Lru) };
    let loader = ProgressiveLoader::from_store(quiet_store(&path), cfg).unwrap();

    request_all(&loader, &[0, 1]);
    assert!(matches!(loader.request(2), Err(TinyAiError::BudgetExhausted { .. })));
    assert_eq!(loader.loaded_layers(), vec![0, 1]);

    loader.release(0).unwrap();
    loader.request(2).unwrap();
    assert_eq!(loader.loaded_layers(), vec![1, 2]);
}

#[test]
fn store_failure_leaves_layer_unloaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB, MB]);
    let tiny = MmapConfig { max_cache_size: MB / 2, prefetch_enabled: false, ..Default::default() };
    let store = Arc::new(MappedModel::open(&path, tiny).unwrap());
    let loader = ProgressiveLoader::from_store(store, ProgressiveConfig::default()).unwrap();

    let err = loader.request(0).unwrap_err();
    assert!(matches!(err, TinyAiError::OutOfCacheBudget { .. }));
    assert_eq!(loader.state(0), Some(LayerState::Unloaded));
    let stats = loader.memory_stats();
    assert_eq!(stats.load_failures, 1);
    assert_eq!(stats.current, 0);
    assert_eq!(stats.reserved, 0);
}

#[test]
fn out_of_range_requests_are_rejected() {
    let (_dir, loader) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    assert!(matches!(loader.request(10), Err(TinyAiError::OutOfRange { index: 10, count: 10 })));
    assert!(matches!(loader.release(11), Err(TinyAiError::OutOfRange { .. })));
    assert!(matches!(loader.set_priority(10, 1.0), Err(TinyAiError::OutOfRange { .. })));
    assert_eq!(loader.state(10), None);
    assert!(!loader.can_unload(10));
    assert!(loader.layers_to_preload(10).is_empty());
}

#[test]
fn returned_weights_match_file_bytes() {
    let (_dir, loader) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    let weights = loader.request(6).unwrap();
    assert_eq!(weights.index(), 6);
    assert_eq!(weights.len(), MB);
    assert!(weights.iter().all(|&b| b == 6));
}

// ── dependencies ────────────────────────────────────────────────────────────

fn chain_loader(budget: usize) -> (TempDir, ProgressiveLoader) {
    let (dir, loader) = ten_layer_loader(budget, PriorityStrategy::Lru);
    loader.add_dependency(0, 1).unwrap();
    loader.add_dependency(1, 2).unwrap();
    (dir, loader)
}

#[test]
fn request_loads_whole_dependency_chain() {
    let (_dir, loader) = chain_loader(3 * MB);
    loader.request(0).unwrap();
    assert_eq!(loader.loaded_layers(), vec![0, 1, 2]);
    assert_eq!(loader.dependencies(0), vec![1]);
    assert_eq!(loader.dependents(2), vec![1]);
}

#[test]
fn release_refuses_while_dependents_loaded() {
    let (_dir, loader) = chain_loader(3 * MB);
    loader.request(0).unwrap();

    let err = loader.release(2).unwrap_err();
    assert!(matches!(err, TinyAiError::DependentsLoaded { layer: 2, dependent: 1 }));
    assert!(!loader.can_unload(2));
    assert!(loader.can_unload(0));

    loader.release(0).unwrap();
    assert!(matches!(loader.release(2), Err(TinyAiError::DependentsLoaded { .. })));
    loader.release(1).unwrap();
    loader.release(2).unwrap();
    assert!(loader.loaded_layers().is_empty());
    assert_eq!(loader.current_memory(), 0);

    // Releasing an unloaded layer is a no-op.
    loader.release(2).unwrap();
}

#[test]
fn eviction_never_strands_a_dependent() {
    let (_dir, loader) = chain_loader(3 * MB);
    loader.request(0).unwrap();
    // Layer 0 is the most recent, but it is the only one nothing depends on.
    loader.request(3).unwrap();
    assert_eq!(loader.loaded_layers(), vec![1, 2, 3]);
}

#[test]
fn failed_dependency_fails_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB, 4 * MB]);
    let loader =
        ProgressiveLoader::from_store(quiet_store(&path), config(3 * MB, PriorityStrategy::Lru))
            .unwrap();
    loader.add_dependency(0, 1).unwrap();

    let err = loader.request(0).unwrap_err();
    match &err {
        TinyAiError::DependencyFailed { layer, dependency, source } => {
            assert_eq!((*layer, *dependency), (0, 1));
            assert!(matches!(**source, TinyAiError::BudgetExhausted { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_resource_pressure());
    assert_eq!(loader.state(0), Some(LayerState::Unloaded));
    assert_eq!(loader.state(1), Some(LayerState::Unloaded));
}

#[test]
fn bad_edges_are_rejected() {
    let (_dir, loader) = chain_loader(3 * MB);
    assert!(matches!(loader.add_dependency(2, 0), Err(TinyAiError::Cycle { .. })));
    assert!(matches!(loader.add_dependency(4, 4), Err(TinyAiError::SelfDependency(4))));
    assert!(matches!(
        loader.add_dependency(0, 1),
        Err(TinyAiError::DuplicateDependency { dependent: 0, dependency: 1 })
    ));
    assert!(matches!(loader.add_dependency(0, 10), Err(TinyAiError::OutOfRange { .. })));
    assert_eq!(loader.dependencies(2), Vec::<usize>::new());
}

#[test]
fn loaded_dependent_needs_loaded_dependency() {
    let (_dir, loader) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    loader.request(5).unwrap();
    assert!(matches!(
        loader.add_dependency(5, 6),
        Err(TinyAiError::DependencyNotLoaded { dependent: 5, dependency: 6 })
    ));
    loader.request(6).unwrap();
    loader.add_dependency(5, 6).unwrap();
    assert!(!loader.can_unload(6));
}

#[test]
fn dependencies_require_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB; 3]);
    let cfg = ProgressiveConfig { enable_dependency_tracking: false, ..Default::default() };
    let loader = ProgressiveLoader::from_store(quiet_store(&path), cfg).unwrap();
    assert!(matches!(loader.add_dependency(0, 1), Err(TinyAiError::DependencyTrackingDisabled)));
}

// ── usage patterns & prefetch ───────────────────────────────────────────────

fn recording_loader(layers: usize, budget: usize) -> (TempDir, Arc<RecordingStore>, ProgressiveLoader<RecordingStore>) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &vec![MB; layers]);
    let inner = MappedModel::open(&path, MmapConfig { prefetch_enabled: false, ..Default::default() })
        .unwrap();
    let store = Arc::new(RecordingStore { inner, hints: Mutex::new(Vec::new()) });
    let loader =
        ProgressiveLoader::from_store(Arc::clone(&store), config(budget, PriorityStrategy::Lru))
            .unwrap();
    (dir, store, loader)
}

#[test]
fn sequential_history_prefetches_following_layers() {
    let (_dir, store, loader) = recording_loader(10, 10 * MB);
    for &i in &[0, 1, 2, 0, 1, 2, 3, 4, 5, 6] {
        loader.request(i).unwrap();
    }
    store.take_hints();

    loader.request(7).unwrap();
    assert_eq!(store.take_hints(), vec![8, 9]);
    assert_eq!(loader.usage_pattern(), UsagePattern::Sequential);
    assert!(loader.analyze_usage().confidence > 0.7);
    // Hints never count against the budget.
    assert_eq!(loader.state(8), Some(LayerState::Unloaded));
    assert_eq!(loader.current_memory(), 8 * MB);
}

#[test]
fn short_history_prefetches_next_layer_only() {
    let (_dir, store, loader) = recording_loader(4, 4 * MB);
    loader.request(0).unwrap();
    assert_eq!(loader.usage_pattern(), UsagePattern::Unknown);
    assert_eq!(store.take_hints(), vec![1]);

    loader.request(3).unwrap();
    assert!(store.take_hints().is_empty());
}

#[test]
fn repeated_history_prefetches_hot_unloaded_layers() {
    let (_dir, _store, loader) = recording_loader(4, MB);
    request_all_generic(&loader, &[0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);

    assert_eq!(loader.usage_pattern(), UsagePattern::Repeated);
    assert_eq!(loader.loaded_layers(), vec![1]);
    assert_eq!(loader.layers_to_preload(1), vec![0]);
}

#[test]
fn random_history_prefetches_nothing() {
    let (_dir, store, loader) = recording_loader(10, 10 * MB);
    request_all_generic(&loader, &[0, 5, 2, 7, 3, 9, 1, 8, 4, 6]);
    assert_eq!(loader.usage_pattern(), UsagePattern::Random);
    store.take_hints();

    loader.request(2).unwrap();
    assert!(store.take_hints().is_empty());
}

#[test]
fn disabled_prefetch_sends_no_hints() {
    let (_dir, store, loader) = recording_loader(4, 4 * MB);
    loader.set_prefetch_enabled(false);
    loader.request(0).unwrap();
    assert!(store.take_hints().is_empty());
    assert_eq!(loader.memory_stats().prefetches_issued, 0);
}

#[test]
fn prefetch_the_store_cannot_fit_is_counted_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB; 3]);
    let cramped = MmapConfig { max_cache_size: MB + MB / 2, prefetch_enabled: false, ..Default::default() };
    let store = Arc::new(MappedModel::open(&path, cramped).unwrap());
    let loader = ProgressiveLoader::from_store(Arc::clone(&store), ProgressiveConfig::default()).unwrap();

    // Layer 0 stays pinned, so the hint for layer 1 has nowhere to go.
    loader.request(0).unwrap();
    let stats = loader.memory_stats();
    assert_eq!(stats.prefetches_issued, 1);
    assert_eq!(stats.prefetch_failures, 1);
    assert!(!store.is_cached(1));
    assert_eq!(loader.state(1), Some(LayerState::Unloaded));
}

#[test]
fn hint_is_served_before_request_returns_without_workers() {
    let (_dir, loader) = ten_layer_loader(10 * MB, PriorityStrategy::Lru);
    loader.request(0).unwrap();
    // The hint was served synchronously and the layer is back to Unloaded.
    assert!(loader.store().is_cached(1));
    assert_eq!(loader.state(1), Some(LayerState::Unloaded));
    assert_eq!(loader.memory_stats().prefetch_failures, 0);
    assert_eq!(loader.current_memory(), MB);
}

#[test]
fn prefetch_width_can_be_narrowed_at_runtime() {
    let (_dir, store, loader) = recording_loader(10, 10 * MB);
    request_all_generic(&loader, &[0, 1, 2, 0, 1, 2, 3, 4, 5, 6]);
    store.take_hints();

    loader.set_max_prefetch_layers(1);
    loader.request(7).unwrap();
    assert_eq!(store.take_hints(), vec![8]);

    loader.set_max_prefetch_layers(0);
    assert_eq!(loader.config().max_prefetch_layers, 0);
    loader.request(8).unwrap();
    assert!(store.take_hints().is_empty());
    assert_eq!(loader.usage_pattern(), UsagePattern::Sequential);
}

#[test]
fn smaller_history_window_reclassifies_recent_accesses() {
    let (_dir, _store, loader) = recording_loader(10, 10 * MB);
    request_all_generic(&loader, &[9, 8, 7, 6, 5, 0, 1, 2, 3, 4]);
    assert_eq!(loader.usage_pattern(), UsagePattern::Random);

    let mut narrow = loader.config();
    narrow.history_size = 5;
    loader.set_config(narrow).unwrap();
    assert_eq!(loader.usage_pattern(), UsagePattern::Sequential);
    assert_eq!(loader.loaded_layers().len(), 10);
}

#[test]
fn disabling_tracking_through_config_drops_history() {
    let (_dir, _store, loader) = recording_loader(4, 4 * MB);
    request_all_generic(&loader, &[0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
    loader.add_dependency(3, 2).unwrap();
    assert_ne!(loader.usage_pattern(), UsagePattern::Unknown);

    let mut off = loader.config();
    off.enable_dependency_tracking = false;
    loader.set_config(off.clone()).unwrap();
    assert_eq!(loader.usage_pattern(), UsagePattern::Unknown);
    assert!(matches!(
        loader.add_dependency(1, 0),
        Err(TinyAiError::DependencyTrackingDisabled)
    ));
    assert_eq!(loader.dependencies(3), vec![2]);

    off.enable_dependency_tracking = true;
    loader.set_config(off).unwrap();
    assert_eq!(loader.usage_pattern(), UsagePattern::Unknown, "history starts empty again");
}

fn request_all_generic<S: WeightStore>(loader: &ProgressiveLoader<S>, layers: &[usize]) {
    for &i in layers {
        loader.request(i).unwrap();
    }
}

// ── budget changes, clear, reset ────────────────────────────────────────────

fn three_layer_loader(cfg: impl FnOnce(&mut ProgressiveConfig)) -> (TempDir, ProgressiveLoader) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB, 2 * MB, 2 * MB]);
    let mut config = config(8 * MB, PriorityStrategy::Lru);
    cfg(&mut config);
    let loader = ProgressiveLoader::from_store(quiet_store(&path), config).unwrap();
    request_all(&loader, &[0, 1, 2]);
    assert_eq!(loader.current_memory(), 5 * MB);
    (dir, loader)
}

#[test]
fn shrinking_budget_unloads_largest_first() {
    let (_dir, loader) = three_layer_loader(|_| {});
    loader.set_budget(2 * MB).unwrap();
    assert_eq!(loader.loaded_layers(), vec![0]);
    assert_eq!(loader.current_memory(), MB);
    assert_eq!(loader.budget(), 2 * MB);
}

#[test]
fn shrinking_budget_fails_without_changes_when_unreachable() {
    let (_dir, loader) = three_layer_loader(|c| c.enable_layer_unloading = false);
    let err = loader.set_budget(2 * MB).unwrap_err();
    assert!(matches!(err, TinyAiError::BudgetExhausted { .. }));
    assert_eq!(loader.loaded_layers(), vec![0, 1, 2]);
    assert_eq!(loader.budget(), 8 * MB);
}

#[test]
fn shrinking_budget_respects_dependencies() {
    let (_dir, loader) = three_layer_loader(|_| {});
    loader.add_dependency(0, 1).unwrap();
    loader.add_dependency(0, 2).unwrap();
    // Only layer 0 is unloadable at first; after it goes both others free up.
    loader.set_budget(2 * MB).unwrap();
    assert_eq!(loader.current_memory(), 2 * MB);
    assert_eq!(loader.loaded_layers(), vec![2]);
}

#[test]
fn replacing_config_with_smaller_budget_unloads_largest_first() {
    let (_dir, loader) = three_layer_loader(|_| {});
    let mut smaller = loader.config();
    smaller.max_memory_budget = 2 * MB;
    smaller.priority_strategy = PriorityStrategy::Mfu;
    loader.set_config(smaller).unwrap();
    assert_eq!(loader.loaded_layers(), vec![0]);
    assert_eq!(loader.budget(), 2 * MB);
    assert_eq!(loader.config().priority_strategy, PriorityStrategy::Mfu);
    assert_eq!(loader.memory_stats().evictions, 2);
}

#[test]
fn rejected_config_changes_nothing() {
    let (_dir, loader) = three_layer_loader(|_| {});
    let before = loader.config();

    let mut invalid = before.clone();
    invalid.history_size = 1;
    assert!(matches!(loader.set_config(invalid), Err(TinyAiError::InvalidConfig(_))));

    let mut unreachable = before.clone();
    unreachable.max_memory_budget = 2 * MB;
    unreachable.enable_layer_unloading = false;
    unreachable.priority_strategy = PriorityStrategy::Fifo;
    let err = loader.set_config(unreachable).unwrap_err();
    assert!(matches!(err, TinyAiError::BudgetExhausted { .. }));

    assert_eq!(loader.config(), before);
    assert_eq!(loader.loaded_layers(), vec![0, 1, 2]);
}

#[test]
fn zero_budget_is_invalid() {
    let (_dir, loader) = three_layer_loader(|_| {});
    assert!(matches!(loader.set_budget(0), Err(TinyAiError::InvalidConfig(_))));
}

#[test]
fn clear_unloads_dependents_before_dependencies() {
    let (_dir, loader) = chain_loader(3 * MB);
    loader.request(0).unwrap();
    assert!(loader.clear());
    assert!(loader.loaded_layers().is_empty());
    assert_eq!(loader.current_memory(), 0);
    assert_eq!(loader.store().memory_usage(), 0);
}

#[test]
fn reset_keeps_graph_and_zeroes_statistics() {
    let (_dir, loader) = chain_loader(3 * MB);
    loader.request(0).unwrap();
    loader.request(0).unwrap();
    loader.reset();

    let stats = loader.memory_stats();
    assert_eq!(stats.current, 0);
    assert_eq!(stats.access_counter, 0);
    assert!(stats.layers.iter().all(|l| l.access_count == 0 && l.load_count == 0));
    assert_eq!(loader.usage_pattern(), UsagePattern::Unknown);
    assert_eq!(loader.dependencies(0), vec![1]);

    loader.request(0).unwrap();
    assert_eq!(loader.loaded_layers(), vec![0, 1, 2]);
}

#[test]
fn preload_reports_partial_failure() {
    let (_dir, loader) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    assert!(loader.preload_layers(&[0, 1]));
    assert!(!loader.preload_layers(&[2, 42]));
    assert_eq!(loader.loaded_layers(), vec![0, 1, 2]);
}

// ── priorities & statistics ─────────────────────────────────────────────────

#[test]
fn optimize_switches_to_custom_and_forwards_priorities() {
    let (_dir, loader) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    loader.add_dependency(1, 0).unwrap();
    request_all(&loader, &[1, 1, 2]);
    loader.optimize();

    assert_eq!(loader.config().priority_strategy, PriorityStrategy::Custom);
    let stats = loader.memory_stats();
    for layer in &stats.layers {
        assert_eq!(loader.store().priority(layer.index), Some(layer.custom_priority));
    }
    // Layer 1 was requested most often; layer 9 never.
    assert!(stats.layers[1].custom_priority > stats.layers[9].custom_priority);
    assert_eq!(stats.layers[9].custom_priority, 0.0);
}

#[test]
fn access_statistics_are_monotone() {
    let (_dir, loader) = ten_layer_loader(3 * MB, PriorityStrategy::Lru);
    let mut last = (0, 0);
    for &i in &[4, 1, 4, 2, 4] {
        loader.request(i).unwrap();
        let layer = &loader.memory_stats().layers[4];
        let now = (layer.access_count, layer.last_access);
        assert!(now.0 >= last.0 && now.1 >= last.1);
        last = now;
    }
    let stats = loader.memory_stats();
    assert_eq!(stats.layers[4].access_count, 3);
    assert_eq!(stats.layers[4].load_count, 1);
    assert_eq!(stats.access_counter, 5);
    assert_eq!(stats.peak, 3 * MB);
    assert!((stats.utilization() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn dropping_loader_then_store_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[MB; 6]);
    let store = quiet_store(&path);
    let loader =
        ProgressiveLoader::from_store(Arc::clone(&store), config(3 * MB, PriorityStrategy::Lru))
            .unwrap();
    request_all(&loader, &[0, 1, 2, 3]);
    assert!(store.memory_usage() > 0);

    drop(loader);
    assert_eq!(store.memory_usage(), 0);
    assert!(store.cached_layers().is_empty());
}

#[test]
fn debug_reports_budget_and_residency() {
    let (_dir, loader) = three_layer_loader(|_| {});
    let shown = format!("{loader:?}");
    assert!(shown.starts_with("ProgressiveLoader"));
    assert!(shown.contains("layers: 3"));
    assert!(shown.contains(&format!("current_memory: {}", 5 * MB)));
    assert!(shown.contains("loaded: 3"));
}

#[test]
fn bad_magic_is_invalid_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[4096; 2]);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[..4].copy_from_slice(b"GGUF");
    std::fs::write(&path, bytes).unwrap();

    let err = ProgressiveLoader::open(&path, ProgressiveConfig::default()).err().unwrap();
    assert!(matches!(err, TinyAiError::InvalidFormat(_)));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(&dir, &[4096; 2]);
    let cfg = ProgressiveConfig { cache_alignment: 48, ..Default::default() };
    assert!(matches!(
        ProgressiveLoader::from_store(quiet_store(&path), cfg),
        Err(TinyAiError::InvalidConfig(_))
    ));
}
