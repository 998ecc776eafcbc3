//! Background prefetch workers.
//!
//! Each worker alternates between a sweep over every layer index, filling
//! only free cache space, and a short wait on the hint channel. Hints sent
//! through [`PrefetchWorkers::schedule`] are served with the evicting
//! prefetch path. Pinned entries are never touched by either path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tinyai_common::{Result, TinyAiError};
use tracing::{debug, trace};

use crate::model::Shared;

/// Pause between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct PrefetchWorkers {
    sender: Option<Sender<usize>>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl PrefetchWorkers {
    pub(crate) fn spawn(shared: &Arc<Shared>, count: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Self { sender: Some(sender), stop, handles: Vec::with_capacity(count) };
        for id in 0..count {
            let shared = Arc::clone(shared);
            let receiver = Arc::clone(&receiver);
            let stop = Arc::clone(&workers.stop);
            let spawned = thread::Builder::new()
                .name(format!("tinyai-prefetch-{id}"))
                .spawn(move || run(id, &shared, &receiver, &stop));
            match spawned {
                Ok(handle) => workers.handles.push(handle),
                Err(e) => {
                    workers.shutdown();
                    return Err(TinyAiError::Io(e));
                }
            }
        }
        debug!(count, "started prefetch workers");
        Ok(workers)
    }

    pub(crate) fn schedule(&self, index: usize) -> Result<()> {
        self.sender
            .as_ref()
            .and_then(|s| s.send(index).ok())
            .ok_or(TinyAiError::PrefetchDisabled)
    }

    /// Signal every worker to stop and wait for all of them.
    pub(crate) fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        self.sender = None;
        let count = self.handles.len();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!(count, "stopped prefetch workers");
    }
}

fn run(id: usize, shared: &Shared, hints: &Mutex<Receiver<usize>>, stop: &AtomicBool) {
    trace!(worker = id, "prefetch worker running");
    loop {
        for index in 0..shared.layer_count() {
            if stop.load(Ordering::Acquire) {
                return;
            }
            shared.sweep_fill(index);
        }

        let hint = hints.lock().unwrap_or_else(PoisonError::into_inner).recv_timeout(SWEEP_INTERVAL);
        match hint {
            Ok(index) => {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                shared.prefetch(index);
                trace!(worker = id, index, "served prefetch hint");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
