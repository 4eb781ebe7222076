//! Barrier registry
//!
//! A barrier pins the bytes a reader may still reference. Readers acquire a
//! `Barrier` before dereferencing the first document pointer returned by a
//! lookup and drop it after the last result has been copied out.
//!
//! Barriers never block writers or the compactor from creating new data or
//! logically superseding old data. They only delay *physical* reclamation:
//! reclamation work is handed to `defer`, tagged with a new epoch, and runs
//! once no barrier created before that epoch is still alive.
//!
//! # Epochs
//!
//! ```text
//! acquire() ──► barrier @ epoch 4
//! defer(rm datafile-7)     epoch 4 → 5, work tagged 5
//! acquire() ──► barrier @ epoch 5   (does not block the work)
//! drop(barrier @ 4)  ──► work tagged 5 runs
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type Work = Box<dyn FnOnce() + Send>;

struct PendingReclaim {
    epoch: u64,
    label: String,
    work: Work,
}

#[derive(Default)]
struct RegistryState {
    epoch: u64,
    /// Live barrier count per epoch
    live: BTreeMap<u64, usize>,
    pending: Vec<PendingReclaim>,
}

impl RegistryState {
    fn oldest_live(&self) -> Option<u64> {
        self.live.keys().next().copied()
    }

    fn take_ready(&mut self) -> Vec<PendingReclaim> {
        let oldest = self.oldest_live();
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| oldest.map_or(true, |o| o >= p.epoch));
        self.pending = waiting;
        ready
    }
}

/// Per-collection registry of live barriers and deferred reclamation
pub struct BarrierRegistry {
    name: String,
    state: Mutex<RegistryState>,
    drained: Condvar,
}

impl BarrierRegistry {
    /// Create a registry; `name` is used in log output
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(RegistryState::default()),
            drained: Condvar::new(),
        })
    }

    /// Register a barrier valid from now until it is dropped
    pub fn acquire(self: &Arc<Self>) -> Barrier {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        *state.live.entry(epoch).or_insert(0) += 1;
        Barrier {
            registry: Arc::clone(self),
            epoch,
        }
    }

    /// Run `work` once every barrier alive right now has been released
    ///
    /// Runs immediately (on the calling thread) when no barrier is alive.
    /// Otherwise the work runs on the thread releasing the last blocking
    /// barrier.
    pub fn defer(&self, label: impl Into<String>, work: impl FnOnce() + Send + 'static) {
        let label = label.into();
        let mut state = self.state.lock();
        state.epoch += 1;
        let epoch = state.epoch;
        if state.oldest_live().map_or(true, |o| o >= epoch) {
            drop(state);
            debug!(target: "shoal::barrier", registry = %self.name, work = %label, "Reclaiming immediately");
            work();
            return;
        }
        debug!(target: "shoal::barrier", registry = %self.name, work = %label, epoch, "Deferring reclamation");
        state.pending.push(PendingReclaim {
            epoch,
            label,
            work: Box::new(work),
        });
    }

    fn release(&self, epoch: u64) {
        let mut state = self.state.lock();
        if let Some(count) = state.live.get_mut(&epoch) {
            *count -= 1;
            if *count == 0 {
                state.live.remove(&epoch);
            }
        }
        let ready = state.take_ready();
        if state.live.is_empty() {
            self.drained.notify_all();
        }
        drop(state);

        for item in ready {
            debug!(target: "shoal::barrier", registry = %self.name, work = %item.label, "Running deferred reclamation");
            (item.work)();
        }
    }

    /// Number of live barriers
    pub fn len(&self) -> usize {
        self.state.lock().live.values().sum()
    }

    /// Whether no barrier is alive
    pub fn is_empty(&self) -> bool {
        self.state.lock().live.is_empty()
    }

    /// Number of deferred reclamations still waiting
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Block until no barrier is alive or `timeout` elapses
    ///
    /// Returns whether the registry drained.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.live.is_empty() {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                return state.live.is_empty();
            }
        }
        true
    }
}

impl Drop for BarrierRegistry {
    fn drop(&mut self) {
        // Every barrier holds an Arc to the registry, so none can be alive here.
        let pending = std::mem::take(&mut self.state.get_mut().pending);
        for item in pending {
            (item.work)();
        }
    }
}

impl fmt::Debug for BarrierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BarrierRegistry")
            .field("name", &self.name)
            .field("epoch", &state.epoch)
            .field("live", &state.live.values().sum::<usize>())
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// RAII guard pinning datafile bytes against reclamation
pub struct Barrier {
    registry: Arc<BarrierRegistry>,
    epoch: u64,
}

impl Barrier {
    /// Epoch the barrier was created in
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Registry the barrier belongs to
    pub fn registry(&self) -> &Arc<BarrierRegistry> {
        &self.registry
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        self.registry.release(self.epoch);
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier").field("epoch", &self.epoch).finish()
    }
}
