//! Latest-value pipeline stage.
//!
//! A [`Stage`] runs a producer closure on its own OS thread and keeps only
//! the newest completed output available for its single consumer. There is
//! no queue: when a new output lands while the previous one was never
//! claimed, the previous one is released back to its origin on the spot.
//!
//! The producer thread lives for the whole lifetime of the stage and is
//! gated by an `active` flag, so stopping and restarting a stage never
//! recreates the thread. Three output slots exist at any instant: the
//! *active* one being filled by the producer, the *ready* one waiting under
//! the output lock, and the *available* one currently held by the consumer.
//! Slot transitions are handle swaps, never buffer copies.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use crate::error::StageError;

/// Release routing for outputs leaving the stage: unclaimed ready values and
/// frames handed back by the consumer both go through this.
pub type ReleaseFn<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Lifecycle hooks run on the caller's thread by `start`/`stop`, never on
/// the producer thread.
pub struct StageHooks {
    pub on_start: Box<dyn FnMut() -> Result<(), StageError> + Send>,
    pub on_stop: Box<dyn FnMut() + Send>,
}

impl Default for StageHooks {
    fn default() -> Self {
        Self {
            on_start: Box::new(|| Ok(())),
            on_stop: Box::new(|| {}),
        }
    }
}

#[derive(Default)]
struct StageStats {
    produced: AtomicU64,
    dropped: AtomicU64,
}

struct Shared<T> {
    name: String,

    /// The ready slot. Held only for swaps.
    ready: Mutex<Option<T>>,
    output_cv: Condvar,

    /// Parks the producer thread while the stage is inactive.
    gate: Mutex<()>,
    gate_cv: Condvar,

    /// Held by the producer for the duration of one production call;
    /// `stop` acquires it to wait out an in-flight call.
    busy: Mutex<()>,

    active: AtomicBool,
    alive: AtomicBool,

    /// Bumped by `start`; the producer thread reinitializes its active slot
    /// when it observes a new epoch.
    epoch: AtomicU64,

    release: ReleaseFn<T>,

    stats: CachePadded<StageStats>,
}

impl<T> Shared<T> {
    fn publish(&self, produced: T) {
        let stale = self.ready.lock().unwrap().replace(produced);
        if let Some(stale) = stale {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("stage_outputs_dropped").increment(1);
            (self.release)(stale);
        }
        self.stats.produced.fetch_add(1, Ordering::Relaxed);
        self.output_cv.notify_all();
    }
}

/// Consumer-side handle to a stage, cloned into whoever pulls from it
/// (the next stage in a chain, or the display loop).
pub struct StageOutput<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StageOutput<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> StageOutput<T> {
    /// Block until an output is ready or the stage is torn down.
    ///
    /// `None` is the teardown sentinel: a consumer blocked here is always
    /// woken when the stage is dropped and must not treat it as an error.
    pub fn get_output_blocking(&self) -> Option<T> {
        let s = &self.shared;
        let guard = s.ready.lock().unwrap();
        let mut guard = s
            .output_cv
            .wait_while(guard, |ready| {
                ready.is_none() && s.alive.load(Ordering::Acquire)
            })
            .unwrap();
        guard.take()
    }

    /// Claim the ready output if one exists, without blocking.
    pub fn get_output_nonblocking(&self) -> Option<T> {
        self.shared.ready.lock().unwrap().take()
    }

    /// Hand a claimed output back to its producer.
    pub fn return_output(&self, output: T) {
        (self.shared.release)(output);
    }
}

/// Owning side of a stage. Dropping it wakes any blocked consumer and joins
/// the producer thread.
pub struct Stage<T> {
    shared: Arc<Shared<T>>,
    hooks: StageHooks,
    thread: Option<JoinHandle<()>>,
}

impl<T: Default + Send + 'static> Stage<T> {
    /// Stage with no lifecycle hooks whose outputs are released by dropping.
    pub fn new<F>(name: impl Into<String>, produce: F) -> Self
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        Self::with_parts(name, produce, Arc::new(drop), StageHooks::default())
    }

    /// Spawns the producer thread immediately; production stays gated until
    /// [`Stage::start`].
    pub fn with_parts<F>(
        name: impl Into<String>,
        mut produce: F,
        release: ReleaseFn<T>,
        hooks: StageHooks,
    ) -> Self
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.into(),
            ready: Mutex::new(None),
            output_cv: Condvar::new(),
            gate: Mutex::new(()),
            gate_cv: Condvar::new(),
            busy: Mutex::new(()),
            active: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
            release,
            stats: CachePadded::new(StageStats::default()),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("stage-{}", shared.name))
                .spawn(move || {
                    let mut slot = T::default();
                    let mut seen_epoch = 0u64;

                    loop {
                        {
                            let guard = shared.gate.lock().unwrap();
                            let _guard = shared
                                .gate_cv
                                .wait_while(guard, |_| {
                                    !shared.active.load(Ordering::Acquire)
                                        && shared.alive.load(Ordering::Acquire)
                                })
                                .unwrap();
                        }
                        if !shared.alive.load(Ordering::Acquire) {
                            break;
                        }

                        let epoch = shared.epoch.load(Ordering::Acquire);
                        if epoch != seen_epoch {
                            seen_epoch = epoch;
                            slot = T::default();
                        }

                        {
                            let _busy = shared.busy.lock().unwrap();
                            // Re-checked under the busy lock so that `stop`
                            // excludes production once it has the lock.
                            if !shared.active.load(Ordering::Acquire) {
                                continue;
                            }
                            produce(&mut slot);
                        }

                        shared.publish(std::mem::take(&mut slot));

                        thread::sleep(Duration::from_millis(1));
                    }

                    // Last unclaimed output still owes a release.
                    let stale = shared.ready.lock().unwrap().take();
                    if let Some(stale) = stale {
                        (shared.release)(stale);
                    }
                    trace!(stage = %shared.name, "producer thread exiting");
                })
                .expect("failed to spawn stage thread")
        };

        Self {
            shared,
            hooks,
            thread: Some(thread),
        }
    }

    /// Run the start hook, reset the output slots and release the producer.
    ///
    /// Precondition: the stage is not already started. Calling `start` twice
    /// without an intervening `stop` is undocumented behavior and is not
    /// guarded against.
    pub fn start(&mut self) -> Result<(), StageError> {
        (self.hooks.on_start)()?;

        let stale = self.shared.ready.lock().unwrap().take();
        if let Some(stale) = stale {
            (self.shared.release)(stale);
        }
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);

        self.shared.active.store(true, Ordering::Release);
        let _gate = self.shared.gate.lock().unwrap();
        self.shared.gate_cv.notify_all();
        debug!(stage = %self.shared.name, "started");
        Ok(())
    }

    /// Gate off production, wait out any in-flight production call, then run
    /// the stop hook. The hook never races a live production call.
    pub fn stop(&mut self) {
        self.shared.active.store(false, Ordering::Release);
        let _busy = self.shared.busy.lock().unwrap();
        (self.hooks.on_stop)();
        debug!(stage = %self.shared.name, "stopped");
    }

    pub fn output(&self) -> StageOutput<T> {
        StageOutput {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn get_output_blocking(&self) -> Option<T> {
        self.output().get_output_blocking()
    }

    pub fn get_output_nonblocking(&self) -> Option<T> {
        self.output().get_output_nonblocking()
    }

    pub fn return_output(&self, output: T) {
        (self.shared.release)(output);
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// (produced, dropped) counters since construction.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.shared.stats.produced.load(Ordering::Relaxed),
            self.shared.stats.dropped.load(Ordering::Relaxed),
        )
    }
}

/// Object-safe lifecycle view of a stage, letting a chain of stages with
/// different output types be started and stopped as a unit.
pub trait StageControl {
    fn start_stage(&mut self) -> Result<(), StageError>;
    fn stop_stage(&mut self);
}

impl<T: Default + Send + 'static> StageControl for Stage<T> {
    fn start_stage(&mut self) -> Result<(), StageError> {
        self.start()
    }

    fn stop_stage(&mut self) {
        self.stop();
    }
}

impl<T> Drop for Stage<T> {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        // Lock-then-notify so a waiter between its predicate check and its
        // wait cannot miss the wakeup.
        drop(self.shared.ready.lock().unwrap());
        self.shared.output_cv.notify_all();
        drop(self.shared.gate.lock().unwrap());
        self.shared.gate_cv.notify_all();

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
