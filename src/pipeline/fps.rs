//! Per-second frame rate counter.
//!
//! Producers call [`FpsCounter::record_frame`] from the hot path; it is a
//! single atomic increment. A dedicated timer thread wakes once per second,
//! exchanges the running counter for zero and publishes the old value as the
//! rate. Whole-second resolution, no smoothing.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct FpsShared {
    frames: AtomicU32,
    rate: AtomicU32,
    alive: AtomicBool,
    tick: Mutex<()>,
    tick_cv: Condvar,
}

pub struct FpsCounter {
    shared: Arc<FpsShared>,
    thread: Option<JoinHandle<()>>,
}

impl FpsCounter {
    pub fn new() -> Self {
        let shared = Arc::new(FpsShared {
            frames: AtomicU32::new(0),
            rate: AtomicU32::new(0),
            alive: AtomicBool::new(true),
            tick: Mutex::new(()),
            tick_cv: Condvar::new(),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("fps-counter".into())
                .spawn(move || {
                    while shared.alive.load(Ordering::Acquire) {
                        let guard = shared.tick.lock().unwrap();
                        // Interruptible one-second tick.
                        let _guard = shared
                            .tick_cv
                            .wait_timeout(guard, Duration::from_secs(1))
                            .unwrap();

                        let count = shared.frames.swap(0, Ordering::AcqRel);
                        shared.rate.store(count, Ordering::Release);
                    }
                })
                .expect("failed to spawn fps thread")
        };

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Count one frame. Lock-free, callable from any thread.
    pub fn record_frame(&self) {
        self.shared.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Rate captured at the last one-second tick.
    pub fn rate(&self) -> u32 {
        self.shared.rate.load(Ordering::Acquire)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FpsCounter {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        drop(self.shared.tick.lock().unwrap());
        self.shared.tick_cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_is_zero_before_first_tick() {
        let fps = FpsCounter::new();
        fps.record_frame();
        assert_eq!(fps.rate(), 0);
    }

    #[test]
    fn rate_reflects_one_second_window() {
        let fps = FpsCounter::new();
        for _ in 0..30 {
            fps.record_frame();
        }
        thread::sleep(Duration::from_millis(1200));
        assert_eq!(fps.rate(), 30);
        // Counter was reset at the tick; next window starts empty.
        thread::sleep(Duration::from_millis(1100));
        assert_eq!(fps.rate(), 0);
    }

    #[test]
    fn drop_interrupts_the_timer_promptly() {
        let fps = FpsCounter::new();
        let begin = std::time::Instant::now();
        drop(fps);
        assert!(begin.elapsed() < Duration::from_secs(1));
    }
}
