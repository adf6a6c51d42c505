// THEORY:
// The session is the on/off switch of the scanner. It owns nothing the frame worker
// computes; it only publishes two facts the worker checks at the top of every frame:
// "are we running" and "which run is this".
//
// Key architectural principles:
// 1.  **Stopped First**: `stop()` sets the stopped flag before anything else. The frame
//     pipeline reads that flag before doing any work, so no frame delivered after
//     `stop()` returns produces output or events.
// 2.  **Generations Instead of Resets**: `start()` does not reach into the worker to
//     clear its state. It bumps a generation counter, and the worker resets itself the
//     first time it sees a new value. All hot-path state stays owned by one context.
// 3.  **Idempotent Control**: Stopping twice is harmless. Starting while running is a
//     clean restart.

use crate::core_modules::cadence::CadenceGate;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;

/// The two facts shared with the frame worker.
#[derive(Debug)]
pub struct SessionState {
    stopped: AtomicBool,
    generation: AtomicU64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            stopped: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        }
    }
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True while `generation` is the run in progress.
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation() == generation
    }

    fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stopped.store(false, Ordering::SeqCst);
        generation
    }

    /// Returns whether the session was running.
    fn end(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }
}

/// Starts and stops a scanning session and its detection timer.
#[derive(Debug)]
pub struct Session {
    state: Arc<SessionState>,
    cadence: CadenceGate,
    detection_interval: Duration,
    runtime: Handle,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(runtime: Handle, cadence: CadenceGate, detection_interval: Duration) -> Self {
        Self {
            state: Arc::new(SessionState::default()),
            cadence,
            detection_interval,
            runtime,
            timer: Mutex::new(None),
        }
    }

    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Begins a new run. The first frame of the run always gets a detection pass.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        self.cadence.mark_due();
        let generation = self.state.begin();
        *timer = Some(self.cadence.spawn_timer(&self.runtime, self.detection_interval));
        info!(generation, interval_ms = self.detection_interval.as_millis() as u64, "scanning session started");
    }

    /// Stops the run. Safe to call any number of times.
    pub fn stop(&self) {
        let was_running = self.state.end();
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        if was_running {
            info!(generation = self.state.generation(), "scanning session stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}
