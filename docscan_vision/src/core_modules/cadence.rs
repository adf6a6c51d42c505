// THEORY:
// Detection is the most expensive thing a frame can ask for, and a page held in front
// of a camera does not move much in half a second. The cadence gate decouples the two
// rates: a timer marks detection as "due" at a fixed interval, and the frame worker
// consumes that mark the next time a frame arrives. Frames in between reuse the last
// result.
//
// Key architectural principles:
// 1.  **One Flag**: The gate is a single `AtomicBool`. It is the only mutable state
//     written by one context (the timer) and read by another (the frame worker) on the
//     hot path. All accesses are `SeqCst`.
// 2.  **Consume, Don't Count**: `take_due` swaps the flag back to false. Several ticks
//     between two frames collapse into one detection pass, and a tick that lands mid-pass
//     simply schedules the next one. Lost or merged ticks are fine; torn reads are not.
// 3.  **Timer is Disposable**: The timer task holds only a clone of the flag. Aborting
//     its `JoinHandle` is all it takes to stop it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::trace;

/// Shared "a fresh detection pass is due" flag.
#[derive(Debug, Clone, Default)]
pub struct CadenceGate {
    due: Arc<AtomicBool>,
}

impl CadenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a detection pass as due.
    pub fn mark_due(&self) {
        self.due.store(true, Ordering::SeqCst);
    }

    /// Returns whether a pass was due and clears the flag in the same step.
    pub fn take_due(&self) -> bool {
        self.due.swap(false, Ordering::SeqCst)
    }

    pub fn is_due(&self) -> bool {
        self.due.load(Ordering::SeqCst)
    }

    /// Spawns a task on `runtime` that marks the gate due every `period`.
    ///
    /// The first mark happens immediately. Ticks missed while the runtime was busy are
    /// skipped rather than replayed in a burst.
    pub fn spawn_timer(&self, runtime: &Handle, period: Duration) -> JoinHandle<()> {
        let gate = self.clone();
        runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                trace!("detection due");
                gate.mark_due();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_the_mark() {
        let gate = CadenceGate::new();
        assert!(!gate.take_due());
        gate.mark_due();
        gate.mark_due();
        assert!(gate.is_due());
        assert!(gate.take_due());
        assert!(!gate.take_due());
    }

    #[test]
    fn clones_share_the_flag() {
        let gate = CadenceGate::new();
        let timer_side = gate.clone();
        timer_side.mark_due();
        assert!(gate.take_due());
        assert!(!timer_side.is_due());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_marks_once_per_period() {
        let gate = CadenceGate::new();
        let handle = gate.spawn_timer(&Handle::current(), Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(gate.take_due(), "first tick is immediate");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!gate.take_due());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(gate.take_due());

        handle.abort();
        let _ = handle.await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!gate.is_due(), "aborted timer no longer ticks");
    }
}
