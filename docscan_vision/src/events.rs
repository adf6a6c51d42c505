// THEORY:
// Observers live on the presentation side and must never slow down the frame worker.
// Every notification is therefore a message: the frame worker pushes a `ScanEvent` into
// an unbounded channel and moves on, and a single dispatcher task drains the channel
// and calls the observer.
//
// Key architectural principles:
// 1.  **Fire-and-Forget**: `EventSender::emit` never blocks and never fails. If nobody is
//     listening any more the event is dropped.
// 2.  **FIFO**: One channel, one consumer. Events reach the observer in emission order
//     and the observer is never called concurrently with itself.
// 3.  **Closed Set**: There are exactly three things an observer can be told, modelled as
//     one enum so that adding a new presentation mechanism is one `match`.
//
// The channel has no capacity limit. Its backlog is bounded only by the dispatcher
// draining it; an observer that stalls lets queued events (artifacts included) pile up.

use crate::core_modules::capture::Artifact;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// A notification for the presentation context.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A page is in view; `confidence` is the score after this frame.
    RectangleDetected { confidence: u32 },
    /// The upper threshold was crossed and the automatic capture resolved.
    /// `artifact` is `None` when the capture was rejected or failed.
    FullConfidence { artifact: Option<Arc<Artifact>> },
    /// No page in view this frame.
    ConfidenceLost,
}

/// Receives scanner notifications on the presentation context.
pub trait ScanObserver: Send + 'static {
    fn on_rectangle_detected(&mut self, _confidence: u32) {}

    fn on_full_confidence(&mut self, _artifact: Option<Arc<Artifact>>) {}

    fn on_confidence_lost(&mut self) {}
}

/// The producing half of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<ScanEvent>,
}

pub type EventReceiver = UnboundedReceiver<ScanEvent>;

/// Creates a connected sender/receiver pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    pub fn emit(&self, event: ScanEvent) {
        // A closed receiver only means nobody is watching.
        let _ = self.tx.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawns the presentation loop that forwards every event to `observer`.
///
/// The task ends once every `EventSender` has been dropped.
pub fn spawn_dispatcher<O>(runtime: &Handle, mut receiver: EventReceiver, mut observer: O) -> JoinHandle<()>
where
    O: ScanObserver,
{
    runtime.spawn(async move {
        while let Some(event) = receiver.recv().await {
            match event {
                ScanEvent::RectangleDetected { confidence } => observer.on_rectangle_detected(confidence),
                ScanEvent::FullConfidence { artifact } => observer.on_full_confidence(artifact),
                ScanEvent::ConfidenceLost => observer.on_confidence_lost(),
            }
        }
        debug!("event dispatcher finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl ScanObserver for Log {
        fn on_rectangle_detected(&mut self, confidence: u32) {
            self.0.lock().push(format!("rect:{confidence}"));
        }

        fn on_full_confidence(&mut self, artifact: Option<Arc<Artifact>>) {
            self.0.lock().push(format!("full:{}", artifact.is_some()));
        }

        fn on_confidence_lost(&mut self) {
            self.0.lock().push("lost".to_string());
        }
    }

    #[tokio::test]
    async fn dispatcher_preserves_emission_order() {
        let (tx, rx) = event_channel();
        let log = Log::default();
        let dispatcher = spawn_dispatcher(&Handle::current(), rx, log.clone());

        for confidence in 1..=3 {
            tx.emit(ScanEvent::RectangleDetected { confidence });
        }
        tx.emit(ScanEvent::FullConfidence { artifact: None });
        tx.emit(ScanEvent::ConfidenceLost);
        drop(tx);

        dispatcher.await.expect("dispatcher");
        assert_eq!(*log.0.lock(), vec!["rect:1", "rect:2", "rect:3", "full:false", "lost"]);
    }

    #[test]
    fn emitting_into_a_closed_channel_is_silent() {
        let (tx, rx) = event_channel();
        drop(rx);
        assert!(tx.is_closed());
        tx.emit(ScanEvent::ConfidenceLost);
    }
}
