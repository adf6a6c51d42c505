// THEORY:
// `DocumentScanner` is the control surface: start, stop, capture on demand, and read
// what the live path last published. It is deliberately split from `FramePipeline`.
// Construction returns both halves; the pipeline is moved onto whatever thread or task
// delivers camera frames, and the scanner stays with the application.
//
// The two halves share only the session flags, the cadence flag, the capture
// coordinator and a `watch` channel. None of these is ever locked across a frame.

use crate::core_modules::cadence::CadenceGate;
use crate::core_modules::capture::{CaptureCoordinator, CaptureOutcome, RejectReason, StillCaptureDevice};
use crate::core_modules::detector::{DetectionStrategy, QuadDetector};
use crate::error::ScanError;
use crate::events::EventSender;
use crate::pipeline::{FramePipeline, LiveSnapshot, PipelineLinks, ScannerConfig};
use crate::session::Session;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use image::RgbaImage;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::info;

/// The application-side handle of a scanner.
#[derive(Debug)]
pub struct DocumentScanner {
    config: ScannerConfig,
    session: Session,
    coordinator: Arc<CaptureCoordinator>,
    live: watch::Receiver<LiveSnapshot>,
    /// Used only to clear the snapshot when a session starts.
    publisher: Arc<watch::Sender<LiveSnapshot>>,
}

impl DocumentScanner {
    /// Builds a stopped scanner and the frame pipeline that feeds it.
    ///
    /// Must be called from within a tokio runtime; the cadence timer and automatic
    /// captures are spawned onto it.
    pub fn new(
        config: ScannerConfig,
        detector: Arc<dyn QuadDetector>,
        device: Arc<dyn StillCaptureDevice>,
        events: EventSender,
    ) -> Result<(Self, FramePipeline), ScanError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ScanError::NoRuntime)?;

        let strategy = DetectionStrategy::new(config.detector_profile, detector);
        let cadence = CadenceGate::new();
        let session = Session::new(runtime.clone(), cadence.clone(), config.detection_interval());
        let coordinator = Arc::new(CaptureCoordinator::new(device, strategy.clone(), config.crop_margin));
        let (live_tx, live_rx) = watch::channel(LiveSnapshot::default());
        let publisher = Arc::new(live_tx);

        let pipeline = FramePipeline::new(PipelineLinks {
            config: config.clone(),
            strategy,
            cadence,
            session: session.state(),
            coordinator: Arc::clone(&coordinator),
            events,
            live: Arc::clone(&publisher),
            runtime,
        });

        info!(
            profile = ?config.detector_profile,
            filter = ?config.color_filter,
            upper_threshold = config.upper_threshold,
            "document scanner created"
        );

        let scanner = Self {
            config,
            session,
            coordinator,
            live: live_rx,
            publisher,
        };
        Ok((scanner, pipeline))
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Starts (or restarts) scanning. All live state is reset.
    pub fn start(&self) {
        // The generation moves first: the pipeline drops any publish from an older
        // generation, so nothing stale can land after this reset.
        self.session.start();
        self.publisher.send_replace(LiveSnapshot::default());
    }

    /// Stops scanning. Idempotent; an in-flight capture is left to finish unobserved.
    pub fn stop(&self) {
        self.session.stop();
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn is_capturing(&self) -> bool {
        self.coordinator.is_capturing()
    }

    /// The confidence score last published by the frame pipeline.
    pub fn confidence(&self) -> u32 {
        self.live.borrow().confidence
    }

    /// The most recent perspective-corrected live frame, if any.
    pub fn latest_corrected(&self) -> Option<Arc<RgbaImage>> {
        self.live.borrow().corrected.clone()
    }

    /// A receiver that is notified every time the live snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.clone()
    }

    /// Takes a still on demand through the same coordinator as automatic captures.
    pub fn capture(&self) -> BoxFuture<'static, CaptureOutcome> {
        if !self.session.is_running() {
            return future::ready(CaptureOutcome::Rejected(RejectReason::NotRunning)).boxed();
        }
        let context = self.config.capture_context(self.confidence());
        self.coordinator.request_capture(context)
    }
}
