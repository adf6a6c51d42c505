// THEORY:
// The `pipeline` module is where the building blocks become a scanner. `FramePipeline`
// is handed every frame the camera delivers and returns the frame to display. Along
// the way it filters, decides whether a fresh detection is due, feeds the confidence
// tracker, and acts on its verdict.
//
// Key architectural principles:
// 1.  **Single Owner**: The pipeline is moved onto the frame-delivery worker and takes
//     `&mut self`. The tracker, the cached quad and the last output belong to it alone.
//     What the rest of the system sees is pushed out as messages (events), a replace-only
//     snapshot (`watch`), or a spawned capture.
// 2.  **Never Block the Frame**: Nothing in `process` waits. Detection is gated by the
//     cadence flag, events are fire-and-forget, and captures are spawned on the runtime.
// 3.  **Degrade, Don't Fail**: No quad, an empty detector result, or a degenerate
//     outline all just mean "no page this frame". The one real failure (a frame the
//     filter cannot touch) re-emits the previous output and leaves the tracker alone.
// 4.  **Stopped Is Silent**: The session flag is checked before anything else, so a
//     stopped scanner produces neither frames nor events.

use crate::core_modules::cadence::CadenceGate;
use crate::core_modules::capture::{CaptureContext, CaptureCoordinator};
use crate::core_modules::detector::DetectionStrategy;
use crate::core_modules::overlay::{draw_centroid, draw_focus_pulse, draw_highlight};
use crate::core_modules::perspective;
use crate::core_modules::tracker::{ConfidenceTracker, Decision, TrackerConfig, overlay_alpha};
use crate::error::ScanError;
use crate::events::{EventSender, ScanEvent};
use crate::session::SessionState;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::capture::{Artifact, CaptureOutcome, RejectReason, StillCaptureDevice};
pub use crate::core_modules::detector::{DetectorProfile, QuadDetector};
pub use crate::core_modules::filter::ColorFilter;
pub use crate::core_modules::overlay::OverlayStyle;
pub use crate::core_modules::quad::{Point, Quad};

/// Configuration for the scanner, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub color_filter: ColorFilter,
    pub detector_profile: DetectorProfile,
    pub overlay: OverlayStyle,
    /// When disabled, frames are only filtered: no detection, no tracking, no capture.
    pub border_detection: bool,
    pub draw_centroid: bool,
    /// Draw the focus square while a focus operation is believed to be running.
    pub show_focus_pulse: bool,
    /// Confidence from which frames are corrected and highlighted.
    pub lower_threshold: u32,
    /// Confidence at which an automatic capture fires.
    pub upper_threshold: u32,
    /// Confidence above which the camera is asked to focus on the page.
    pub focus_threshold: u32,
    /// Pixels trimmed from every edge of a captured artifact.
    pub crop_margin: u32,
    pub cooldown_ms: u64,
    pub detection_interval_ms: u64,
    pub focus_pulse_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            color_filter: ColorFilter::default(),
            detector_profile: DetectorProfile::default(),
            overlay: OverlayStyle::default(),
            border_detection: true,
            draw_centroid: false,
            show_focus_pulse: false,
            lower_threshold: 1,
            upper_threshold: 100,
            focus_threshold: 50,
            crop_margin: 20,
            cooldown_ms: 2000,
            detection_interval_ms: 500,
            focus_pulse_ms: 1000,
        }
    }
}

impl ScannerConfig {
    /// Parses and validates a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ScanError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.lower_threshold < 1 {
            return Err(ScanError::invalid_config("lower_threshold", "must be at least 1"));
        }
        if self.upper_threshold > 100 {
            return Err(ScanError::invalid_config("upper_threshold", "must not exceed 100"));
        }
        if self.lower_threshold > self.upper_threshold {
            return Err(ScanError::invalid_config(
                "lower_threshold",
                format!(
                    "{} is above upper_threshold {}",
                    self.lower_threshold, self.upper_threshold
                ),
            ));
        }
        if self.focus_threshold > 100 {
            return Err(ScanError::invalid_config("focus_threshold", "must not exceed 100"));
        }
        if self.detection_interval_ms == 0 {
            return Err(ScanError::invalid_config("detection_interval_ms", "must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.overlay.focus_alpha) {
            return Err(ScanError::invalid_config("overlay.focus_alpha", "must be within 0.0..=1.0"));
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            step: self.detector_profile.confidence_step(),
            upper_threshold: self.upper_threshold,
            focus_threshold: self.focus_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
            focus_pulse: Duration::from_millis(self.focus_pulse_ms),
        }
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    /// The capture context for a given live confidence.
    pub fn capture_context(&self, score: u32) -> CaptureContext {
        CaptureContext {
            filter: self.color_filter,
            border_detection: self.border_detection,
            score,
            lower_threshold: self.lower_threshold,
        }
    }
}

/// A frame as delivered by the camera.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub image: RgbaImage,
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn new(image: RgbaImage, timestamp: Instant) -> Self {
        Self { image, timestamp }
    }
}

/// The primary output of the pipeline for a single frame.
#[derive(Debug, Clone)]
pub struct CompositedFrame {
    pub image: Arc<RgbaImage>,
    pub timestamp: Instant,
    /// Confidence after this frame; `None` when no page was tracked.
    pub confidence: Option<u32>,
    /// The page outline used for this frame, in its pixel coordinates.
    pub quad: Option<Quad>,
}

/// What the live path publishes for other contexts to read.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    /// The most recent perspective-corrected frame of this session.
    pub corrected: Option<Arc<RgbaImage>>,
    /// The current confidence score.
    pub confidence: u32,
}

/// A camera that can be asked to focus on a point. Must return without waiting.
pub trait FocusControl: Send + Sync {
    fn focus_at(&self, point: Point);
}

/// Everything the pipeline shares with the scanner facade.
pub(crate) struct PipelineLinks {
    pub config: ScannerConfig,
    pub strategy: DetectionStrategy,
    pub cadence: CadenceGate,
    pub session: Arc<SessionState>,
    pub coordinator: Arc<CaptureCoordinator>,
    pub events: EventSender,
    pub live: Arc<watch::Sender<LiveSnapshot>>,
    pub runtime: Handle,
}

/// Per-frame orchestration. Lives on the frame-delivery worker.
pub struct FramePipeline {
    links: PipelineLinks,
    tracker: ConfidenceTracker,
    focus: Option<Arc<dyn FocusControl>>,
    /// The session generation this pipeline's state belongs to.
    generation: u64,
    /// The last detection result, reused between cadence ticks.
    cached_quad: Option<Quad>,
    /// Re-emitted when a frame cannot be processed.
    last_output: Option<CompositedFrame>,
}

impl FramePipeline {
    pub(crate) fn new(links: PipelineLinks) -> Self {
        let tracker = ConfidenceTracker::new(links.config.tracker_config());
        Self {
            links,
            tracker,
            focus: None,
            generation: 0,
            cached_quad: None,
            last_output: None,
        }
    }

    /// Installs the capability used when the tracker asks for focus.
    pub fn with_focus_control(mut self, focus: Arc<dyn FocusControl>) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.links.config
    }

    pub fn confidence(&self) -> u32 {
        self.tracker.score()
    }

    /// Processes one camera frame. Returns `None` while the scanner is stopped.
    pub fn process(&mut self, frame: RawFrame) -> Option<CompositedFrame> {
        if !self.links.session.is_running() {
            return None;
        }
        let generation = self.links.session.generation();
        if generation != self.generation {
            self.begin_generation(generation);
        }

        let RawFrame { image, timestamp } = frame;
        let filtered = match self.links.config.color_filter.apply(image) {
            Ok(filtered) => filtered,
            Err(err) => {
                warn!(%err, "frame could not be filtered, re-emitting previous output");
                return self.last_output.clone();
            }
        };

        let output = if self.links.config.border_detection {
            self.track(filtered, timestamp)
        } else {
            composite(filtered, timestamp, None, None)
        };
        self.last_output = Some(output.clone());
        Some(output)
    }

    fn begin_generation(&mut self, generation: u64) {
        debug!(generation, "new session, resetting frame state");
        self.generation = generation;
        self.tracker.reset();
        self.cached_quad = None;
        self.last_output = None;
        self.publish(|live| {
            *live = LiveSnapshot::default();
            true
        });
    }

    fn track(&mut self, filtered: RgbaImage, timestamp: Instant) -> CompositedFrame {
        if self.links.cadence.take_due() {
            self.cached_quad = self.links.strategy.detect_largest(&filtered);
            debug!(
                profile = ?self.links.strategy.profile(),
                found = self.cached_quad.is_some(),
                "detection pass"
            );
        }

        let quad = self.cached_quad;
        let decision = self.tracker.update(quad.as_ref(), timestamp);
        let (Some(quad), Some(tracking)) = (quad, decision.tracking()) else {
            self.publish_confidence(0);
            self.links.events.emit(ScanEvent::ConfidenceLost);
            return composite(filtered, timestamp, None, None);
        };

        let score = tracking.score;
        if tracking.start_focus {
            if let Some(focus) = &self.focus {
                focus.focus_at(quad.centroid());
            }
        }

        let image = if score >= self.links.config.lower_threshold {
            let corrected = Arc::new(perspective::correct(&filtered, &quad));
            self.publish(|live| {
                live.corrected = Some(corrected);
                live.confidence = score;
                true
            });
            self.render_overlay(filtered, &quad, score, timestamp)
        } else {
            self.publish_confidence(score);
            filtered
        };

        self.links.events.emit(ScanEvent::RectangleDetected { confidence: score });
        if let Decision::FullConfidence(_) = decision {
            self.trigger_capture(score);
        }

        composite(image, timestamp, Some(score), Some(quad))
    }

    fn render_overlay(&self, image: RgbaImage, quad: &Quad, score: u32, now: Instant) -> RgbaImage {
        let config = &self.links.config;
        let style = &config.overlay;
        let mut image = draw_highlight(image, quad, style.highlight, overlay_alpha(score));
        let centroid = quad.centroid();
        if config.draw_centroid {
            image = draw_centroid(image, centroid, style.centroid);
        }
        if config.show_focus_pulse && self.tracker.is_focusing(now) {
            let amplitude = quad.bounding_box().width() / 4.0;
            image = draw_focus_pulse(image, centroid, amplitude, style.focus, style.focus_alpha);
        }
        image
    }

    fn publish_confidence(&self, confidence: u32) {
        self.publish(|live| {
            let changed = live.confidence != confidence;
            live.confidence = confidence;
            changed
        });
    }

    /// Updates the live snapshot unless a newer session has started since this frame began.
    ///
    /// The generation is compared under the channel's write lock, so nothing from an older
    /// session can land after the scanner has cleared the snapshot for a new one.
    fn publish(&self, update: impl FnOnce(&mut LiveSnapshot) -> bool) {
        let session = &self.links.session;
        let generation = self.generation;
        self.links
            .live
            .send_if_modified(|live| session.generation() == generation && update(live));
    }

    /// Requests the automatic capture and reports its result once it resolves.
    fn trigger_capture(&self, score: u32) {
        let capture = self.links.coordinator.request_capture(self.links.config.capture_context(score));
        let events = self.links.events.clone();
        let session = Arc::clone(&self.links.session);
        let generation = self.generation;

        self.links.runtime.spawn(async move {
            let outcome = capture.await;
            if !session.is_current(generation) {
                debug!("session ended before the capture resolved, discarding it");
                return;
            }
            if outcome.is_rejected() {
                debug!("automatic capture rejected, another capture is in flight");
            }
            let artifact = outcome.into_artifact().map(Arc::new);
            events.emit(ScanEvent::FullConfidence { artifact });
        });
    }
}

impl fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePipeline")
            .field("generation", &self.generation)
            .field("confidence", &self.tracker.score())
            .field("cached_quad", &self.cached_quad)
            .finish_non_exhaustive()
    }
}

fn composite(image: RgbaImage, timestamp: Instant, confidence: Option<u32>, quad: Option<Quad>) -> CompositedFrame {
    CompositedFrame {
        image: Arc::new(image),
        timestamp,
        confidence,
        quad,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ScannerConfig::default();
        assert!(config.border_detection);
        assert_eq!((config.lower_threshold, config.upper_threshold), (1, 100));
        assert_eq!(config.crop_margin, 20);
        assert_eq!(config.detection_interval(), Duration::from_millis(500));
        assert_eq!(config.tracker_config(), TrackerConfig::default());
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn json_fills_in_missing_fields() {
        let config = ScannerConfig::from_json(
            r#"{ "detector_profile": "performance", "color_filter": "high_contrast", "upper_threshold": 98 }"#,
        )
        .expect("valid config");
        assert_eq!(config.detector_profile, DetectorProfile::Performance);
        assert_eq!(config.color_filter, ColorFilter::HighContrast);
        assert_eq!(config.upper_threshold, 98);
        assert_eq!(config.cooldown_ms, 2000);
        assert_eq!(config.tracker_config().step, 3);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = ScannerConfig::from_json(r#"{ "lower_threshold": 80, "upper_threshold": 60 }"#);
        assert!(matches!(
            err,
            Err(ScanError::InvalidConfig {
                field: "lower_threshold",
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (json, field) in [
            (r#"{ "lower_threshold": 0 }"#, "lower_threshold"),
            (r#"{ "upper_threshold": 101 }"#, "upper_threshold"),
            (r#"{ "focus_threshold": 120 }"#, "focus_threshold"),
            (r#"{ "detection_interval_ms": 0 }"#, "detection_interval_ms"),
        ] {
            match ScannerConfig::from_json(json) {
                Err(ScanError::InvalidConfig { field: got, .. }) => assert_eq!(got, field),
                other => panic!("{json}: expected InvalidConfig, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(ScannerConfig::from_json("{ nope"), Err(ScanError::Json(_))));
    }
}
