// THEORY:
// The `tracker` module gives the scanner its memory. A single frame can only say
// "there is a quad" or "there is not"; the `ConfidenceTracker` turns that stream of
// booleans into a bounded score and into the few decisions that matter downstream:
// keep drawing, start focusing, fire an automatic capture, or give up.
//
// Key architectural principles:
// 1.  **Single Owner**: The tracker lives on the frame worker and is updated exactly
//     once per delivered frame. Nothing else reads or writes it, so it needs no locks.
// 2.  **Bounded Score**: Confidence climbs by a profile-dependent step while a quad is
//     present and is clamped to `[0, 100]`. A single frame without a quad drops it
//     straight back to zero.
// 3.  **Latched Notification**: Crossing the upper threshold fires `FullConfidence`
//     once, then latches for a cooldown. Holding the page still at 100 does not spam
//     captures; once the cooldown has passed, a still-held page can trigger again.
// 4.  **Timers as Deadlines**: The cooldown and the focus pulse are deadlines compared
//     against the frame timestamp rather than callbacks on another thread. Expiry is
//     observed on the next frame, which keeps every field owned by one context.

use crate::core_modules::quad::Quad;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound of the confidence score.
pub const MAX_CONFIDENCE: u32 = 100;
/// The highlight never becomes fully opaque so the page stays visible beneath it.
pub const MAX_OVERLAY_ALPHA: f32 = 0.8;

/// Highlight opacity for a confidence score.
pub fn overlay_alpha(score: u32) -> f32 {
    (score as f32 / MAX_CONFIDENCE as f32).min(MAX_OVERLAY_ALPHA)
}

/// Tunables for the confidence state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Points gained per frame with a quad.
    pub step: u32,
    /// Score at which an automatic capture is requested.
    pub upper_threshold: u32,
    /// Score above which the camera is asked to focus on the page, once per page.
    pub focus_threshold: u32,
    /// How long a `FullConfidence` notification stays latched.
    pub cooldown: Duration,
    /// How long a focus operation is believed to be in progress.
    pub focus_pulse: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            step: 1,
            upper_threshold: MAX_CONFIDENCE,
            focus_threshold: 50,
            cooldown: Duration::from_secs(2),
            focus_pulse: Duration::from_secs(1),
        }
    }
}

/// Details of a frame in which a quad was present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracking {
    /// Confidence after this frame, in `[0, 100]`.
    pub score: u32,
    /// Set on the single frame where the tracker decides the camera should focus.
    pub start_focus: bool,
}

/// The per-frame verdict of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No quad this frame; confidence was reset.
    Lost,
    /// A quad is present and confidence is building (or holding).
    Tracking(Tracking),
    /// A quad is present and the upper threshold was just crossed outside of the cooldown.
    /// Everything that applies to `Tracking` applies here too.
    FullConfidence(Tracking),
}

impl Decision {
    /// The tracking details, if a quad was present.
    pub fn tracking(&self) -> Option<Tracking> {
        match *self {
            Decision::Lost => None,
            Decision::Tracking(t) | Decision::FullConfidence(t) => Some(t),
        }
    }

    pub fn score(&self) -> u32 {
        self.tracking().map_or(0, |t| t.score)
    }
}

/// Smooths per-frame detections into a confidence score and capture decisions.
#[derive(Debug)]
pub struct ConfidenceTracker {
    config: TrackerConfig,
    /// The current confidence score.
    score: u32,
    /// Set while a `FullConfidence` notification is cooling down.
    latched_until: Option<Instant>,
    /// Whether focus was already requested for the page currently in view.
    focused_current: bool,
    /// End of the current focus pulse, if one is running.
    focus_until: Option<Instant>,
}

impl ConfidenceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            score: 0,
            latched_until: None,
            focused_current: false,
            focus_until: None,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    /// Whether a `FullConfidence` notification is still cooling down at `now`.
    pub fn is_latched(&self, now: Instant) -> bool {
        self.latched_until.is_some_and(|deadline| now < deadline)
    }

    /// Whether a focus operation is believed to be in progress at `now`.
    pub fn is_focusing(&self, now: Instant) -> bool {
        self.focus_until.is_some_and(|deadline| now < deadline)
    }

    /// Returns every field to its initial value.
    pub fn reset(&mut self) {
        self.score = 0;
        self.latched_until = None;
        self.focused_current = false;
        self.focus_until = None;
    }

    /// Feeds one frame's detection result into the state machine.
    pub fn update(&mut self, quad: Option<&Quad>, now: Instant) -> Decision {
        if self.latched_until.is_some_and(|deadline| now >= deadline) {
            self.latched_until = None;
        }

        if quad.is_none() {
            if self.score > 0 {
                debug!(previous = self.score, "confidence lost");
            }
            self.score = 0;
            self.focused_current = false;
            self.focus_until = None;
            return Decision::Lost;
        }

        self.score = self.score.saturating_add(self.config.step).min(MAX_CONFIDENCE);

        let start_focus = !self.focused_current && self.score > self.config.focus_threshold;
        if start_focus {
            self.focused_current = true;
            self.focus_until = Some(now + self.config.focus_pulse);
        }

        let tracking = Tracking {
            score: self.score,
            start_focus,
        };

        if self.score >= self.config.upper_threshold && self.latched_until.is_none() {
            self.latched_until = Some(now + self.config.cooldown);
            debug!(score = self.score, "full confidence reached");
            Decision::FullConfidence(tracking)
        } else {
            Decision::Tracking(tracking)
        }
    }
}
