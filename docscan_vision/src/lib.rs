// THEORY:
// This file is the main entry point for the `docscan_vision` library crate.
// It defines the public API exposed to applications that own a camera and a display.
//
// The primary goal is to export `DocumentScanner` and `FramePipeline`, the two halves
// of a live scanner, together with their configuration, events and capture outcome.
// The building blocks in `core_modules` stay public for callers that want to compose
// them differently (for example, correcting a still without running a live session).

pub mod core_modules;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod scanner;
pub mod session;

pub use error::ScanError;
pub use events::{EventReceiver, EventSender, ScanEvent, ScanObserver, event_channel, spawn_dispatcher};
pub use pipeline::{
    Artifact, CaptureOutcome, ColorFilter, CompositedFrame, DetectorProfile, FocusControl, FramePipeline,
    LiveSnapshot, OverlayStyle, Point, Quad, QuadDetector, RawFrame, RejectReason, ScannerConfig,
    StillCaptureDevice,
};
pub use scanner::DocumentScanner;
