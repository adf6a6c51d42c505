// THEORY:
// The capture coordinator turns "the page looks stable" into a finished scan. It asks
// the still-capture device for a full-resolution image, pushes that image through the
// same filter the live view uses, finds the page again at full resolution, flattens it
// and trims the border.
//
// Key architectural principles:
// 1.  **Reject, Never Queue**: At most one capture is in flight. The guard is taken
//     synchronously when the request is made, so a second request made while the first
//     is running resolves `Rejected` before it ever awaits anything.
// 2.  **Guard by Ownership**: The guard is an RAII value moved into the capture future.
//     Whether the capture succeeds, fails, or its future is dropped half-way, the guard
//     is released exactly once.
// 3.  **Independent Path**: The device call is awaited on the async runtime and the
//     pixel work runs on the blocking pool. Nothing here touches the frame worker's state;
//     what the live path knew at request time travels in a `CaptureContext` snapshot.
// 4.  **Fresh Geometry**: The live quad is in preview coordinates and is never reused.
//     The still is re-detected with the same strategy the live path uses.

use crate::core_modules::detector::DetectionStrategy;
use crate::core_modules::filter::ColorFilter;
use crate::core_modules::perspective::{correct, crop_margin};
use crate::core_modules::quad::Quad;
use crate::error::ScanError;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use image::RgbaImage;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// A camera that can take a single full-resolution still on demand.
#[async_trait]
pub trait StillCaptureDevice: Send + Sync {
    /// Returns the encoded still (any format the `image` crate can decode).
    async fn capture_full_resolution(&self) -> Result<Vec<u8>, ScanError>;
}

/// What the live path knew when it asked for a capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureContext {
    /// Filter applied to the live view, applied again to the still.
    pub filter: ColorFilter,
    /// When disabled, the still is returned exactly as decoded.
    pub border_detection: bool,
    /// Live confidence at request time.
    pub score: u32,
    /// Minimum confidence for the still to be perspective-corrected.
    pub lower_threshold: u32,
}

/// A finished scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub image: RgbaImage,
    /// The page outline found in the full-resolution still, if any.
    pub quad: Option<Quad>,
    /// Whether `image` was perspective-corrected.
    pub corrected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Another capture is still in flight.
    Busy,
    /// The scanner is stopped.
    NotRunning,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Busy => f.write_str("a capture is already in progress"),
            RejectReason::NotRunning => f.write_str("the scanner is not running"),
        }
    }
}

/// How a capture request resolved.
#[derive(Debug)]
pub enum CaptureOutcome {
    Captured(Artifact),
    Rejected(RejectReason),
    Failed(ScanError),
}

impl CaptureOutcome {
    /// The artifact, if the capture succeeded.
    pub fn into_artifact(self) -> Option<Artifact> {
        match self {
            CaptureOutcome::Captured(artifact) => Some(artifact),
            CaptureOutcome::Rejected(_) | CaptureOutcome::Failed(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, CaptureOutcome::Rejected(_))
    }
}

/// Holds the "capture in progress" flag for as long as it lives.
struct CaptureGuard {
    busy: Arc<AtomicBool>,
}

impl CaptureGuard {
    fn acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { busy: Arc::clone(busy) })
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Serializes still captures: `Idle -> Capturing -> Idle`.
pub struct CaptureCoordinator {
    device: Arc<dyn StillCaptureDevice>,
    strategy: DetectionStrategy,
    crop_margin: u32,
    busy: Arc<AtomicBool>,
}

impl CaptureCoordinator {
    pub fn new(device: Arc<dyn StillCaptureDevice>, strategy: DetectionStrategy, crop_margin: u32) -> Self {
        Self {
            device,
            strategy,
            crop_margin,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Starts a capture, or rejects immediately if one is already running.
    ///
    /// The returned future is `'static` and can be spawned or awaited anywhere.
    pub fn request_capture(&self, context: CaptureContext) -> BoxFuture<'static, CaptureOutcome> {
        let Some(guard) = CaptureGuard::acquire(&self.busy) else {
            debug!("capture rejected, another capture is in flight");
            return future::ready(CaptureOutcome::Rejected(RejectReason::Busy)).boxed();
        };

        let device = Arc::clone(&self.device);
        let strategy = self.strategy.clone();
        let margin = self.crop_margin;

        async move {
            let _guard = guard;
            info!(score = context.score, "capturing still");

            let bytes = match device.capture_full_resolution().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%err, "still capture failed");
                    return CaptureOutcome::Failed(err);
                }
            };

            let developed = tokio::task::spawn_blocking(move || develop(&bytes, context, &strategy, margin)).await;
            match developed {
                Ok(Ok(artifact)) => {
                    info!(
                        width = artifact.image.width(),
                        height = artifact.image.height(),
                        corrected = artifact.corrected,
                        "still captured"
                    );
                    CaptureOutcome::Captured(artifact)
                }
                Ok(Err(err)) => {
                    warn!(%err, "could not develop still");
                    CaptureOutcome::Failed(err)
                }
                Err(join) => CaptureOutcome::Failed(ScanError::Task(join.to_string())),
            }
        }
        .boxed()
    }
}

impl fmt::Debug for CaptureCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("strategy", &self.strategy)
            .field("crop_margin", &self.crop_margin)
            .field("capturing", &self.is_capturing())
            .finish_non_exhaustive()
    }
}

/// Turns encoded still bytes into a finished artifact.
pub fn develop(
    bytes: &[u8],
    context: CaptureContext,
    strategy: &DetectionStrategy,
    margin: u32,
) -> Result<Artifact, ScanError> {
    let still = image::load_from_memory(bytes)?.to_rgba8();
    if !context.border_detection {
        return Ok(Artifact {
            image: still,
            quad: None,
            corrected: false,
        });
    }

    let filtered = context.filter.apply(still)?;
    let quad = strategy.detect_largest(&filtered);
    let confident = context.score >= context.lower_threshold;

    let (image, corrected) = match quad {
        Some(q) if confident && !q.is_degenerate() => (correct(&filtered, &q), true),
        _ => (filtered, false),
    };
    debug!(found = quad.is_some(), corrected, "developed still");

    Ok(Artifact {
        image: crop_margin(&image, margin),
        quad,
        corrected,
    })
}
