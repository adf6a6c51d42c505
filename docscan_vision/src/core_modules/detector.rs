// THEORY:
// The detector is the one piece of real computer vision this engine does *not* own.
// Finding a page outline (edges, Hough lines, a neural net, a platform API) is an
// opaque capability plugged in from outside. What this module owns is the contract
// around it and the one decision made on its output.
//
// Key architectural principles:
// 1.  **Opaque Capability**: `QuadDetector` is "given an image, return zero or more
//     candidate quads". Returning nothing is a perfectly normal answer.
// 2.  **Strategy, Not Duplication**: The accuracy and performance profiles differ in
//     the speed/precision trade-off of the detector *and* in how fast confidence is
//     allowed to build. `DetectionStrategy` bundles both so the pipeline is written
//     once and the profile is picked at configuration time.
// 3.  **Deterministic Selection**: When several candidates come back, the one with
//     the largest bounding-box area wins; ties go to the first one returned.

use crate::core_modules::quad::Quad;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Speed/accuracy trade-off requested from the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorProfile {
    /// Slower, more precise detection. Confidence builds one point per frame.
    #[default]
    Accuracy,
    /// Faster, noisier detection. Confidence builds three points per frame to
    /// compensate for the lower per-call precision.
    Performance,
}

impl DetectorProfile {
    /// How many confidence points a frame with a quad is worth under this profile.
    pub fn confidence_step(self) -> u32 {
        match self {
            DetectorProfile::Accuracy => 1,
            DetectorProfile::Performance => 3,
        }
    }
}

/// Anything that can find page outlines in an image.
///
/// Implementations are called synchronously on the frame worker at the detection
/// cadence and again on full-resolution stills, so they must be `Send + Sync`.
pub trait QuadDetector: Send + Sync {
    fn detect(&self, image: &RgbaImage, profile: DetectorProfile) -> Vec<Quad>;
}

/// Picks the candidate with the largest bounding-box area. Ties keep the earliest.
pub fn select_largest<I>(candidates: I) -> Option<Quad>
where
    I: IntoIterator<Item = Quad>,
{
    let mut best: Option<(Quad, f32)> = None;
    for quad in candidates {
        let area = quad.bounding_box_area();
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((quad, area)),
        }
    }
    best.map(|(quad, _)| quad)
}

/// A detector paired with the profile it was configured for.
#[derive(Clone)]
pub struct DetectionStrategy {
    profile: DetectorProfile,
    detector: Arc<dyn QuadDetector>,
}

impl DetectionStrategy {
    pub fn new(profile: DetectorProfile, detector: Arc<dyn QuadDetector>) -> Self {
        Self { profile, detector }
    }

    pub fn profile(&self) -> DetectorProfile {
        self.profile
    }

    pub fn confidence_step(&self) -> u32 {
        self.profile.confidence_step()
    }

    /// Runs the detector and keeps only the largest candidate.
    pub fn detect_largest(&self, image: &RgbaImage) -> Option<Quad> {
        select_largest(self.detector.detect(image, self.profile))
    }
}

impl fmt::Debug for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionStrategy")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Quad>);

    impl QuadDetector for Fixed {
        fn detect(&self, _image: &RgbaImage, _profile: DetectorProfile) -> Vec<Quad> {
            self.0.clone()
        }
    }

    #[test]
    fn largest_bounding_box_wins() {
        // Areas 10, 40 and 25.
        let candidates = vec![
            Quad::from_rect(0.0, 0.0, 2.0, 5.0),
            Quad::from_rect(0.0, 0.0, 4.0, 10.0),
            Quad::from_rect(0.0, 0.0, 5.0, 5.0),
        ];
        let chosen = select_largest(candidates).expect("a quad is selected");
        assert_eq!(chosen.bounding_box_area(), 40.0);
    }

    #[test]
    fn ties_keep_the_first_candidate() {
        let first = Quad::from_rect(0.0, 0.0, 4.0, 4.0);
        let second = Quad::from_rect(10.0, 10.0, 2.0, 8.0);
        assert_eq!(select_largest(vec![first, second]), Some(first));
    }

    #[test]
    fn empty_result_selects_nothing() {
        assert_eq!(select_largest(Vec::new()), None);
    }

    #[test]
    fn strategy_reports_profile_step() {
        let strategy = DetectionStrategy::new(DetectorProfile::Performance, Arc::new(Fixed(vec![])));
        assert_eq!(strategy.profile(), DetectorProfile::Performance);
        assert_eq!(strategy.confidence_step(), 3);
        assert_eq!(DetectorProfile::Accuracy.confidence_step(), 1);
        assert!(strategy.detect_largest(&RgbaImage::new(4, 4)).is_none());
    }
}
