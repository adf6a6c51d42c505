// THEORY (Color Filters):
// Filters are the first stage of every frame and of every still capture. They are
// single-pixel operations: each output pixel depends only on the same input pixel,
// so they are stateless and order-independent from detection.
//
// Every profile except pass-through reduces a pixel to its Rec. 601 luminance and
// pushes that value through a tone curve. The curves are precomputed into 256-entry
// `OnceLock` lookup tables so the hot path is one multiply-add for the luminance and
// one table lookup per pixel. Alpha is passed through untouched.

use crate::error::ScanError;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Contrast gain of the monochrome-enhance curve around mid-grey.
const ENHANCE_CONTRAST: f32 = 1.14;
/// Lower edge of the high-contrast ramp, as a fraction of full scale.
const GRADIENT_LOW: f32 = 0.3;
/// Upper edge of the high-contrast ramp.
const GRADIENT_HIGH: f32 = 0.7;

static ENHANCE_LUT: OnceLock<[u8; 256]> = OnceLock::new();
static HIGH_CONTRAST_LUT: OnceLock<[u8; 256]> = OnceLock::new();

/// The color treatment applied to frames before detection and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFilter {
    /// Frames are shown exactly as delivered.
    #[default]
    PassThrough,
    /// Desaturated with a mild contrast boost, the classic "scanned page" look.
    MonochromeEnhance,
    /// Luminance crushed through a steep ramp, close to a binarised scan.
    HighContrast,
}

impl ColorFilter {
    /// Filters `frame` in place and hands it back.
    ///
    /// The only failure is a frame without pixels, which no later stage could use either.
    pub fn apply(self, mut frame: RgbaImage) -> Result<RgbaImage, ScanError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(ScanError::EmptyFrame { width, height });
        }

        let lut = match self {
            ColorFilter::PassThrough => return Ok(frame),
            ColorFilter::MonochromeEnhance => enhance_lut(),
            ColorFilter::HighContrast => high_contrast_lut(),
        };

        for pixel in frame.pixels_mut() {
            let [r, g, b, a] = pixel.0;
            let v = lut[luminance(r, g, b) as usize];
            pixel.0 = [v, v, v, a];
        }
        Ok(frame)
    }
}

/// Rec. 601 luma in integer arithmetic, rounded.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

fn enhance_lut() -> &'static [u8; 256] {
    ENHANCE_LUT.get_or_init(|| {
        let mut lut = [0u8; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            let boosted = (i as f32 - 128.0) * ENHANCE_CONTRAST + 128.0;
            *v = boosted.round().clamp(0.0, 255.0) as u8;
        }
        lut
    })
}

fn high_contrast_lut() -> &'static [u8; 256] {
    HIGH_CONTRAST_LUT.get_or_init(|| {
        let mut lut = [0u8; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            let x = i as f32 / 255.0;
            let t = ((x - GRADIENT_LOW) / (GRADIENT_HIGH - GRADIENT_LOW)).clamp(0.0, 1.0);
            let s = t * t * (3.0 - 2.0 * t);
            *v = (s * 255.0).round() as u8;
        }
        lut
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn swatch(color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(3, 2, Rgba(color))
    }

    #[test]
    fn pass_through_is_identity() {
        let frame = swatch([12, 200, 77, 255]);
        let out = ColorFilter::PassThrough.apply(frame.clone()).expect("filter");
        assert_eq!(out, frame);
    }

    #[test]
    fn monochrome_is_grey_and_keeps_alpha() {
        let out = ColorFilter::MonochromeEnhance
            .apply(swatch([200, 40, 90, 128]))
            .expect("filter");
        for p in out.pixels() {
            assert_eq!(p.0[0], p.0[1]);
            assert_eq!(p.0[1], p.0[2]);
            assert_eq!(p.0[3], 128);
        }
    }

    #[test]
    fn high_contrast_saturates_the_extremes() {
        let dark = ColorFilter::HighContrast.apply(swatch([40, 40, 40, 255])).expect("filter");
        let light = ColorFilter::HighContrast.apply(swatch([230, 230, 230, 255])).expect("filter");
        assert_eq!(dark.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(light.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn empty_frame_is_rejected() {
        let err = ColorFilter::MonochromeEnhance.apply(RgbaImage::new(0, 5));
        assert!(matches!(err, Err(ScanError::EmptyFrame { width: 0, height: 5 })));
    }

    #[test]
    fn luminance_matches_rec601() {
        assert_eq!(luminance(255, 255, 255), 255);
        assert_eq!(luminance(0, 0, 0), 0);
        assert_eq!(luminance(255, 0, 0), 76);
    }
}
