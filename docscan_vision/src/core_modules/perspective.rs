// THEORY:
// Perspective correction flattens the page: the four quad corners are mapped onto
// the four corners of the image's own rectangle by a projective transform, and the
// output is resampled bilinearly. It is a pure function of `(image, quad)`.
//
// A detector will occasionally hand back a sliver or a collapsed outline. Those are
// expected, not exceptional, so a degenerate quad (or a corner layout no projective
// transform can satisfy) yields the input unchanged instead of an error or a
// smeared image.

use crate::core_modules::quad::Quad;
use image::{Rgba, RgbaImage, imageops};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use tracing::debug;

/// Fill for output pixels whose source falls outside the input.
const OUTSIDE_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Warps the region outlined by `quad` onto the full bounds of `image`.
pub fn correct(image: &RgbaImage, quad: &Quad) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || quad.is_degenerate() {
        debug!(area = quad.area(), "skipping correction of degenerate quad");
        return image.clone();
    }

    let src = quad.corners().map(|p| (p.x, p.y));
    let (w, h) = (width as f32, height as f32);
    let dst = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

    let Some(projection) = Projection::from_control_points(src, dst) else {
        debug!("no projective transform for quad corners");
        return image.clone();
    };

    let mut out = RgbaImage::new(width, height);
    warp_into(image, &projection, Interpolation::Bilinear, OUTSIDE_FILL, &mut out);
    out
}

/// Removes `margin` pixels from every edge. Images too small to crop come back unchanged.
pub fn crop_margin(image: &RgbaImage, margin: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let twice = margin.saturating_mul(2);
    if margin == 0 || width <= twice || height <= twice {
        return image.clone();
    }
    imageops::crop_imm(image, margin, margin, width - twice, height - twice).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::quad::Point;

    fn checkerboard(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn degenerate_quad_returns_input_unchanged() {
        let image = checkerboard(32, 24);
        let p = Point::new(5.0, 5.0);
        let collapsed = Quad::new(p, p, p, p);
        assert_eq!(correct(&image, &collapsed), image);

        let line = Quad::new(
            Point::new(0.0, 0.0),
            Point::new(31.0, 0.0),
            Point::new(31.0, 0.0),
            Point::new(0.0, 0.0),
        );
        assert_eq!(correct(&image, &line), image);
    }

    #[test]
    fn full_frame_quad_is_near_identity() {
        let image = RgbaImage::from_pixel(40, 30, Rgba([90, 120, 150, 255]));
        let quad = Quad::from_rect(0.0, 0.0, 40.0, 30.0);
        let out = correct(&image, &quad);
        assert_eq!(out.dimensions(), (40, 30));
        let center = out.get_pixel(20, 15).0;
        for (got, want) in center.iter().zip([90u8, 120, 150, 255]) {
            assert!(got.abs_diff(want) <= 1, "{center:?}");
        }
    }

    #[test]
    fn inner_region_is_stretched_to_the_bounds() {
        // Dark page on a light desk; the page occupies the middle of the frame.
        let mut image = RgbaImage::from_pixel(64, 48, Rgba([250, 250, 250, 255]));
        for y in 12..36 {
            for x in 16..48 {
                image.put_pixel(x, y, Rgba([10, 10, 10, 255]));
            }
        }
        let quad = Quad::from_rect(16.0, 12.0, 32.0, 24.0);
        let out = correct(&image, &quad);
        assert_eq!(out.dimensions(), (64, 48));
        for (x, y) in [(4, 4), (60, 4), (32, 24), (4, 44), (60, 44)] {
            assert!(out.get_pixel(x, y).0[0] < 40, "pixel ({x},{y}) should be page-dark");
        }
    }

    #[test]
    fn crop_trims_every_edge() {
        let image = checkerboard(100, 80);
        assert_eq!(crop_margin(&image, 20).dimensions(), (60, 40));
        assert_eq!(crop_margin(&image, 40).dimensions(), (100, 80));
        assert_eq!(crop_margin(&image, 0), image);
    }
}
