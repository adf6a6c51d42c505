// THEORY:
// The overlay is what the user actually watches: a translucent fill over the page
// that darkens as confidence grows, an optional dot on its centroid, and an optional
// square that pulses while the camera is refocusing.
//
// Each drawing step consumes an image and returns it with one more layer blended
// on top, so callers chain them in whatever order they need. There is no shared
// state between calls. Drawing goes through an `imageproc` canvas that mixes only the
// color channels, so translucent layers composite over the frame while the frame's own
// alpha is left exactly as delivered.

use crate::core_modules::quad::{Point, Quad};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{Canvas, draw_filled_circle_mut, draw_hollow_rect_mut, draw_polygon_mut};
use imageproc::point::Point as PixelPoint;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

/// Colors used when compositing the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// Fill color of the page highlight; its opacity comes from the confidence score.
    pub highlight: [u8; 3],
    /// Color of the centroid dot.
    pub centroid: [u8; 3],
    /// Color of the focus square.
    pub focus: [u8; 3],
    /// Opacity of the focus square.
    pub focus_alpha: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            highlight: [255, 255, 255],
            centroid: [255, 255, 255],
            focus: [255, 255, 255],
            focus_alpha: 0.7,
        }
    }
}

/// Source-over blending of the color channels; the base pixel keeps its alpha.
struct Composite(RgbaImage);

impl Canvas for Composite {
    type Pixel = Rgba<u8>;

    fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.0.get_pixel(x, y)
    }

    fn draw_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        let base = self.0.get_pixel_mut(x, y);
        let a = color.0[3] as u32;
        for c in 0..3 {
            let mixed = color.0[c] as u32 * a + base.0[c] as u32 * (255 - a);
            base.0[c] = ((mixed + 127) / 255) as u8;
        }
    }
}

fn with_alpha(color: [u8; 3], alpha: f32) -> Rgba<u8> {
    let a = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([color[0], color[1], color[2], a])
}

fn to_pixel(p: Point) -> PixelPoint<i32> {
    PixelPoint::new(p.x.round() as i32, p.y.round() as i32)
}

/// Fills `quad` with `color` at opacity `alpha`.
pub fn draw_highlight(image: RgbaImage, quad: &Quad, color: [u8; 3], alpha: f32) -> RgbaImage {
    if quad.is_degenerate() || alpha <= 0.0 {
        return image;
    }
    let poly = quad.corners().map(to_pixel);
    // The polygon filler rejects outlines whose first and last points coincide.
    if poly[0] == poly[3] {
        return image;
    }

    let mut canvas = Composite(image);
    draw_polygon_mut(&mut canvas, &poly, with_alpha(color, alpha));
    canvas.0
}

/// Marks `point` with a small opaque dot scaled to the image size.
pub fn draw_centroid(image: RgbaImage, point: Point, color: [u8; 3]) -> RgbaImage {
    let radius = (image.width().min(image.height()) / 80).max(3) as i32;
    let center = to_pixel(point);
    let mut canvas = Composite(image);
    draw_filled_circle_mut(&mut canvas, (center.x, center.y), radius, with_alpha(color, 1.0));
    canvas.0
}

/// Draws a two-pixel hollow square of half-side `amplitude` centred on `point`.
pub fn draw_focus_pulse(image: RgbaImage, point: Point, amplitude: f32, color: [u8; 3], alpha: f32) -> RgbaImage {
    let half = amplitude.round() as i32;
    if half < 2 || !amplitude.is_finite() {
        return image;
    }
    let center = to_pixel(point);
    let paint = with_alpha(color, alpha);
    let mut canvas = Composite(image);
    for inset in 0..2 {
        let side = (2 * (half - inset)) as u32;
        let rect = Rect::at(center.x - half + inset, center.y - half + inset).of_size(side, side);
        draw_hollow_rect_mut(&mut canvas, rect, paint);
    }
    canvas.0
}
