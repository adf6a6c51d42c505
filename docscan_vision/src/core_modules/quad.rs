// THEORY:
// The `Quad` is the single geometric fact the rest of the engine reasons about: the
// four-corner outline of a page as seen in one image. Like the other data containers
// in `core_modules`, it is "dumb" and immutable. It knows how to describe itself
// (bounding box, area, centroid) but has no idea where it came from or how confident
// anybody is in it.
//
// Key architectural principles:
// 1.  **Fixed Corner Order**: Corners are always stored as top-left, top-right,
//     bottom-right, bottom-left. The perspective corrector and the overlay renderer
//     rely on this winding to map corners onto rectangle corners.
// 2.  **Image-Space Coordinates**: Corners are `f32` pixel positions in the frame of
//     the image the quad was detected in (origin top-left, y down). A quad is never
//     carried across resolutions; the capture path re-detects on the full-size still.
// 3.  **Derived, Not Stored**: The bounding box and centroid are computed on demand.
//     They are cheap and this keeps the struct trivially `Copy`.

use serde::{Deserialize, Serialize};

/// Quads whose polygon area falls below this many square pixels are degenerate.
pub const DEGENERATE_AREA_PX: f32 = 1.0;

/// A 2D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle enclosing a quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// The outline of a detected document in a single image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl Quad {
    pub const fn new(top_left: Point, top_right: Point, bottom_right: Point, bottom_left: Point) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// Builds an axis-aligned quad covering `x..x+width`, `y..y+height`.
    pub fn from_rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(
            Point::new(x, y),
            Point::new(x + width, y),
            Point::new(x + width, y + height),
            Point::new(x, y + height),
        )
    }

    /// Corners in winding order: top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let corners = self.corners();
        let mut bbox = BoundingBox {
            min_x: f32::MAX,
            min_y: f32::MAX,
            max_x: f32::MIN,
            max_y: f32::MIN,
        };
        for p in corners {
            bbox.min_x = bbox.min_x.min(p.x);
            bbox.min_y = bbox.min_y.min(p.y);
            bbox.max_x = bbox.max_x.max(p.x);
            bbox.max_y = bbox.max_y.max(p.y);
        }
        bbox
    }

    /// Area of the bounding box, the measure used to rank competing detections.
    pub fn bounding_box_area(&self) -> f32 {
        self.bounding_box().area()
    }

    /// Signed shoelace area; positive for clockwise winding in y-down coordinates.
    fn signed_area(&self) -> f32 {
        let c = self.corners();
        let mut acc = 0.0;
        for i in 0..4 {
            let a = c[i];
            let b = c[(i + 1) % 4];
            acc += a.x * b.y - b.x * a.y;
        }
        acc * 0.5
    }

    /// Polygon area in square pixels.
    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }

    pub fn is_degenerate(&self) -> bool {
        !self.area().is_finite() || self.area() < DEGENERATE_AREA_PX
    }

    /// Area-weighted centroid of the polygon. Degenerate quads fall back to the
    /// mean of their corners so the centroid marker still lands somewhere sensible.
    pub fn centroid(&self) -> Point {
        let c = self.corners();
        let signed = self.signed_area();
        if signed.abs() < DEGENERATE_AREA_PX {
            let (sx, sy) = c.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
            return Point::new(sx / 4.0, sy / 4.0);
        }

        let mut cx = 0.0;
        let mut cy = 0.0;
        for i in 0..4 {
            let a = c[i];
            let b = c[(i + 1) % 4];
            let cross = a.x * b.y - b.x * a.y;
            cx += (a.x + b.x) * cross;
            cy += (a.y + b.y) * cross;
        }
        let k = 1.0 / (6.0 * signed);
        Point::new(cx * k, cy * k)
    }

    /// Rescales every corner, e.g. to move a quad between preview and still sizes.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        let s = |p: Point| Point::new(p.x * sx, p.y * sy);
        Self::new(s(self.top_left), s(self.top_right), s(self.bottom_right), s(self.bottom_left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_of_skewed_quad() {
        let quad = Quad::new(
            Point::new(10.0, 5.0),
            Point::new(90.0, 0.0),
            Point::new(100.0, 80.0),
            Point::new(0.0, 70.0),
        );
        let bbox = quad.bounding_box();
        assert_eq!(bbox.min_x, 0.0);
        assert_eq!(bbox.min_y, 0.0);
        assert_eq!(bbox.max_x, 100.0);
        assert_eq!(bbox.max_y, 80.0);
        assert_eq!(quad.bounding_box_area(), 8000.0);
    }

    #[test]
    fn centroid_of_rectangle_is_its_center() {
        let quad = Quad::from_rect(20.0, 40.0, 60.0, 20.0);
        let c = quad.centroid();
        assert!((c.x - 50.0).abs() < 1e-4);
        assert!((c.y - 50.0).abs() < 1e-4);
        assert!((quad.area() - 1200.0).abs() < 1e-3);
    }

    #[test]
    fn collapsed_quad_is_degenerate() {
        let p = Point::new(12.0, 12.0);
        let quad = Quad::new(p, p, p, p);
        assert!(quad.is_degenerate());
        assert_eq!(quad.centroid(), p);

        let sliver = Quad::new(
            Point::new(0.0, 0.0),
            Point::new(50.0, 0.0),
            Point::new(50.0, 0.01),
            Point::new(0.0, 0.01),
        );
        assert!(sliver.is_degenerate());
    }

    #[test]
    fn scaling_moves_every_corner() {
        let quad = Quad::from_rect(1.0, 2.0, 3.0, 4.0).scaled(2.0, 10.0);
        assert_eq!(quad.top_left, Point::new(2.0, 20.0));
        assert_eq!(quad.bottom_right, Point::new(8.0, 60.0));
    }
}
