//! Polygon measurements over traced contours.
//!
//! Contours come out of `imageproc::contours::find_contours` as closed
//! polygons of pixel coordinates. Area and centroid are computed from the
//! polygon itself (Green's theorem), the same way OpenCV measures a contour.

use imageproc::contours::{BorderType, Contour};
use imageproc::point::Point;

/// Spatial moments of order up to one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Centroid, or `None` for a degenerate polygon.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.m00.abs() <= f64::EPSILON {
            return None;
        }
        Some((self.m10 / self.m00, self.m01 / self.m00))
    }
}

/// Axis-aligned bounding rectangle in pixels, inclusive of edge pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// Absolute polygon area (shoelace formula).
pub fn polygon_area(points: &[Point<u32>]) -> f64 {
    moments(points).m00.abs()
}

/// Polygon moments, oriented so that `m00` is non-negative.
pub fn moments(points: &[Point<u32>]) -> Moments {
    if points.len() < 3 {
        return Moments::default();
    }

    let mut a = 0.0;
    let mut mx = 0.0;
    let mut my = 0.0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        let (x0, y0) = (p.x as f64, p.y as f64);
        let (x1, y1) = (q.x as f64, q.y as f64);
        let cross = x0 * y1 - x1 * y0;
        a += cross;
        mx += (x0 + x1) * cross;
        my += (y0 + y1) * cross;
    }

    let mut m = Moments {
        m00: a / 2.0,
        m10: mx / 6.0,
        m01: my / 6.0,
    };
    if m.m00 < 0.0 {
        m.m00 = -m.m00;
        m.m10 = -m.m10;
        m.m01 = -m.m01;
    }
    m
}

/// Bounding rectangle of a point set.
pub fn bounding_rect(points: &[Point<u32>]) -> Option<PixelRect> {
    let first = points.first()?;
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Some(PixelRect {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

/// Outer borders that are not nested inside another shape.
pub fn external<'a>(contours: &'a [Contour<u32>]) -> impl Iterator<Item = &'a Contour<u32>> + 'a {
    contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
}

/// Largest external contour by area. On equal area the first one found in
/// raster scan order wins.
pub fn largest_external(contours: &[Contour<u32>]) -> Option<(&Contour<u32>, f64)> {
    let mut best: Option<(&Contour<u32>, f64)> = None;
    for contour in external(contours) {
        let area = polygon_area(&contour.points);
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((contour, area)),
        }
    }
    best
}
