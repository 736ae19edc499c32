//! Region-of-interest handling.
//!
//! Detectors may run on a cropped (and downscaled) canvas. Their output is
//! normalized to that canvas, so it has to be remapped into full-frame
//! normalized coordinates before selection and control see it.

use pancam_models::{round_to, Detection, NormalizedRect};

/// Pixel rectangle in full-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Clamp into a `width x height` frame, keeping at least one pixel.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width.saturating_sub(1));
        let y = self.y.min(height.saturating_sub(1));
        let w = self.width.min(width - x).max(1);
        let h = self.height.min(height - y).max(1);
        Self::new(x, y, w, h)
    }

    pub fn is_full(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width >= width && self.height >= height
    }

    pub fn origin(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Region around a previous detection, grown by `padding` times the
    /// larger box side on every edge.
    pub fn around(det: &Detection, full_size: (u32, u32), padding: f64) -> Self {
        let (fw, fh) = (full_size.0 as f64, full_size.1 as f64);
        let side = det.bbox.width.max(det.bbox.height);
        let pad = side * padding.max(0.0);
        let x0 = ((det.bbox.x - pad) * fw).round().max(0.0);
        let y0 = ((det.bbox.y - pad) * fh).round().max(0.0);
        let x1 = ((det.bbox.x + det.bbox.width + pad) * fw).round().min(fw);
        let y1 = ((det.bbox.y + det.bbox.height + pad) * fh).round().min(fh);
        Self::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0).max(1.0) as u32,
            (y1 - y0).max(1.0) as u32,
        )
        .clamp_to(full_size.0, full_size.1)
    }
}

/// Map a crop-normalized detection into full-frame normalized coordinates.
///
/// `crop_origin` and `crop_size` are the crop in full-frame pixels. The
/// result is rounded to 4 decimal places; an identity crop reproduces the
/// input within that rounding.
pub fn to_full(
    det: &Detection,
    crop_origin: (u32, u32),
    crop_size: (u32, u32),
    full_size: (u32, u32),
) -> Detection {
    let (ox, oy) = (crop_origin.0 as f64, crop_origin.1 as f64);
    let (cw, ch) = (crop_size.0 as f64, crop_size.1 as f64);
    let (fw, fh) = (full_size.0.max(1) as f64, full_size.1.max(1) as f64);

    let map_x = |v: f64| round_to((ox + v * cw) / fw, 4);
    let map_y = |v: f64| round_to((oy + v * ch) / fh, 4);

    let bbox = NormalizedRect::new(
        map_x(det.bbox.x),
        map_y(det.bbox.y),
        round_to(det.bbox.width * cw / fw, 4),
        round_to(det.bbox.height * ch / fh, 4),
    );
    let center = (map_x(det.center.0), map_y(det.center.1));

    let mut mapped = Detection::new(center, bbox, det.score, det.label);
    mapped.area = det.area;
    mapped
}

/// Map a canvas detection through an optional region.
pub fn map_region(det: &Detection, region: Option<&Region>, full_size: (u32, u32)) -> Detection {
    match region {
        Some(r) => to_full(det, r.origin(), r.size(), full_size),
        None => to_full(det, (0, 0), full_size, full_size),
    }
}
