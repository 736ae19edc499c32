//! Frame-differencing motion detector.
//!
//! Pipeline per frame:
//! 1. Crop to the ROI, downscale by `detect_scale`, Gaussian blur
//! 2. Push into a ring of the last `frame_gap + 1` preprocessed frames
//! 3. Diff the oldest against the newest and threshold the result
//! 4. Close then open the mask to merge blobs and drop speckle
//! 5. Take the largest external contour and gate it on `min_area`

use std::borrow::Cow;
use std::collections::VecDeque;

use image::{imageops, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::{contrast, filter, morphology};
use pancam_models::{Detection, Label, NormalizedRect};
use tracing::{debug, trace};

use super::{scaled_size, DetectionStrategy};
use crate::contour::{bounding_rect, largest_external, moments};
use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;
use crate::roi::{map_region, Region};

/// Tuning for [`MotionDiffDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct MotionDiffConfig {
    /// Per-pixel intensity difference that counts as change (0-255).
    pub diff_threshold: u8,
    /// Minimum contour area, in detection-canvas pixels.
    pub min_area: f64,
    /// Compare against the frame this many frames ago.
    pub frame_gap: usize,
    /// Downscale factor applied before differencing.
    pub detect_scale: f64,
    /// Gaussian blur kernel size in pixels (0 disables blurring).
    pub blur_kernel: u32,
    /// Morphology structuring element size in pixels.
    pub morph_kernel: u32,
}

impl Default for MotionDiffConfig {
    fn default() -> Self {
        Self {
            diff_threshold: 20,
            min_area: 2500.0,
            frame_gap: 2,
            detect_scale: 0.5,
            blur_kernel: 7,
            morph_kernel: 9,
        }
    }
}

impl MotionDiffConfig {
    /// Less sensitive preset used for alerting.
    pub fn alerting() -> Self {
        Self {
            diff_threshold: 25,
            min_area: 4000.0,
            frame_gap: 3,
            morph_kernel: 11,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> VisionResult<()> {
        if self.diff_threshold == 0 {
            return Err(VisionError::invalid_config("diff_threshold must be positive"));
        }
        if self.min_area.is_nan() || self.min_area <= 0.0 {
            return Err(VisionError::invalid_config("min_area must be positive"));
        }
        if self.frame_gap == 0 {
            return Err(VisionError::invalid_config("frame_gap must be at least 1"));
        }
        if self.detect_scale <= 0.0 || !(0.0..=1.0).contains(&self.detect_scale) {
            return Err(VisionError::invalid_config("detect_scale must be in (0, 1]"));
        }
        if self.morph_kernel < 2 || self.morph_kernel > 255 {
            return Err(VisionError::invalid_config("morph_kernel must be in [2, 255]"));
        }
        Ok(())
    }

    /// Blur sigma derived from the kernel size the way OpenCV does for sigma 0.
    fn blur_sigma(&self) -> Option<f32> {
        if self.blur_kernel < 3 {
            return None;
        }
        let k = self.blur_kernel as f32;
        Some(0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8)
    }

    /// Structuring element radius for the morphology passes.
    fn morph_radius(&self) -> u8 {
        (self.morph_kernel / 2).clamp(1, 255) as u8
    }
}

/// Ring buffer of recent preprocessed frames.
///
/// Holds at most `gap + 1` frames; the oldest one is the diff reference.
#[derive(Debug)]
pub struct FrameHistory {
    frames: VecDeque<GrayImage>,
    capacity: usize,
}

impl FrameHistory {
    pub fn new(gap: usize) -> Self {
        let capacity = gap + 1;
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full. A frame of a
    /// different size invalidates everything already stored.
    pub fn push(&mut self, frame: GrayImage) {
        if self
            .frames
            .back()
            .is_some_and(|last| last.dimensions() != frame.dimensions())
        {
            self.frames.clear();
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// `(reference, current)` once the ring is full.
    pub fn pair(&self) -> Option<(&GrayImage, &GrayImage)> {
        if self.frames.len() < self.capacity {
            return None;
        }
        Some((self.frames.front()?, self.frames.back()?))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Motion detector over consecutive frames.
pub struct MotionDiffDetector {
    config: MotionDiffConfig,
    history: FrameHistory,
    last_roi: Option<Region>,
    freeze_remaining: u32,
}

impl MotionDiffDetector {
    pub fn new(config: MotionDiffConfig) -> VisionResult<Self> {
        config.validate()?;
        Ok(Self {
            history: FrameHistory::new(config.frame_gap),
            config,
            last_roi: None,
            freeze_remaining: 0,
        })
    }

    pub fn config(&self) -> &MotionDiffConfig {
        &self.config
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    /// Drop the diff reference once.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Discard history for the next `frames` frames so that a camera pan
    /// is not detected as motion.
    pub fn freeze(&mut self, frames: u32) {
        self.freeze_remaining = frames;
        self.history.clear();
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_remaining > 0
    }

    fn preprocess(&self, canvas: &GrayImage) -> GrayImage {
        let (sw, sh) = scaled_size(canvas.width(), canvas.height(), self.config.detect_scale);
        let small = if (sw, sh) == canvas.dimensions() {
            canvas.clone()
        } else {
            imageops::resize(canvas, sw, sh, imageops::FilterType::Triangle)
        };
        match self.config.blur_sigma() {
            Some(sigma) => filter::gaussian_blur_f32(&small, sigma),
            None => small,
        }
    }

    fn motion_mask(&self, reference: &GrayImage, current: &GrayImage) -> GrayImage {
        let diff = GrayImage::from_fn(current.width(), current.height(), |x, y| {
            let a = reference.get_pixel(x, y)[0];
            let b = current.get_pixel(x, y)[0];
            Luma([a.abs_diff(b)])
        });
        let mask = contrast::threshold(&diff, self.config.diff_threshold);
        let radius = self.config.morph_radius();
        let mask = morphology::close(&mask, Norm::LInf, radius);
        morphology::open(&mask, Norm::LInf, radius)
    }

    fn largest_blob(&self, mask: &GrayImage) -> Option<Detection> {
        let contours = find_contours::<u32>(mask);
        let (largest, area) = largest_external(&contours)?;
        if area < self.config.min_area {
            trace!(area, min_area = self.config.min_area, "motion below area gate");
            return None;
        }

        let rect = bounding_rect(&largest.points)?;
        let (cx, cy) = moments(&largest.points)
            .centroid()
            .unwrap_or_else(|| rect.center());

        let (sw, sh) = (mask.width() as f64, mask.height() as f64);
        let bbox = NormalizedRect::new(
            rect.x as f64 / sw,
            rect.y as f64 / sh,
            rect.width as f64 / sw,
            rect.height as f64 / sh,
        );
        Some(Detection::new((cx / sw, cy / sh), bbox, 1.0, Label::Motion).with_area(area))
    }
}

impl DetectionStrategy for MotionDiffDetector {
    fn name(&self) -> &'static str {
        "motion_diff"
    }

    fn detect(&mut self, frame: &Frame, roi: Option<&Region>) -> VisionResult<Vec<Detection>> {
        let roi = roi.filter(|r| !r.is_full(frame.width(), frame.height())).copied();
        if roi != self.last_roi {
            debug!(?roi, "motion ROI changed, clearing history");
            self.history.clear();
            self.last_roi = roi;
        }

        let canvas = match &roi {
            Some(region) => Cow::Owned(frame.crop_gray(region)),
            None => Cow::Borrowed(frame.gray()),
        };
        let small = self.preprocess(&canvas);

        if self.freeze_remaining > 0 {
            self.freeze_remaining -= 1;
            self.history.clear();
            return Ok(Vec::new());
        }

        self.history.push(small);
        let Some((reference, current)) = self.history.pair() else {
            return Ok(Vec::new());
        };

        let mask = self.motion_mask(reference, current);
        let detections = self
            .largest_blob(&mask)
            .map(|det| map_region(&det, roi.as_ref(), frame.size()))
            .into_iter()
            .collect();
        Ok(detections)
    }

    fn reset(&mut self) {
        self.history.clear();
        self.freeze_remaining = 0;
        self.last_roi = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 200;
    const H: u32 = 160;

    fn background() -> Frame {
        Frame::from_gray(GrayImage::from_pixel(W, H, Luma([30])))
    }

    fn with_square(x0: u32, y0: u32, side: u32) -> Frame {
        let mut img = GrayImage::from_pixel(W, H, Luma([30]));
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        Frame::from_gray(img)
    }

    fn detector(min_area: f64) -> MotionDiffDetector {
        MotionDiffDetector::new(MotionDiffConfig {
            min_area,
            ..MotionDiffConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_history_never_exceeds_gap_plus_one() {
        let mut history = FrameHistory::new(2);
        for _ in 0..10 {
            history.push(GrayImage::new(4, 4));
            assert!(history.len() <= 3);
        }
        assert!(history.pair().is_some());
    }

    #[test]
    fn test_history_resets_on_size_change() {
        let mut history = FrameHistory::new(1);
        history.push(GrayImage::new(4, 4));
        history.push(GrayImage::new(4, 4));
        history.push(GrayImage::new(8, 8));
        assert_eq!(history.len(), 1);
        assert!(history.pair().is_none());
    }

    #[test]
    fn test_needs_full_history_before_reporting() {
        let mut det = detector(100.0);
        assert!(det.detect(&background(), None).unwrap().is_empty());
        assert!(det.detect(&background(), None).unwrap().is_empty());
        let found = det.detect(&with_square(100, 60, 60), None).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_reports_centroid_of_moving_blob() {
        let mut det = detector(100.0);
        det.detect(&background(), None).unwrap();
        det.detect(&background(), None).unwrap();
        let found = det.detect(&with_square(100, 60, 60), None).unwrap();

        let motion = &found[0];
        assert_eq!(motion.label, Label::Motion);
        assert_eq!(motion.score, 1.0);
        assert!((motion.center.0 - 0.65).abs() < 0.02, "cx={}", motion.center.0);
        assert!((motion.center.1 - 0.5625).abs() < 0.02, "cy={}", motion.center.1);
        assert!(motion.area.unwrap() >= 100.0);
        assert!(motion.bbox.is_valid());
    }

    #[test]
    fn test_area_gate_suppresses_small_motion() {
        let mut det = detector(1_000_000.0);
        det.detect(&background(), None).unwrap();
        det.detect(&background(), None).unwrap();
        assert!(det.detect(&with_square(100, 60, 60), None).unwrap().is_empty());
    }

    #[test]
    fn test_area_gate_is_inclusive_at_min_area() {
        let detect_with_gate = |min_area: f64| {
            let mut det = detector(min_area);
            det.detect(&background(), None).unwrap();
            det.detect(&background(), None).unwrap();
            det.detect(&with_square(100, 60, 80), None).unwrap()
        };
        let area = detect_with_gate(1.0)[0].area.unwrap();
        assert!(area > 1.0);

        assert_eq!(detect_with_gate(area).len(), 1);
        assert!(detect_with_gate(area + 1.0).is_empty());
    }

    #[test]
    fn test_static_scene_has_no_motion() {
        let mut det = detector(100.0);
        for _ in 0..5 {
            assert!(det.detect(&background(), None).unwrap().is_empty());
        }
    }

    #[test]
    fn test_freeze_discards_history() {
        let mut det = detector(100.0);
        det.detect(&background(), None).unwrap();
        det.detect(&background(), None).unwrap();
        det.freeze(2);
        assert!(det.is_frozen());
        assert!(det.detect(&with_square(100, 60, 60), None).unwrap().is_empty());
        assert!(det.detect(&with_square(100, 60, 60), None).unwrap().is_empty());
        assert!(det.history().is_empty());
        assert!(!det.is_frozen());
    }

    #[test]
    fn test_roi_change_clears_history_and_maps_back() {
        let mut det = detector(100.0);
        det.detect(&background(), None).unwrap();
        det.detect(&background(), None).unwrap();
        assert_eq!(det.history().len(), 2);

        let roi = Region::new(100, 0, 100, 160);
        det.detect(&background(), Some(&roi)).unwrap();
        assert_eq!(det.history().len(), 1);
        det.detect(&background(), Some(&roi)).unwrap();
        let found = det.detect(&with_square(120, 60, 60), Some(&roi)).unwrap();

        assert_eq!(found.len(), 1);
        // Square centered at x=150 in the full 200px frame.
        assert!((found[0].center.0 - 0.75).abs() < 0.02, "cx={}", found[0].center.0);
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let bad = MotionDiffConfig {
            frame_gap: 0,
            ..MotionDiffConfig::default()
        };
        assert!(MotionDiffDetector::new(bad).is_err());
        let bad = MotionDiffConfig {
            detect_scale: 1.5,
            ..MotionDiffConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(MotionDiffConfig::alerting().validate().is_ok());
    }
}
