//! Haar cascade face / cat detector.
//!
//! Requires the `opencv` feature. Without it construction fails with a
//! configuration error so the daemon can refuse the mode at startup.

use std::path::PathBuf;

#[cfg(feature = "opencv")]
use tracing::{debug, info};

use pancam_models::Detection;
#[cfg(feature = "opencv")]
use pancam_models::Label;

use super::DetectionStrategy;
use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;
use crate::roi::Region;

/// Default Haar cascade locations on Debian/Raspberry Pi OS.
pub const FACE_CASCADE_PATH: &str =
    "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml";
pub const CAT_CASCADE_PATH: &str =
    "/usr/share/opencv4/haarcascades/haarcascade_frontalcatface_extended.xml";

/// Tuning for [`FaceCascadeDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeConfig {
    /// Frontal face cascade; `None` disables face detection.
    pub face_cascade: Option<PathBuf>,
    /// Cat face cascade; `None` disables cat detection.
    pub cat_cascade: Option<PathBuf>,
    pub detect_scale: f64,
    pub scale_factor: f64,
    pub min_neighbors: i32,
    /// Minimum box side as a fraction of the canvas width.
    pub min_size_frac: f64,
    /// Score reported for non-face classes.
    pub cat_score: f64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            face_cascade: Some(PathBuf::from(FACE_CASCADE_PATH)),
            cat_cascade: None,
            detect_scale: 0.5,
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size_frac: 0.05,
            cat_score: 0.7,
        }
    }
}

impl CascadeConfig {
    /// Cat-only fallback cascade.
    pub fn cats() -> Self {
        Self {
            face_cascade: None,
            cat_cascade: Some(PathBuf::from(CAT_CASCADE_PATH)),
            detect_scale: 1.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> VisionResult<()> {
        if self.face_cascade.is_none() && self.cat_cascade.is_none() {
            return Err(VisionError::invalid_config("no cascade configured"));
        }
        if self.detect_scale <= 0.0 || self.detect_scale > 1.0 {
            return Err(VisionError::invalid_config("cascade detect_scale must be in (0, 1]"));
        }
        if self.scale_factor <= 1.0 {
            return Err(VisionError::invalid_config("cascade scale_factor must exceed 1.0"));
        }
        if self.min_neighbors < 0 {
            return Err(VisionError::invalid_config("cascade min_neighbors must not be negative"));
        }
        if !(0.0..1.0).contains(&self.min_size_frac) {
            return Err(VisionError::invalid_config("cascade min_size_frac must be in [0, 1)"));
        }
        Ok(())
    }

    /// Minimum detection side in canvas pixels.
    pub fn min_size_px(&self, canvas_width: u32) -> i32 {
        (canvas_width as f64 * self.min_size_frac) as i32
    }

    #[cfg(feature = "opencv")]
    fn cascades(&self) -> impl Iterator<Item = (Label, &PathBuf)> {
        self.face_cascade
            .iter()
            .map(|p| (Label::Face, p))
            .chain(self.cat_cascade.iter().map(|p| (Label::Cat, p)))
    }
}

/// Map an unbounded cascade level weight into `[0, 1]`.
pub fn level_weight_score(weight: f64) -> f64 {
    1.0 / (1.0 + (-weight).exp())
}

#[cfg(feature = "opencv")]
pub struct FaceCascadeDetector {
    config: CascadeConfig,
    classifiers: Vec<(Label, opencv::objdetect::CascadeClassifier)>,
}

#[cfg(feature = "opencv")]
impl FaceCascadeDetector {
    pub fn new(config: CascadeConfig) -> VisionResult<Self> {
        use opencv::objdetect::CascadeClassifier;
        use opencv::prelude::CascadeClassifierTraitConst;

        config.validate()?;

        let mut classifiers = Vec::new();
        for (label, path) in config.cascades() {
            if !path.exists() {
                return Err(VisionError::model_not_found(path.clone()));
            }
            let path_str = path.to_string_lossy();
            let classifier = CascadeClassifier::new(&path_str)?;
            if classifier.empty()? {
                return Err(VisionError::invalid_config(format!(
                    "failed to load cascade from {path_str}"
                )));
            }
            info!(label = %label, path = %path_str, "Cascade classifier loaded");
            classifiers.push((label, classifier));
        }

        Ok(Self { config, classifiers })
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }
}

#[cfg(feature = "opencv")]
impl DetectionStrategy for FaceCascadeDetector {
    fn name(&self) -> &'static str {
        "face_cascade"
    }

    fn detect(&mut self, frame: &Frame, roi: Option<&Region>) -> VisionResult<Vec<Detection>> {
        use opencv::core::{Mat, Rect, Size, Vector};
        use opencv::imgproc;
        use opencv::prelude::{CascadeClassifierTrait, MatTraitConst};

        use super::{pixel_box_detection, scaled_size};
        use crate::roi::map_region;

        let gray = super::cv::decode(frame, opencv::imgcodecs::IMREAD_GRAYSCALE, roi)?;
        let (sw, sh) = scaled_size(gray.cols() as u32, gray.rows() as u32, self.config.detect_scale);

        let mut small = Mat::default();
        imgproc::resize(
            &gray,
            &mut small,
            Size::new(sw as i32, sh as i32),
            0.0,
            0.0,
            imgproc::INTER_AREA,
        )?;
        let mut equalized = Mat::default();
        imgproc::equalize_hist(&small, &mut equalized)?;

        let min_px = self.config.min_size_px(sw);
        let min_size = Size::new(min_px, min_px);

        let mut detections = Vec::new();
        for (label, classifier) in &mut self.classifiers {
            let mut objects = Vector::<Rect>::new();
            let mut reject_levels = Vector::<i32>::new();
            let mut level_weights = Vector::<f64>::new();
            classifier.detect_multi_scale3(
                &equalized,
                &mut objects,
                &mut reject_levels,
                &mut level_weights,
                self.config.scale_factor,
                self.config.min_neighbors,
                0,
                min_size,
                Size::default(),
                true,
            )?;

            for (i, rect) in objects.iter().enumerate() {
                if rect.width < min_px || rect.height < min_px {
                    continue;
                }
                let score = match label {
                    Label::Face => level_weights
                        .get(i)
                        .map(level_weight_score)
                        .unwrap_or(self.config.cat_score),
                    _ => self.config.cat_score,
                };
                if let Some(det) = pixel_box_detection(
                    rect.x as f64,
                    rect.y as f64,
                    rect.width as f64,
                    rect.height as f64,
                    (sw, sh),
                    score,
                    *label,
                ) {
                    detections.push(map_region(&det, roi, frame.size()));
                }
            }
        }

        debug!(candidates = detections.len(), "cascade detection finished");
        Ok(detections)
    }
}

/// Stub for when OpenCV is not available
#[cfg(not(feature = "opencv"))]
pub struct FaceCascadeDetector {
    _config: CascadeConfig,
}

#[cfg(not(feature = "opencv"))]
impl FaceCascadeDetector {
    pub fn new(config: CascadeConfig) -> VisionResult<Self> {
        config.validate()?;
        Err(VisionError::invalid_config(
            "cascade detection requires the opencv feature",
        ))
    }
}

#[cfg(not(feature = "opencv"))]
impl DetectionStrategy for FaceCascadeDetector {
    fn name(&self) -> &'static str {
        "face_cascade"
    }

    fn detect(&mut self, _frame: &Frame, _roi: Option<&Region>) -> VisionResult<Vec<Detection>> {
        Err(VisionError::detection_failed("OpenCV feature not enabled"))
    }
}
