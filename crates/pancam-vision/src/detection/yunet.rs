//! YuNet neural face detector.
//!
//! Two detector instances are created up front: one sized for the full
//! frame and one for a cropped region. `detect` picks the profile from
//! whether an ROI is given, so nothing is re-initialized per frame.
//!
//! YuNet output format per row:
//! [x, y, w, h, x_re, y_re, x_le, y_le, x_n, y_n, x_ml, y_ml, x_mr, y_mr, score]

use std::path::{Path, PathBuf};

use tracing::debug;
#[cfg(feature = "opencv")]
use tracing::{info, warn};

use pancam_models::Detection;

use super::DetectionStrategy;
use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;
use crate::roi::Region;

/// Smallest plausible YuNet model file; anything below is treated as corrupt.
const MIN_MODEL_BYTES: u64 = 50_000;

/// Tuning for [`NeuralFaceDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct NeuralFaceConfig {
    pub model_path: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: i32,
    /// Network input for full-frame passes.
    pub full_input: (u32, u32),
    /// Network input for cropped passes.
    pub cropped_input: (u32, u32),
}

impl Default for NeuralFaceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 5000,
            full_input: (640, 480),
            cropped_input: (320, 320),
        }
    }
}

impl NeuralFaceConfig {
    pub fn validate(&self) -> VisionResult<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(VisionError::invalid_config("score_threshold must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(VisionError::invalid_config("nms_threshold must be in [0, 1]"));
        }
        for (w, h) in [self.full_input, self.cropped_input] {
            if w == 0 || h == 0 {
                return Err(VisionError::invalid_config("network input size must be positive"));
            }
        }
        check_model_file(&self.model_path)
    }

    /// Input size of the profile selected by `cropped`.
    pub fn profile(&self, cropped: bool) -> (u32, u32) {
        if cropped {
            self.cropped_input
        } else {
            self.full_input
        }
    }
}

/// Missing or truncated model files are configuration errors.
pub fn check_model_file(path: &Path) -> VisionResult<()> {
    let metadata = std::fs::metadata(path).map_err(|_| VisionError::model_not_found(path))?;
    if metadata.len() < MIN_MODEL_BYTES {
        return Err(VisionError::invalid_config(format!(
            "YuNet model file appears corrupted (size: {} bytes)",
            metadata.len()
        )));
    }
    debug!(path = %path.display(), bytes = metadata.len(), "YuNet model file present");
    Ok(())
}

#[cfg(feature = "opencv")]
pub struct NeuralFaceDetector {
    config: NeuralFaceConfig,
    full: opencv::core::Ptr<opencv::objdetect::FaceDetectorYN>,
    cropped: opencv::core::Ptr<opencv::objdetect::FaceDetectorYN>,
}

#[cfg(feature = "opencv")]
impl NeuralFaceDetector {
    pub fn new(config: NeuralFaceConfig) -> VisionResult<Self> {
        config.validate()?;
        let full = create_detector(&config, config.full_input)?;
        let cropped = create_detector(&config, config.cropped_input)?;
        info!(
            model = %config.model_path.display(),
            full = ?config.full_input,
            cropped = ?config.cropped_input,
            "YuNet detector initialized"
        );
        Ok(Self {
            config,
            full,
            cropped,
        })
    }
}

/// Create a detector, falling back across DNN backends.
#[cfg(feature = "opencv")]
fn create_detector(
    config: &NeuralFaceConfig,
    input: (u32, u32),
) -> VisionResult<opencv::core::Ptr<opencv::objdetect::FaceDetectorYN>> {
    use opencv::core::Size;
    use opencv::dnn::{DNN_BACKEND_DEFAULT, DNN_BACKEND_OPENCV, DNN_TARGET_CPU};
    use opencv::objdetect::FaceDetectorYN;

    let model = config.model_path.to_string_lossy();
    let backends = [
        (DNN_BACKEND_DEFAULT, DNN_TARGET_CPU, "default"),
        (DNN_BACKEND_OPENCV, DNN_TARGET_CPU, "opencv"),
    ];

    let mut last_error = String::new();
    for (backend_id, target_id, backend_name) in backends {
        match FaceDetectorYN::create(
            &model,
            "",
            Size::new(input.0 as i32, input.1 as i32),
            config.score_threshold,
            config.nms_threshold,
            config.top_k,
            backend_id,
            target_id,
        ) {
            Ok(detector) => {
                debug!("YuNet created with {} backend", backend_name);
                return Ok(detector);
            }
            Err(e) => {
                warn!("YuNet {} backend failed: {}", backend_name, e);
                last_error = e.to_string();
            }
        }
    }

    Err(VisionError::invalid_config(format!(
        "failed to create YuNet detector with any backend: {last_error}"
    )))
}

#[cfg(feature = "opencv")]
impl DetectionStrategy for NeuralFaceDetector {
    fn name(&self) -> &'static str {
        "yunet"
    }

    fn detect(&mut self, frame: &Frame, roi: Option<&Region>) -> VisionResult<Vec<Detection>> {
        use opencv::core::{Mat, Size};
        use opencv::imgproc;
        use opencv::prelude::{FaceDetectorYNTrait, MatTraitConst};
        use pancam_models::Label;

        use super::pixel_box_detection;
        use crate::roi::map_region;

        let roi = roi.filter(|r| !r.is_full(frame.width(), frame.height()));
        let color = super::cv::decode(frame, opencv::imgcodecs::IMREAD_COLOR, roi)?;

        let input = self.config.profile(roi.is_some());
        let size = Size::new(input.0 as i32, input.1 as i32);
        let mut resized = Mat::default();
        imgproc::resize(&color, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;

        let detector = if roi.is_some() {
            &mut self.cropped
        } else {
            &mut self.full
        };
        detector.set_input_size(size)?;

        let mut faces = Mat::default();
        detector.detect(&resized, &mut faces)?;

        if faces.rows() <= 0 {
            return Ok(Vec::new());
        }
        if faces.cols() < 15 {
            warn!("YuNet output has unexpected format: {} columns (expected 15)", faces.cols());
            return Ok(Vec::new());
        }

        let mut detections = Vec::with_capacity(faces.rows() as usize);
        for i in 0..faces.rows() {
            let x = *faces.at_2d::<f32>(i, 0)? as f64;
            let y = *faces.at_2d::<f32>(i, 1)? as f64;
            let w = *faces.at_2d::<f32>(i, 2)? as f64;
            let h = *faces.at_2d::<f32>(i, 3)? as f64;
            let score = *faces.at_2d::<f32>(i, 14)? as f64;
            if score < self.config.score_threshold as f64 {
                continue;
            }
            if let Some(det) = pixel_box_detection(x, y, w, h, input, score, Label::Face) {
                detections.push(map_region(&det, roi, frame.size()));
            }
        }

        debug!(candidates = detections.len(), "YuNet detection finished");
        Ok(detections)
    }
}

/// Stub for when OpenCV is not available
#[cfg(not(feature = "opencv"))]
pub struct NeuralFaceDetector {
    _config: NeuralFaceConfig,
}

#[cfg(not(feature = "opencv"))]
impl NeuralFaceDetector {
    pub fn new(config: NeuralFaceConfig) -> VisionResult<Self> {
        config.validate()?;
        Err(VisionError::invalid_config(
            "neural face detection requires the opencv feature",
        ))
    }
}

#[cfg(not(feature = "opencv"))]
impl DetectionStrategy for NeuralFaceDetector {
    fn name(&self) -> &'static str {
        "yunet"
    }

    fn detect(&mut self, _frame: &Frame, _roi: Option<&Region>) -> VisionResult<Vec<Detection>> {
        Err(VisionError::detection_failed("OpenCV feature not enabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_model_is_config_error() {
        let config = NeuralFaceConfig {
            model_path: PathBuf::from("/nonexistent/yunet.onnx"),
            ..NeuralFaceConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, VisionError::ModelNotFound(_)));
        assert!(err.is_config());
    }

    #[test]
    fn test_truncated_model_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 128]).unwrap();
        let err = check_model_file(file.path()).unwrap_err();
        assert!(matches!(err, VisionError::InvalidConfig(_)));
    }

    #[test]
    fn test_profile_selection() {
        let config = NeuralFaceConfig::default();
        assert_eq!(config.profile(false), (640, 480));
        assert_eq!(config.profile(true), (320, 320));
    }
}
