//! Detection strategies.
//!
//! Every strategy turns one [`Frame`] (optionally restricted to a
//! [`Region`]) into zero or more [`Detection`]s in normalized full-frame
//! coordinates. Strategies are owned by the pipeline as
//! `Box<dyn DetectionStrategy>` and built once at startup.
//!
//! | Strategy | Labels | Score |
//! |----------|--------|-------|
//! | [`MotionDiffDetector`] | motion | fixed 1.0 |
//! | [`FaceCascadeDetector`] | face, cat | level weight / fixed 0.7 |
//! | [`NeuralFaceDetector`] | face | network confidence |

pub mod cascade;
#[cfg(feature = "opencv")]
mod cv;
pub mod motion;
pub mod yunet;

pub use cascade::{CascadeConfig, FaceCascadeDetector};
pub use motion::{FrameHistory, MotionDiffConfig, MotionDiffDetector};
pub use yunet::{NeuralFaceConfig, NeuralFaceDetector};

use pancam_models::{Detection, Label, NormalizedRect};

use crate::error::VisionResult;
use crate::frame::Frame;
use crate::roi::Region;

/// A detector that can be swapped behind the uniform detection record.
pub trait DetectionStrategy: Send {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Detect subjects in `frame`, restricted to `roi` when given.
    ///
    /// Returned detections are already mapped to full-frame coordinates.
    fn detect(&mut self, frame: &Frame, roi: Option<&Region>) -> VisionResult<Vec<Detection>>;

    /// Drop any temporal state (reconnect, mode change).
    fn reset(&mut self) {}
}

/// Canvas size after scaling, never below one pixel.
pub(crate) fn scaled_size(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let sw = ((width as f64 * scale) as u32).max(1);
    let sh = ((height as f64 * scale) as u32).max(1);
    (sw, sh)
}

/// Build a canvas-normalized detection from a pixel box, clamping it to
/// the canvas. Boxes left with no extent are dropped.
#[cfg_attr(not(feature = "opencv"), allow(dead_code))]
pub(crate) fn pixel_box_detection(
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    canvas: (u32, u32),
    score: f64,
    label: Label,
) -> Option<Detection> {
    let (cw, ch) = (canvas.0 as f64, canvas.1 as f64);
    let x0 = x.max(0.0);
    let y0 = y.max(0.0);
    let w = (w - (x0 - x)).min(cw - x0);
    let h = (h - (y0 - y)).min(ch - y0);
    if w <= 0.0 || h <= 0.0 || cw <= 0.0 || ch <= 0.0 {
        return None;
    }
    let bbox = NormalizedRect::new(x0 / cw, y0 / ch, w / cw, h / ch);
    Some(Detection::new(bbox.center(), bbox, score, label))
}
