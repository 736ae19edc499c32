//! Detection records and steering commands.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::NormalizedRect;

/// Class of the detected subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Face,
    Cat,
    Motion,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Face => "face",
            Label::Cat => "cat",
            Label::Motion => "motion",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single detection in normalized full-frame coordinates.
///
/// Every strategy produces this record, so selection and control never need
/// to know which detector found the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Centroid `(x, y)` in `[0, 1]`.
    pub center: (f64, f64),
    /// Bounding box, always inside the unit square.
    pub bbox: NormalizedRect,
    /// Confidence in `[0, 1]`.
    pub score: f64,
    pub label: Label,
    /// Contour area in detection-canvas pixels (motion detections only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
}

impl Detection {
    /// Build a detection, clamping the box and centroid into the frame.
    pub fn new(center: (f64, f64), bbox: NormalizedRect, score: f64, label: Label) -> Self {
        let bbox = NormalizedRect::clamped(bbox.x, bbox.y, bbox.width, bbox.height);
        Self {
            center: (center.0.clamp(0.0, 1.0), center.1.clamp(0.0, 1.0)),
            bbox,
            score: score.clamp(0.0, 1.0),
            label,
            area: None,
        }
    }

    /// Attach the motion contour area.
    pub fn with_area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }

    /// Normalized bounding box area, used as a selection tie-break.
    pub fn bbox_area(&self) -> f64 {
        self.bbox.area()
    }
}

/// Relative pan command in degrees.
///
/// Positive values pan toward the left of the image, matching the servo
/// mounting of the original rig: a subject right of center yields a
/// negative delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteerCommand {
    pub delta_degrees: i32,
}

impl SteerCommand {
    pub fn new(delta_degrees: i32) -> Self {
        Self { delta_degrees }
    }
}

impl fmt::Display for SteerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.delta_degrees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_is_clamped() {
        let det = Detection::new(
            (1.2, -0.1),
            NormalizedRect::new(0.8, 0.5, 0.4, 0.7),
            1.4,
            Label::Face,
        );
        assert_eq!(det.center, (1.0, 0.0));
        assert!(det.bbox.x + det.bbox.width <= 1.0);
        assert!(det.bbox.y + det.bbox.height <= 1.0);
        assert_eq!(det.score, 1.0);
    }

    #[test]
    fn test_label_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Label::Cat).unwrap(), "\"cat\"");
        assert_eq!(Label::Motion.to_string(), "motion");
    }
}
