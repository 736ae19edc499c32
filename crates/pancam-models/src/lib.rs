//! Shared data models for the pan camera tracker.
//!
//! This crate provides Serde-serializable types for:
//! - Detections produced by every detection strategy
//! - Steering commands consumed by actuators
//! - Operating modes of the daemon
//! - The line protocol written to stdout

pub mod detection;
pub mod error;
pub mod mode;
pub mod protocol;

// Re-export common types
pub use detection::{Detection, Label, SteerCommand};
pub use error::{ModelError, ModelResult};
pub use mode::OperatingMode;
pub use protocol::{ProtocolFormat, Record};

use serde::{Deserialize, Serialize};

/// A normalized rectangle (0.0 to 1.0) representing a relative region of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    /// X coordinate of the top-left corner (0.0 = left, 1.0 = right)
    pub x: f64,
    /// Y coordinate of the top-left corner (0.0 = top, 1.0 = bottom)
    pub y: f64,
    /// Width of the rectangle (0.0 to 1.0)
    pub width: f64,
    /// Height of the rectangle (0.0 to 1.0)
    pub height: f64,
}

impl NormalizedRect {
    /// Create a new normalized rectangle.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Create a rectangle clamped into the unit square.
    ///
    /// The origin is clamped first, then the extent is shrunk so that
    /// `x + width <= 1` and `y + height <= 1` hold.
    pub fn clamped(x: f64, y: f64, width: f64, height: f64) -> Self {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        let width = width.max(0.0).min(1.0 - x);
        let height = height.max(0.0).min(1.0 - y);
        Self { x, y, width, height }
    }

    /// Check if the rectangle is valid (within 0.0-1.0 range).
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.001 // Allow small epsilon for float precision
            && self.y + self.height <= 1.001
    }

    /// Area as a fraction of the frame.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Center point.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_stays_inside_unit_square() {
        let rect = NormalizedRect::clamped(0.9, -0.2, 0.5, 0.4);
        assert_eq!(rect.x, 0.9);
        assert_eq!(rect.y, 0.0);
        assert!((rect.width - 0.1).abs() < 1e-12);
        assert!(rect.x + rect.width <= 1.0);
        assert!(rect.is_valid());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123_456, 4), 0.1235);
        assert_eq!(round_to(0.98765, 3), 0.988);
    }
}
