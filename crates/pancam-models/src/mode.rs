//! Operating modes of the daemon.
//!
//! - `Track`: motion-difference steering
//! - `Face`: face/cat steering with the cascade and neural detectors
//! - `Alert`: motion alerting and clip capture, no steering
//! - `Watch`: motion steering and alerting on the same frames

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModelError, ModelResult};

/// Which pipelines run for each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Track,
    Face,
    Alert,
    Watch,
}

impl OperatingMode {
    /// All available modes.
    pub const ALL: &'static [OperatingMode] = &[
        OperatingMode::Track,
        OperatingMode::Face,
        OperatingMode::Alert,
        OperatingMode::Watch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Track => "track",
            OperatingMode::Face => "face",
            OperatingMode::Alert => "alert",
            OperatingMode::Watch => "watch",
        }
    }

    /// Returns true if this mode emits steering commands.
    pub fn steers(&self) -> bool {
        !matches!(self, OperatingMode::Alert)
    }

    /// Returns true if this mode runs the motion event controller.
    pub fn alerts(&self) -> bool {
        matches!(self, OperatingMode::Alert | OperatingMode::Watch)
    }

    /// Returns true if this mode needs the motion-difference detector.
    pub fn uses_motion(&self) -> bool {
        !matches!(self, OperatingMode::Face)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        match s.to_lowercase().as_str() {
            "track" | "motion" => Ok(OperatingMode::Track),
            "face" => Ok(OperatingMode::Face),
            "alert" => Ok(OperatingMode::Alert),
            "watch" | "tee" => Ok(OperatingMode::Watch),
            _ => Err(ModelError::UnknownMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("track".parse::<OperatingMode>().unwrap(), OperatingMode::Track);
        assert_eq!("motion".parse::<OperatingMode>().unwrap(), OperatingMode::Track);
        assert_eq!("FACE".parse::<OperatingMode>().unwrap(), OperatingMode::Face);
        assert_eq!("tee".parse::<OperatingMode>().unwrap(), OperatingMode::Watch);
        assert_eq!(
            "pan".parse::<OperatingMode>(),
            Err(ModelError::UnknownMode("pan".to_string()))
        );
    }

    #[test]
    fn test_mode_capabilities() {
        assert!(OperatingMode::Track.steers());
        assert!(!OperatingMode::Track.alerts());
        assert!(!OperatingMode::Alert.steers());
        assert!(OperatingMode::Watch.steers() && OperatingMode::Watch.alerts());
        assert!(!OperatingMode::Face.uses_motion());
    }
}
