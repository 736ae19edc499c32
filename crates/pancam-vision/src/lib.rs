//! Perception for the pan camera.
//!
//! This crate provides:
//! - Frame decoding from MJPEG blobs
//! - Interchangeable detection strategies behind [`DetectionStrategy`]
//! - Region-of-interest remapping into full-frame coordinates
//! - Target selection across strategy results
//! - FFmpeg encoding and retention of motion clips

pub mod clip;
pub mod command;
pub mod contour;
pub mod detection;
pub mod error;
pub mod frame;
pub mod fs_utils;
pub mod roi;
pub mod selector;

pub use clip::{clip_file_name, ClipConfig, ClipEncoder};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use detection::{
    CascadeConfig, DetectionStrategy, FaceCascadeDetector, MotionDiffConfig, MotionDiffDetector,
    NeuralFaceConfig, NeuralFaceDetector,
};
pub use error::{VisionError, VisionResult};
pub use frame::Frame;
pub use fs_utils::{move_file, prune_clips};
pub use roi::{map_region, to_full, Region};
pub use selector::select_target;
