//! Motion clip encoding.
//!
//! An episode's JPEG frames are written into a scratch directory, encoded
//! to H.264 MP4 with FFmpeg and moved into the clip directory under a
//! timestamped name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{VisionError, VisionResult};
use crate::fs_utils::move_file;

/// Clip output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipConfig {
    pub clip_dir: PathBuf,
    /// Playback rate; usually the inverse of the capture sampling interval.
    pub playback_fps: f64,
    pub crf: u8,
    pub preset: String,
    pub timeout_secs: u64,
    /// Clips kept in `clip_dir`; older ones are pruned.
    pub retention: usize,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            clip_dir: PathBuf::from("clips"),
            playback_fps: 2.0,
            crf: 28,
            preset: "veryfast".to_string(),
            timeout_secs: 120,
            retention: 50,
        }
    }
}

impl ClipConfig {
    pub fn validate(&self) -> VisionResult<()> {
        if self.playback_fps <= 0.0 {
            return Err(VisionError::invalid_config("playback_fps must be positive"));
        }
        if self.crf > 51 {
            return Err(VisionError::invalid_config("crf must be in [0, 51]"));
        }
        if self.retention == 0 {
            return Err(VisionError::invalid_config("clip retention must be at least 1"));
        }
        Ok(())
    }
}

/// File name for a clip that started at `started_at`.
pub fn clip_file_name(started_at: DateTime<Utc>, id: &str) -> String {
    format!("{}_{}.mp4", started_at.format("%Y%m%dT%H%M%S"), id)
}

/// Encodes episodes into the clip directory.
#[derive(Debug, Clone)]
pub struct ClipEncoder {
    config: ClipConfig,
}

impl ClipEncoder {
    pub fn new(config: ClipConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClipConfig {
        &self.config
    }

    /// Build the FFmpeg command for a frame directory.
    pub fn command(&self, frame_dir: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::image_sequence(
            frame_dir.join("frame_%05d.jpg"),
            output,
            self.config.playback_fps,
        )
        // libx264 with yuv420p needs even dimensions
        .video_filter("scale=trunc(iw/2)*2:trunc(ih/2)*2")
        .video_codec("libx264")
        .preset(self.config.preset.clone())
        .crf(self.config.crf)
        .pixel_format("yuv420p")
        .faststart()
    }

    /// Encode `frames` and store the clip. Returns the stored path.
    pub async fn encode(
        &self,
        frames: &[Vec<u8>],
        started_at: DateTime<Utc>,
        id: &str,
    ) -> VisionResult<PathBuf> {
        if frames.is_empty() {
            return Err(VisionError::internal("episode has no frames to encode"));
        }

        let scratch = tempfile::Builder::new().prefix("pancam-clip-").tempdir()?;
        for (i, jpeg) in frames.iter().enumerate() {
            fs::write(scratch.path().join(format!("frame_{i:05}.jpg")), jpeg).await?;
        }

        let encoded = scratch.path().join("clip.mp4");
        let cmd = self.command(scratch.path(), &encoded);
        FfmpegRunner::new()
            .with_timeout(self.config.timeout_secs)
            .run(&cmd)
            .await?;

        let stored = self.config.clip_dir.join(clip_file_name(started_at, id));
        move_file(&encoded, &stored).await?;

        info!(
            episode_id = %id,
            frames = frames.len(),
            path = %stored.display(),
            "Motion clip stored"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clip_file_name_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 1).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let a = clip_file_name(early, "zz");
        let b = clip_file_name(late, "aa");
        assert_eq!(a, "20260309T235901_zz.mp4");
        assert!(a < b);
    }

    #[test]
    fn test_command_targets_frame_pattern() {
        let encoder = ClipEncoder::new(ClipConfig::default());
        let args = encoder
            .command(Path::new("/tmp/ep"), Path::new("/tmp/ep/clip.mp4"))
            .build_args();
        assert!(args.contains(&"/tmp/ep/frame_%05d.jpg".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "28"]));
    }

    #[test]
    fn test_config_validation() {
        assert!(ClipConfig::default().validate().is_ok());
        let bad = ClipConfig {
            retention: 0,
            ..ClipConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_encode_rejects_empty_episode() {
        let encoder = ClipEncoder::new(ClipConfig::default());
        let err = encoder.encode(&[], Utc::now(), "empty").await.unwrap_err();
        assert!(matches!(err, VisionError::Internal(_)));
    }
}
