//! FFmpeg command builder and runner.
//!
//! Only the subset needed to turn a directory of numbered JPEG frames into
//! an H.264 MP4 clip.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{VisionError, VisionResult};

/// Lines of stderr kept for error reports.
const STDERR_TAIL: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input path or image2 pattern
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
        }
    }

    /// Encode a numbered JPEG sequence (`frame_%05d.jpg`) at `fps`.
    pub fn image_sequence(pattern: impl AsRef<Path>, output: impl AsRef<Path>, fps: f64) -> Self {
        Self::new(pattern, output)
            .input_arg("-f")
            .input_arg("image2")
            .input_arg("-framerate")
            .input_arg(format!("{:.3}", fps))
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(format)
    }

    /// Move the MP4 index to the front so clips play while downloading.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        // Progress keys go to stderr next to the error log.
        let mut args: Vec<String> = ["-y", "-v", "error", "-progress", "pipe:2"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Encoding progress reported by `-progress pipe:2`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeProgress {
    pub frame: u64,
    pub fps: f64,
    pub done: bool,
}

/// Runs one FFmpeg command. Dropping the future kills the process.
pub struct FfmpegRunner {
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> VisionResult<()> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| VisionError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VisionError::internal("ffmpeg stderr not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        let stderr_handle = tokio::spawn(async move {
            let mut progress = EncodeProgress::default();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            while let Ok(Some(line)) = reader.next_line().await {
                if parse_progress_line(&line, &mut progress) {
                    if progress.done {
                        debug!(frames = progress.frame, "FFmpeg encode finished");
                    }
                    continue;
                }
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let result = self.wait_for_completion(&mut child).await;
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        match result {
            Err(VisionError::FfmpegFailed {
                message, exit_code, ..
            }) => Err(VisionError::ffmpeg_failed(
                message,
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                exit_code,
            )),
            other => other,
        }
    }

    /// Wait for the child, killing it once the timeout passes.
    async fn wait_for_completion(&self, child: &mut Child) -> VisionResult<()> {
        let status = match self.timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(std::time::Duration::from_secs(secs), child.wait()).await
                {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!(timeout_s = secs, "FFmpeg timed out, killing process");
                        let _ = child.kill().await;
                        return Err(VisionError::Timeout(secs));
                    }
                }
            }
            None => child.wait().await?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(VisionError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Fold one `-progress` line into `current`. Returns false for lines that
/// are not progress keys.
fn parse_progress_line(line: &str, current: &mut EncodeProgress) -> bool {
    let Some((key, value)) = line.trim().split_once('=') else {
        return false;
    };
    match key {
        "frame" => {
            if let Ok(frame) = value.trim().parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.trim().parse() {
                current.fps = fps;
            }
        }
        "progress" => current.done = value.trim() == "end",
        "out_time_ms" | "out_time_us" | "out_time" | "bitrate" | "total_size" | "speed"
        | "dup_frames" | "drop_frames" | "stream_0_0_q" => {}
        _ => return false,
    }
    true
}

/// Check FFmpeg is available.
pub fn check_ffmpeg() -> VisionResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| VisionError::FfmpegNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_sequence_args() {
        let cmd = FfmpegCommand::image_sequence("/tmp/ep/frame_%05d.jpg", "/tmp/out.mp4", 2.0)
            .video_codec("libx264")
            .pixel_format("yuv420p")
            .faststart();
        let args = cmd.build_args();

        assert_eq!(&args[..6], &["-y", "-v", "error", "-progress", "pipe:2", "-f"]);
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/tmp/ep/frame_%05d.jpg");
        assert!(args[..i].contains(&"-framerate".to_string()));
        assert!(args[..i].contains(&"2.000".to_string()));
        assert!(args[i..].windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_parse_progress_lines() {
        let mut progress = EncodeProgress::default();
        assert!(parse_progress_line("frame=42", &mut progress));
        assert!(parse_progress_line("fps=12.5", &mut progress));
        assert!(!progress.done);
        assert!(parse_progress_line("progress=end", &mut progress));
        assert_eq!(progress.frame, 42);
        assert_eq!(progress.fps, 12.5);
        assert!(progress.done);

        assert!(!parse_progress_line("[image2 @ 0x1] Could not open file", &mut progress));
        assert!(!parse_progress_line("Error while decoding", &mut progress));
    }
}
