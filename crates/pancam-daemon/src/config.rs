//! Daemon configuration.
//!
//! Every knob is read from one environment variable (after `.env` has been
//! loaded by the binary). The stream URL may also be given as the first
//! non-flag command line argument, which wins over `PANCAM_STREAM_URL`.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pancam_control::{MotionEventConfig, SteeringConfig};
use pancam_models::{OperatingMode, ProtocolFormat};
use pancam_notify::TelegramConfig;
use pancam_vision::{CascadeConfig, ClipConfig, MotionDiffConfig, NeuralFaceConfig};
use url::Url;

use crate::error::{DaemonError, DaemonResult};

pub const DEFAULT_STREAM_URL: &str = "http://localhost:3000/camera/stream";

/// MJPEG source settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    /// Frames arriving faster than this are dropped before decoding.
    pub max_fps: f64,
    pub startup_attempts: u32,
    pub startup_backoff: Duration,
    /// Timeout of each startup probe request.
    pub probe_timeout: Duration,
    /// Stream is considered lost when no frame arrives for this long.
    pub read_timeout: Duration,
    pub reconnect_backoff: Duration,
    /// Upper bound on a single JPEG; larger blobs are discarded.
    pub max_frame_bytes: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            max_fps: 10.0,
            startup_attempts: 30,
            startup_backoff: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(20),
            reconnect_backoff: Duration::from_secs(2),
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Face steering strategies, in priority order: neural, cascade, cats.
#[derive(Debug, Clone)]
pub struct FaceConfig {
    pub neural: Option<NeuralFaceConfig>,
    pub cascade: Option<CascadeConfig>,
    pub cats: Option<CascadeConfig>,
    /// Candidates below this score are ignored.
    pub min_score: f64,
    /// Padding of the region searched around the last target, as a fraction
    /// of its box. Zero searches the full frame every time.
    pub roi_padding: f64,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            neural: Some(NeuralFaceConfig::default()),
            cascade: None,
            cats: Some(CascadeConfig::cats()),
            min_score: 0.5,
            roi_padding: 1.0,
        }
    }
}

/// How steering commands leave the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorConfig {
    /// Report `MOVE <d>` on stdout for a host process.
    Line,
    /// Drive the PCA9685 servo daemon directly.
    ServoDaemon {
        program: String,
        args: Vec<String>,
        channel: u8,
    },
}

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    /// `None` when credentials are missing.
    pub telegram: Option<TelegramConfig>,
    /// Send the startup message in alerting modes.
    pub announce: bool,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub mode: OperatingMode,
    pub protocol: ProtocolFormat,
    pub source: SourceConfig,
    pub motion: MotionDiffConfig,
    pub steering: SteeringConfig,
    pub events: MotionEventConfig,
    pub face: FaceConfig,
    pub clip: ClipConfig,
    pub notify: NotifyConfig,
    pub actuator: ActuatorConfig,
    pub metrics_addr: Option<SocketAddr>,
    /// Cap on how long shutdown waits for episode workers. `None` waits
    /// for every worker.
    pub shutdown_timeout: Option<Duration>,
}

impl DaemonConfig {
    /// Built-in defaults for `mode`.
    pub fn defaults_for(mode: OperatingMode) -> Self {
        let motion = match mode {
            OperatingMode::Alert => MotionDiffConfig::alerting(),
            _ => MotionDiffConfig::default(),
        };
        let steering = match mode {
            OperatingMode::Face => SteeringConfig::default(),
            _ => SteeringConfig::motion(),
        };
        let events = MotionEventConfig::default();
        let clip = ClipConfig {
            playback_fps: 1.0 / events.sample_interval_s,
            ..ClipConfig::default()
        };
        Self {
            mode,
            protocol: ProtocolFormat::default(),
            source: SourceConfig::default(),
            motion,
            steering,
            events,
            face: FaceConfig::default(),
            clip,
            notify: NotifyConfig {
                telegram: None,
                announce: true,
            },
            actuator: ActuatorConfig::Line,
            metrics_addr: None,
            shutdown_timeout: None,
        }
    }

    /// Load from the process environment and command line.
    pub fn from_env() -> DaemonResult<Self> {
        Self::from_env_with_args(std::env::args().skip(1))
    }

    pub fn from_env_with_args(args: impl IntoIterator<Item = String>) -> DaemonResult<Self> {
        let mode: OperatingMode = parse_var("PANCAM_MODE", OperatingMode::default())?;
        let mut config = Self::defaults_for(mode);

        config.protocol = parse_var("PANCAM_PROTOCOL", config.protocol)?;

        let url_arg = args.into_iter().find(|a| !a.starts_with("--"));
        if let Some(raw) = url_arg.or_else(|| var("PANCAM_STREAM_URL")) {
            config.source.url = raw;
        }
        let source = &mut config.source;
        source.max_fps = parse_var("PANCAM_MAX_FPS", source.max_fps)?;
        source.startup_attempts = parse_var("PANCAM_STARTUP_ATTEMPTS", source.startup_attempts)?;
        source.startup_backoff = secs_var("PANCAM_STARTUP_BACKOFF_S", source.startup_backoff)?;
        source.read_timeout = secs_var("PANCAM_READ_TIMEOUT_S", source.read_timeout)?;
        source.reconnect_backoff =
            secs_var("PANCAM_RECONNECT_BACKOFF_S", source.reconnect_backoff)?;

        let motion = &mut config.motion;
        motion.diff_threshold = parse_var("PANCAM_DIFF_THRESHOLD", motion.diff_threshold)?;
        motion.min_area = parse_var("PANCAM_MIN_AREA", motion.min_area)?;
        motion.frame_gap = parse_var("PANCAM_FRAME_GAP", motion.frame_gap)?;
        motion.detect_scale = parse_var("PANCAM_DETECT_SCALE", motion.detect_scale)?;

        let steering = &mut config.steering;
        steering.kp = parse_var("PANCAM_KP", steering.kp)?;
        steering.dead_zone_frac = parse_var("PANCAM_DEAD_ZONE", steering.dead_zone_frac)?;
        steering.min_delta = parse_var("PANCAM_MIN_DELTA", steering.min_delta)?;
        steering.max_delta = parse_var("PANCAM_MAX_DELTA", steering.max_delta)?;
        steering.cooldown_s = parse_var("PANCAM_COOLDOWN_S", steering.cooldown_s)?;
        steering.freeze_ticks = parse_var("PANCAM_MOVE_FREEZE_FRAMES", steering.freeze_ticks)?;
        steering.idle_scan = bool_var("PANCAM_IDLE_SCAN", steering.idle_scan)?;
        steering.idle_timeout_s = parse_var("PANCAM_IDLE_TIMEOUT_S", steering.idle_timeout_s)?;
        steering.scan_step = parse_var("PANCAM_SCAN_STEP", steering.scan_step)?;
        steering.scan_interval_s = parse_var("PANCAM_SCAN_INTERVAL_S", steering.scan_interval_s)?;
        steering.sweep_min = parse_var("PANCAM_SWEEP_MIN", steering.sweep_min)?;
        steering.sweep_max = parse_var("PANCAM_SWEEP_MAX", steering.sweep_max)?;
        steering.initial_angle = parse_var("PANCAM_INITIAL_ANGLE", steering.initial_angle)?;

        let events = &mut config.events;
        events.min_area = parse_var("PANCAM_ALERT_MIN_AREA", events.min_area)?;
        events.alert_cooldown_s = parse_var("PANCAM_ALERT_COOLDOWN_S", events.alert_cooldown_s)?;
        events.quiet_debounce_s = parse_var("PANCAM_QUIET_DEBOUNCE_S", events.quiet_debounce_s)?;
        events.sample_interval_s = parse_var("PANCAM_SAMPLE_INTERVAL_S", events.sample_interval_s)?;
        events.max_frames = parse_var("PANCAM_MAX_FRAMES", events.max_frames)?;
        events.freeze_ticks = parse_var("PANCAM_ALERT_FREEZE_FRAMES", events.freeze_ticks)?;

        config.face = face_from_env(config.face)?;

        let clip = &mut config.clip;
        clip.playback_fps = 1.0 / config.events.sample_interval_s;
        if let Some(dir) = var("PANCAM_CLIP_DIR") {
            clip.clip_dir = PathBuf::from(dir);
        }
        clip.retention = parse_var("PANCAM_CLIP_RETENTION", clip.retention)?;
        clip.crf = parse_var("PANCAM_CLIP_CRF", clip.crf)?;
        clip.timeout_secs = parse_var("PANCAM_CLIP_TIMEOUT_S", clip.timeout_secs)?;

        config.notify = NotifyConfig {
            telegram: match (var("TELEGRAM_TOKEN"), var("TELEGRAM_CHAT_ID")) {
                (Some(token), Some(chat_id)) => Some(TelegramConfig::new(token, chat_id)),
                _ => None,
            },
            announce: bool_var("PANCAM_ANNOUNCE", config.notify.announce)?,
        };

        config.actuator = match var("PANCAM_ACTUATOR").as_deref() {
            None | Some("line") => ActuatorConfig::Line,
            Some("servo") => {
                let command = var("PANCAM_SERVO_CMD").unwrap_or_else(|| "python3 servo.py".into());
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts
                    .next()
                    .ok_or_else(|| DaemonError::config("PANCAM_SERVO_CMD is empty"))?;
                ActuatorConfig::ServoDaemon {
                    program,
                    args: parts.collect(),
                    channel: parse_var("PANCAM_SERVO_CHANNEL", 0u8)?,
                }
            }
            Some(other) => {
                return Err(DaemonError::config(format!(
                    "PANCAM_ACTUATOR must be line or servo, got {other}"
                )))
            }
        };

        config.metrics_addr = match var("PANCAM_METRICS_ADDR") {
            Some(raw) => Some(raw.parse().map_err(|e| {
                DaemonError::config(format!("invalid PANCAM_METRICS_ADDR {raw}: {e}"))
            })?),
            None => None,
        };
        if var("PANCAM_SHUTDOWN_TIMEOUT_S").is_some() {
            let timeout = secs_var("PANCAM_SHUTDOWN_TIMEOUT_S", Duration::ZERO)?;
            config.shutdown_timeout = Some(timeout);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> DaemonResult<()> {
        if !(self.source.max_fps.is_finite() && self.source.max_fps > 0.0) {
            return Err(DaemonError::config("PANCAM_MAX_FPS must be positive"));
        }
        if self.source.startup_attempts == 0 {
            return Err(DaemonError::config("PANCAM_STARTUP_ATTEMPTS must be at least 1"));
        }
        let url = Url::parse(&self.source.url).map_err(|e| {
            DaemonError::config(format!("invalid stream URL {}: {e}", self.source.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DaemonError::config(format!(
                "stream URL must be http or https: {url}"
            )));
        }
        if self.mode.uses_motion() {
            self.motion.validate()?;
        }
        if self.mode.steers() {
            self.steering.validate()?;
        }
        if self.mode.alerts() {
            self.events.validate()?;
            self.clip.validate()?;
        }
        if self.mode == OperatingMode::Face {
            let face = &self.face;
            if face.neural.is_none() && face.cascade.is_none() && face.cats.is_none() {
                return Err(DaemonError::config("face mode needs at least one detector"));
            }
            if !(0.0..=1.0).contains(&face.min_score) {
                return Err(DaemonError::config("PANCAM_FACE_MIN_SCORE must be in [0, 1]"));
            }
            if face.roi_padding < 0.0 {
                return Err(DaemonError::config("PANCAM_ROI_PADDING must not be negative"));
            }
        }
        Ok(())
    }
}

fn face_from_env(mut face: FaceConfig) -> DaemonResult<FaceConfig> {
    if bool_var("PANCAM_FACE_NEURAL", face.neural.is_some())? {
        let mut neural = face.neural.unwrap_or_default();
        if let Some(path) = var("PANCAM_FACE_MODEL") {
            neural.model_path = PathBuf::from(path);
        }
        neural.score_threshold = parse_var("PANCAM_FACE_THRESHOLD", neural.score_threshold)?;
        face.neural = Some(neural);
    } else {
        face.neural = None;
        // Without the network the frontal cascade is the face detector.
        face.cascade.get_or_insert_with(CascadeConfig::default);
    }

    let min_size = parse_var("PANCAM_FACE_MIN_SIZE", CascadeConfig::default().min_size_frac)?;
    face.cascade = optional_path("PANCAM_FACE_CASCADE", face.cascade, |path| CascadeConfig {
        face_cascade: Some(path),
        ..CascadeConfig::default()
    });
    face.cats = optional_path("PANCAM_CAT_CASCADE", face.cats, |path| CascadeConfig {
        cat_cascade: Some(path),
        ..CascadeConfig::cats()
    });
    for cascade in face.cascade.iter_mut().chain(face.cats.iter_mut()) {
        cascade.min_size_frac = min_size;
    }

    face.min_score = parse_var("PANCAM_FACE_MIN_SCORE", face.min_score)?;
    face.roi_padding = parse_var("PANCAM_ROI_PADDING", face.roi_padding)?;
    Ok(face)
}

/// `none` disables, a path replaces, unset keeps `current`.
fn optional_path(
    key: &str,
    current: Option<CascadeConfig>,
    build: impl FnOnce(PathBuf) -> CascadeConfig,
) -> Option<CascadeConfig> {
    match var(key) {
        Some(raw) if raw.eq_ignore_ascii_case("none") => None,
        Some(raw) => Some(build(PathBuf::from(raw))),
        None => current,
    }
}

/// Non-empty value of an environment variable.
fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(key: &str, default: T) -> DaemonResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| DaemonError::config(format!("invalid {key}={raw}: {e}"))),
        None => Ok(default),
    }
}

fn bool_var(key: &str, default: bool) -> DaemonResult<bool> {
    match var(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(DaemonError::config(format!(
            "invalid {key}={other}: expected true or false"
        ))),
    }
}

fn secs_var(key: &str, default: Duration) -> DaemonResult<Duration> {
    let secs: f64 = parse_var(key, default.as_secs_f64())?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(DaemonError::config(format!("{key} must be a non-negative number of seconds")));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pancam_vision::detection::cascade::FACE_CASCADE_PATH;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "PANCAM_MODE",
        "PANCAM_PROTOCOL",
        "PANCAM_STREAM_URL",
        "PANCAM_MAX_FPS",
        "PANCAM_KP",
        "PANCAM_MIN_DELTA",
        "PANCAM_MAX_DELTA",
        "PANCAM_IDLE_SCAN",
        "PANCAM_ACTUATOR",
        "PANCAM_SERVO_CMD",
        "PANCAM_SERVO_CHANNEL",
        "PANCAM_FACE_NEURAL",
        "PANCAM_CAT_CASCADE",
        "PANCAM_METRICS_ADDR",
        "PANCAM_SHUTDOWN_TIMEOUT_S",
        "TELEGRAM_TOKEN",
        "TELEGRAM_CHAT_ID",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    fn load(args: &[&str]) -> DaemonResult<DaemonConfig> {
        DaemonConfig::from_env_with_args(args.iter().map(|a| a.to_string()))
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = load(&[]).unwrap();
        assert_eq!(config.mode, OperatingMode::Track);
        assert_eq!(config.protocol, ProtocolFormat::Text);
        assert_eq!(config.source.url, DEFAULT_STREAM_URL);
        assert_eq!(config.motion.diff_threshold, 20);
        assert_eq!(config.motion.min_area, 2500.0);
        assert_eq!(config.actuator, ActuatorConfig::Line);
        assert!(config.notify.telegram.is_none());
        assert!(config.metrics_addr.is_none());
        assert!(config.shutdown_timeout.is_none());
    }

    #[test]
    #[serial]
    fn test_shutdown_timeout_is_opt_in() {
        clear_env();
        std::env::set_var("PANCAM_SHUTDOWN_TIMEOUT_S", "2.5");
        let config = load(&[]).unwrap();
        assert_eq!(config.shutdown_timeout, Some(Duration::from_millis(2500)));

        std::env::set_var("PANCAM_SHUTDOWN_TIMEOUT_S", "-1");
        assert!(load(&[]).unwrap_err().is_fatal());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_alert_mode_uses_alerting_detector() {
        clear_env();
        std::env::set_var("PANCAM_MODE", "alert");
        let config = load(&[]).unwrap();
        assert_eq!(config.motion.diff_threshold, 25);
        assert_eq!(config.motion.frame_gap, 3);
        assert_eq!(config.events.freeze_ticks, 8);
        assert_eq!(config.clip.playback_fps, 2.0);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_url_argument_wins() {
        clear_env();
        std::env::set_var("PANCAM_STREAM_URL", "http://env:1/stream");
        let config = load(&["--verbose", "http://cam.local:3000/camera/stream"]).unwrap();
        assert_eq!(config.source.url, "http://cam.local:3000/camera/stream");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        clear_env();
        std::env::set_var("PANCAM_KP", "fast");
        assert!(matches!(load(&[]), Err(DaemonError::Config(_))));

        clear_env();
        std::env::set_var("PANCAM_MIN_DELTA", "10");
        std::env::set_var("PANCAM_MAX_DELTA", "5");
        assert!(load(&[]).unwrap_err().is_fatal());

        clear_env();
        std::env::set_var("PANCAM_MODE", "zoom");
        assert!(load(&[]).is_err());

        clear_env();
        assert!(load(&["ftp://camera/stream"]).is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_telegram_needs_both_credentials() {
        clear_env();
        std::env::set_var("TELEGRAM_TOKEN", "abc");
        assert!(load(&[]).unwrap().notify.telegram.is_none());
        std::env::set_var("TELEGRAM_CHAT_ID", "42");
        let telegram = load(&[]).unwrap().notify.telegram.unwrap();
        assert_eq!(telegram.chat_id, "42");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_servo_actuator() {
        clear_env();
        std::env::set_var("PANCAM_ACTUATOR", "servo");
        std::env::set_var("PANCAM_SERVO_CMD", "python3 /opt/pancam/servo.py");
        std::env::set_var("PANCAM_SERVO_CHANNEL", "1");
        let config = load(&[]).unwrap();
        assert_eq!(
            config.actuator,
            ActuatorConfig::ServoDaemon {
                program: "python3".into(),
                args: vec!["/opt/pancam/servo.py".into()],
                channel: 1,
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_face_detector_selection() {
        clear_env();
        std::env::set_var("PANCAM_MODE", "face");
        std::env::set_var("PANCAM_FACE_NEURAL", "false");
        std::env::set_var("PANCAM_CAT_CASCADE", "none");
        let config = load(&[]).unwrap();
        assert!(config.face.neural.is_none());
        assert!(config.face.cats.is_none());
        assert_eq!(
            config.face.cascade.and_then(|c| c.face_cascade),
            Some(PathBuf::from(FACE_CASCADE_PATH))
        );
        clear_env();
    }
}
