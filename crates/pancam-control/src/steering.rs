//! Steering control loop.
//!
//! ```text
//!            detection                 command emitted
//!   Idle ─────────────▶ Tracking ─────────────────────▶ Cooldown ──▶ Tracking
//!    │                    │  ▲                 │ freeze_ticks > 0
//!    │ idle_timeout       │  │ detection       ▼
//!    └──────────────▶ Scanning ◀──────────── Frozen (resumes where it came from)
//! ```
//!
//! Time is passed in as seconds on a monotonic clock so the loop stays a
//! pure function of its inputs.

use pancam_models::{Detection, SteerCommand};
use tracing::debug;

use crate::error::{require_positive, ControlError, ControlResult};

/// Steering thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct SteeringConfig {
    /// Degrees per pixel of horizontal error.
    pub kp: f64,
    /// Half-width of the centered band, as a fraction of frame width.
    pub dead_zone_frac: f64,
    /// Smaller corrections are not worth a move.
    pub min_delta: i32,
    pub max_delta: i32,
    /// Minimum spacing between two commands.
    pub cooldown_s: f64,
    /// Ticks of discarded detection input after each command.
    pub freeze_ticks: u32,
    /// Sweep when nothing has been seen for this long.
    pub idle_scan: bool,
    pub idle_timeout_s: f64,
    pub scan_step: i32,
    pub scan_interval_s: f64,
    pub sweep_min: f64,
    pub sweep_max: f64,
    /// Servo angle at startup, used as the sweep origin.
    pub initial_angle: f64,
    /// +1 or -1.
    pub scan_direction: i32,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            kp: 0.06,
            dead_zone_frac: 0.08,
            min_delta: 1,
            max_delta: 20,
            cooldown_s: 0.40,
            freeze_ticks: 0,
            idle_scan: true,
            idle_timeout_s: 15.0,
            scan_step: 5,
            scan_interval_s: 1.5,
            sweep_min: 45.0,
            sweep_max: 225.0,
            initial_angle: 135.0,
            scan_direction: 1,
        }
    }
}

impl SteeringConfig {
    /// Motion steering: longer cooldown and a freeze so the pan itself is
    /// not picked up as motion.
    pub fn motion() -> Self {
        Self {
            cooldown_s: 0.6,
            freeze_ticks: 3,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ControlResult<()> {
        require_positive("kp", self.kp)?;
        require_positive("dead_zone_frac", self.dead_zone_frac)?;
        if self.dead_zone_frac >= 0.5 {
            return Err(ControlError::invalid_config("dead_zone_frac must be below 0.5"));
        }
        if self.min_delta <= 0 || self.max_delta <= 0 {
            return Err(ControlError::invalid_config("min_delta and max_delta must be positive"));
        }
        if self.min_delta > self.max_delta {
            return Err(ControlError::invalid_config("min_delta must not exceed max_delta"));
        }
        require_positive("cooldown_s", self.cooldown_s)?;
        require_positive("idle_timeout_s", self.idle_timeout_s)?;
        require_positive("scan_interval_s", self.scan_interval_s)?;
        if self.scan_step <= 0 {
            return Err(ControlError::invalid_config("scan_step must be positive"));
        }
        if self.sweep_min.is_nan() || self.sweep_min >= self.sweep_max {
            return Err(ControlError::invalid_config("sweep_min must be below sweep_max"));
        }
        if self.scan_direction != 1 && self.scan_direction != -1 {
            return Err(ControlError::invalid_config("scan_direction must be 1 or -1"));
        }
        Ok(())
    }
}

/// Externally visible control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    Tracking,
    Cooldown,
    Frozen,
    Scanning,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Idle => "idle",
            ControlState::Tracking => "tracking",
            ControlState::Cooldown => "cooldown",
            ControlState::Frozen => "frozen",
            ControlState::Scanning => "scanning",
        }
    }
}

/// Where to go once a command's freeze window is over.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Resume {
    Tracking,
    Scanning { next_step_at: f64 },
}

impl Resume {
    fn after_move(self) -> Phase {
        match self {
            Resume::Tracking => Phase::Cooldown,
            Resume::Scanning { next_step_at } => Phase::Scanning { next_step_at },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Tracking,
    Cooldown,
    Frozen { remaining: u32, resume: Resume },
    Scanning { next_step_at: f64 },
}

/// Result of one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub command: Option<SteerCommand>,
    /// No target on this tick.
    pub lost: bool,
    /// The diff history must be dropped before the next frame.
    pub discard_history: bool,
}

/// Steering state machine. One instance per daemon, mutated only by the
/// frame loop.
#[derive(Debug)]
pub struct SteeringLoop {
    config: SteeringConfig,
    state: Phase,
    last_move_at: Option<f64>,
    last_seen_at: Option<f64>,
    servo_estimate: f64,
    scan_direction: i32,
}

impl SteeringLoop {
    pub fn new(config: SteeringConfig) -> ControlResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Phase::Idle,
            last_move_at: None,
            last_seen_at: None,
            servo_estimate: config.initial_angle,
            scan_direction: config.scan_direction,
            config,
        })
    }

    pub fn config(&self) -> &SteeringConfig {
        &self.config
    }

    pub fn state(&self) -> ControlState {
        match self.state {
            Phase::Idle => ControlState::Idle,
            Phase::Tracking => ControlState::Tracking,
            Phase::Cooldown => ControlState::Cooldown,
            Phase::Frozen { .. } => ControlState::Frozen,
            Phase::Scanning { .. } => ControlState::Scanning,
        }
    }

    /// Estimated absolute servo angle, accumulated from emitted commands.
    pub fn servo_estimate(&self) -> f64 {
        self.servo_estimate
    }

    pub fn scan_direction(&self) -> i32 {
        self.scan_direction
    }

    pub fn last_move_at(&self) -> Option<f64> {
        self.last_move_at
    }

    /// Clear timers and state after a reconnect. The servo estimate and
    /// sweep direction survive since the servo has not moved.
    pub fn reset(&mut self) {
        self.state = Phase::Idle;
        self.last_move_at = None;
        self.last_seen_at = None;
    }

    /// Advance by one processed frame.
    pub fn tick(&mut self, now: f64, target: Option<&Detection>, frame_width: u32) -> TickOutcome {
        let mut outcome = TickOutcome {
            lost: target.is_none(),
            ..TickOutcome::default()
        };
        let last_seen = *self.last_seen_at.get_or_insert(now);

        if let Phase::Frozen { remaining, resume } = self.state {
            outcome.discard_history = true;
            self.state = if remaining <= 1 {
                resume.after_move()
            } else {
                Phase::Frozen {
                    remaining: remaining - 1,
                    resume,
                }
            };
            return outcome;
        }

        match target {
            Some(det) => {
                self.last_seen_at = Some(now);
                self.track(now, det, frame_width, &mut outcome);
            }
            None => self.wait(now, last_seen, &mut outcome),
        }
        outcome
    }

    /// Correction for a target, or `None` inside the dead zone or below
    /// `min_delta`. Positive deltas pan left.
    pub fn correction(&self, det: &Detection, frame_width: u32) -> Option<i32> {
        let width = frame_width as f64;
        let center = (frame_width / 2) as f64;
        let error = det.center.0 * width - center;
        if error.abs() < self.config.dead_zone_frac * width {
            return None;
        }

        let max = self.config.max_delta as f64;
        let delta = (-(error * self.config.kp).round()).clamp(-max, max) as i32;
        if delta == 0 || delta.abs() < self.config.min_delta {
            return None;
        }
        Some(delta)
    }

    fn cooling(&self, now: f64) -> bool {
        self.last_move_at
            .is_some_and(|at| now - at < self.config.cooldown_s)
    }

    fn track(&mut self, now: f64, det: &Detection, frame_width: u32, outcome: &mut TickOutcome) {
        if self.cooling(now) {
            self.state = Phase::Cooldown;
            return;
        }
        self.state = Phase::Tracking;
        if let Some(delta) = self.correction(det, frame_width) {
            self.emit(now, delta, Resume::Tracking, outcome);
        }
    }

    fn wait(&mut self, now: f64, last_seen: f64, outcome: &mut TickOutcome) {
        let interval = self.config.scan_interval_s;

        if let Phase::Scanning { next_step_at } = self.state {
            if now < next_step_at || self.cooling(now) {
                return;
            }
            let missed = ((now - next_step_at) / interval).floor() + 1.0;
            let resume = Resume::Scanning {
                next_step_at: next_step_at + missed * interval,
            };
            let delta = self.next_scan_delta();
            self.emit(now, delta, resume, outcome);
            return;
        }

        if self.state == Phase::Cooldown && !self.cooling(now) {
            self.state = Phase::Tracking;
        }

        if self.config.idle_scan && now - last_seen >= self.config.idle_timeout_s {
            let entered = last_seen + self.config.idle_timeout_s;
            debug!(
                idle_s = now - last_seen,
                servo = self.servo_estimate,
                "No target, scanning"
            );
            self.state = Phase::Scanning {
                next_step_at: entered + interval,
            };
            if now >= entered + interval {
                self.wait(now, last_seen, outcome);
            }
        }
    }

    fn next_scan_delta(&mut self) -> i32 {
        let mut step = self.config.scan_step * self.scan_direction;
        let next = self.servo_estimate + step as f64;
        if next > self.config.sweep_max || next < self.config.sweep_min {
            self.scan_direction = -self.scan_direction;
            step = -step;
        }
        step
    }

    fn emit(&mut self, now: f64, delta: i32, resume: Resume, outcome: &mut TickOutcome) {
        self.servo_estimate += delta as f64;
        self.last_move_at = Some(now);
        outcome.command = Some(SteerCommand::new(delta));
        self.state = if self.config.freeze_ticks > 0 {
            // Later frames are post-move and must not diff against older ones.
            outcome.discard_history = true;
            Phase::Frozen {
                remaining: self.config.freeze_ticks,
                resume,
            }
        } else {
            resume.after_move()
        };
        debug!(
            delta,
            servo = self.servo_estimate,
            state = self.state().as_str(),
            "Steering command"
        );
    }
}
