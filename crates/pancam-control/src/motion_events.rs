//! Motion event controller.
//!
//! Turns the per-tick motion area into alert and recording events. An
//! episode opens on the first tick with enough motion, samples frames on a
//! fixed schedule anchored at its start, and closes once motion has been
//! absent for the quiet debounce.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{require_positive, ControlError, ControlResult};

/// Slot index tolerance for ticks that land a hair before a sample time.
const SLOT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct MotionEventConfig {
    /// Minimum blob area, in detection-canvas pixels, that counts as motion.
    pub min_area: f64,
    pub alert_cooldown_s: f64,
    pub quiet_debounce_s: f64,
    /// Spacing between recorded frames.
    pub sample_interval_s: f64,
    pub max_frames: usize,
    /// Frames of diff history to discard after an alert.
    pub freeze_ticks: u32,
}

impl Default for MotionEventConfig {
    fn default() -> Self {
        Self {
            min_area: 4000.0,
            alert_cooldown_s: 10.0,
            quiet_debounce_s: 5.0,
            sample_interval_s: 0.5,
            max_frames: 240,
            freeze_ticks: 8,
        }
    }
}

impl MotionEventConfig {
    pub fn validate(&self) -> ControlResult<()> {
        require_positive("min_area", self.min_area)?;
        require_positive("alert_cooldown_s", self.alert_cooldown_s)?;
        require_positive("quiet_debounce_s", self.quiet_debounce_s)?;
        require_positive("sample_interval_s", self.sample_interval_s)?;
        if self.max_frames == 0 {
            return Err(ControlError::invalid_config("max_frames must be at least 1"));
        }
        Ok(())
    }
}

/// A run of motion with its sampled frames.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEpisode {
    pub id: Uuid,
    /// Wall clock time the episode opened, used for clip naming.
    pub opened_at: DateTime<Utc>,
    /// Monotonic seconds.
    pub started_at: f64,
    pub last_motion_at: f64,
    pub last_alert_at: Option<f64>,
    pub frames: Vec<Vec<u8>>,
}

impl MotionEpisode {
    fn open(now: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            opened_at: Utc::now(),
            started_at: now,
            last_motion_at: now,
            last_alert_at: None,
            frames: Vec::new(),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Seconds from opening to the last observed motion.
    pub fn motion_span_s(&self) -> f64 {
        self.last_motion_at - self.started_at
    }
}

/// What happened on a tick, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionEvent {
    Activated { episode_id: Uuid },
    Alert { episode_id: Uuid, snapshot: Vec<u8> },
    /// Discard diff history for this many frames.
    Freeze(u32),
    Deactivated { episode_id: Uuid },
    /// Episode closed with frames, ready for hand-off.
    Closed(MotionEpisode),
}

#[derive(Debug)]
pub struct MotionEventController {
    config: MotionEventConfig,
    episode: Option<MotionEpisode>,
    next_slot: u64,
    last_alert_at: Option<f64>,
}

impl MotionEventController {
    pub fn new(config: MotionEventConfig) -> ControlResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            episode: None,
            next_slot: 0,
            last_alert_at: None,
        })
    }

    pub fn config(&self) -> &MotionEventConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.episode.is_some()
    }

    pub fn episode(&self) -> Option<&MotionEpisode> {
        self.episode.as_ref()
    }

    /// Advance by one processed frame. `area` is the largest motion blob on
    /// this frame, if any; `jpeg` is the frame as received.
    pub fn tick(&mut self, now: f64, area: Option<f64>, jpeg: &[u8]) -> Vec<MotionEvent> {
        let motion = area.is_some_and(|a| a >= self.config.min_area);
        let mut events = Vec::new();

        if motion && self.episode.is_none() {
            let episode = MotionEpisode::open(now);
            info!(episode_id = %episode.id, "Motion started");
            events.push(MotionEvent::Activated {
                episode_id: episode.id,
            });
            self.next_slot = 0;
            self.episode = Some(episode);
        }

        let Some(episode) = self.episode.as_mut() else {
            return events;
        };

        if motion {
            episode.last_motion_at = now;
            let cooling = self
                .last_alert_at
                .is_some_and(|at| now - at < self.config.alert_cooldown_s);
            if !cooling {
                self.last_alert_at = Some(now);
                episode.last_alert_at = Some(now);
                events.push(MotionEvent::Alert {
                    episode_id: episode.id,
                    snapshot: jpeg.to_vec(),
                });
                if self.config.freeze_ticks > 0 {
                    events.push(MotionEvent::Freeze(self.config.freeze_ticks));
                }
            }
        }

        let slot = ((now - episode.started_at) / self.config.sample_interval_s + SLOT_EPSILON)
            .floor()
            .max(0.0) as u64;
        if slot >= self.next_slot && episode.frames.len() < self.config.max_frames {
            episode.frames.push(jpeg.to_vec());
            self.next_slot = slot + 1;
        }

        if !motion && now - episode.last_motion_at >= self.config.quiet_debounce_s {
            events.extend(self.close(now));
        }
        events
    }

    /// Close an open episode immediately, e.g. on shutdown or reconnect.
    pub fn finalize(&mut self, now: f64) -> Option<MotionEpisode> {
        self.close(now).into_iter().find_map(|event| match event {
            MotionEvent::Closed(episode) => Some(episode),
            _ => None,
        })
    }

    fn close(&mut self, now: f64) -> Vec<MotionEvent> {
        let Some(episode) = self.episode.take() else {
            return Vec::new();
        };
        self.next_slot = 0;
        info!(
            episode_id = %episode.id,
            frames = episode.frames.len(),
            duration_s = now - episode.started_at,
            "Motion stopped"
        );

        let mut events = vec![MotionEvent::Deactivated {
            episode_id: episode.id,
        }];
        if episode.frames.is_empty() {
            debug!(episode_id = %episode.id, "Episode has no frames, dropping");
        } else {
            events.push(MotionEvent::Closed(episode));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> MotionEventController {
        MotionEventController::new(MotionEventConfig {
            min_area: 1000.0,
            alert_cooldown_s: 10.0,
            quiet_debounce_s: 2.0,
            sample_interval_s: 0.5,
            max_frames: 100,
            freeze_ticks: 4,
        })
        .unwrap()
    }

    #[test]
    fn test_small_area_stays_quiet() {
        let mut c = controller();
        assert!(c.tick(0.0, Some(999.0), b"f").is_empty());
        assert!(c.tick(0.1, None, b"f").is_empty());
        assert!(!c.is_active());
    }

    #[test]
    fn test_activation_alerts_and_freezes() {
        let mut c = controller();
        let events = c.tick(0.0, Some(1000.0), b"snap");
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], MotionEvent::Activated { .. }));
        match &events[1] {
            MotionEvent::Alert { snapshot, .. } => assert_eq!(snapshot, b"snap"),
            other => panic!("expected alert, got {other:?}"),
        }
        assert_eq!(events[2], MotionEvent::Freeze(4));
        assert!(c.is_active());
    }

    #[test]
    fn test_alert_cooldown_spans_episodes() {
        let mut c = controller();
        c.tick(0.0, Some(5000.0), b"f");
        c.tick(1.0, None, b"f");
        let closed = c.tick(2.0, None, b"f");
        assert!(closed
            .iter()
            .any(|e| matches!(e, MotionEvent::Deactivated { .. })));

        let events = c.tick(3.0, Some(5000.0), b"f");
        assert!(matches!(events[0], MotionEvent::Activated { .. }));
        assert!(!events.iter().any(|e| matches!(e, MotionEvent::Alert { .. })));

        let events = c.tick(10.0, Some(5000.0), b"f");
        assert!(events.iter().any(|e| matches!(e, MotionEvent::Alert { .. })));
    }

    #[test]
    fn test_sampling_ignores_tick_rate() {
        let mut c = controller();
        // 10 ticks per second for 1.5s of motion.
        for i in 0..=15 {
            c.tick(i as f64 * 0.1, Some(5000.0), b"f");
        }
        // Slots at 0.0, 0.5, 1.0, 1.5.
        assert_eq!(c.episode().map(MotionEpisode::frame_count), Some(4));
    }

    #[test]
    fn test_max_frames_caps_episode() {
        let mut c = MotionEventController::new(MotionEventConfig {
            max_frames: 2,
            ..MotionEventConfig::default()
        })
        .unwrap();
        for i in 0..10 {
            c.tick(i as f64, Some(5000.0), b"f");
        }
        assert_eq!(c.episode().map(MotionEpisode::frame_count), Some(2));
    }

    #[test]
    fn test_debounce_holds_episode_open() {
        let mut c = controller();
        c.tick(0.0, Some(5000.0), b"f");
        assert!(c.tick(1.9, None, b"f").is_empty());
        assert!(c.is_active());
        let events = c.tick(2.0, None, b"f");
        assert!(!c.is_active());
        assert!(matches!(events[0], MotionEvent::Deactivated { .. }));
        match &events[1] {
            MotionEvent::Closed(episode) => assert_eq!(episode.frame_count(), 3),
            other => panic!("expected closed episode, got {other:?}"),
        }
    }

    #[test]
    fn test_finalize_returns_open_episode() {
        let mut c = controller();
        assert!(c.finalize(0.0).is_none());
        c.tick(0.0, Some(5000.0), b"f");
        let episode = c.finalize(0.2).unwrap();
        assert_eq!(episode.frame_count(), 1);
        assert!(!c.is_active());
    }

    #[test]
    fn test_validate() {
        assert!(MotionEventConfig::default().validate().is_ok());
        let bad = MotionEventConfig {
            max_frames: 0,
            ..MotionEventConfig::default()
        };
        assert!(MotionEventController::new(bad).is_err());
    }
}
