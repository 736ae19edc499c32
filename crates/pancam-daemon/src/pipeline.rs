//! Per-frame perception and control.
//!
//! Detection, selection and the control decisions for a frame all happen
//! inside [`Pipeline::process`]; nothing here performs I/O. The runner
//! applies the resulting command and hands closed episodes to workers.

use std::time::Instant;

use pancam_control::{MotionEpisode, MotionEvent, MotionEventController, SteeringLoop};
use pancam_models::{Detection, OperatingMode, Record, SteerCommand};
use pancam_vision::{
    select_target, DetectionStrategy, FaceCascadeDetector, Frame, MotionDiffDetector,
    NeuralFaceDetector, Region,
};
use tracing::{debug, warn};

use crate::config::{DaemonConfig, FaceConfig};
use crate::error::DaemonResult;
use crate::metrics;

/// What one frame produced.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Protocol records in emission order, without `MOVE`.
    pub records: Vec<Record>,
    pub command: Option<SteerCommand>,
    /// Snapshot to send as an alert.
    pub alert: Option<Vec<u8>>,
    /// Episode ready for a worker.
    pub closed: Option<MotionEpisode>,
}

/// Build the face strategies in priority order.
pub fn build_face_strategies(face: &FaceConfig) -> DaemonResult<Vec<Box<dyn DetectionStrategy>>> {
    let mut strategies: Vec<Box<dyn DetectionStrategy>> = Vec::new();
    if let Some(neural) = &face.neural {
        strategies.push(Box::new(NeuralFaceDetector::new(neural.clone())?));
    }
    if let Some(cascade) = &face.cascade {
        strategies.push(Box::new(FaceCascadeDetector::new(cascade.clone())?));
    }
    if let Some(cats) = &face.cats {
        strategies.push(Box::new(FaceCascadeDetector::new(cats.clone())?));
    }
    Ok(strategies)
}

/// Run every strategy on `frame` and pick one target.
///
/// A strategy that fails on this frame counts as having found nothing.
pub fn find_target(
    strategies: &mut [Box<dyn DetectionStrategy>],
    frame: &Frame,
    roi: Option<&Region>,
    min_score: f64,
) -> Option<Detection> {
    let groups: Vec<Vec<Detection>> = strategies
        .iter_mut()
        .map(|strategy| {
            let started = Instant::now();
            let found = strategy.detect(frame, roi).unwrap_or_else(|e| {
                warn!(strategy = strategy.name(), error = %e, "Detection failed");
                Vec::new()
            });
            metrics::record_detect_duration(strategy.name(), started.elapsed().as_secs_f64());
            found
        })
        .collect();
    select_target(groups.iter().map(Vec::as_slice), min_score)
}

pub struct Pipeline {
    mode: OperatingMode,
    motion: Option<MotionDiffDetector>,
    faces: Vec<Box<dyn DetectionStrategy>>,
    steering: Option<SteeringLoop>,
    events: Option<MotionEventController>,
    min_score: f64,
    roi_padding: f64,
    last_target: Option<Detection>,
}

impl Pipeline {
    pub fn new(config: &DaemonConfig) -> DaemonResult<Self> {
        let mode = config.mode;
        let motion = if mode.uses_motion() {
            Some(MotionDiffDetector::new(config.motion.clone())?)
        } else {
            None
        };
        let faces = if mode == OperatingMode::Face {
            build_face_strategies(&config.face)?
        } else {
            Vec::new()
        };
        let steering = if mode.steers() {
            Some(SteeringLoop::new(config.steering.clone())?)
        } else {
            None
        };
        let events = if mode.alerts() {
            Some(MotionEventController::new(config.events.clone())?)
        } else {
            None
        };

        Ok(Self {
            mode,
            motion,
            faces,
            steering,
            events,
            min_score: config.face.min_score,
            roi_padding: config.face.roi_padding,
            last_target: None,
        })
    }

    /// Build from parts, for tests and custom strategies.
    pub fn from_parts(
        mode: OperatingMode,
        motion: Option<MotionDiffDetector>,
        faces: Vec<Box<dyn DetectionStrategy>>,
        steering: Option<SteeringLoop>,
        events: Option<MotionEventController>,
    ) -> Self {
        Self {
            mode,
            motion,
            faces,
            steering,
            events,
            min_score: 0.0,
            roi_padding: 0.0,
            last_target: None,
        }
    }

    pub fn events(&self) -> Option<&MotionEventController> {
        self.events.as_ref()
    }

    /// Process one decoded frame at `now` seconds.
    pub fn process(&mut self, frame: &Frame, now: f64) -> TickReport {
        let mut report = TickReport::default();
        let (width, height) = frame.size();

        let target = match self.mode {
            OperatingMode::Face => {
                let target = self.find_face(frame);
                report.records.push(Record::TargetObservation {
                    target: target.clone(),
                    width,
                    height,
                });
                target
            }
            _ => {
                let motion = self.detect_motion(frame);
                report.records.push(Record::MotionObservation(motion.clone()));
                motion
            }
        };

        if let Some(steering) = self.steering.as_mut() {
            let outcome = steering.tick(now, target.as_ref(), width);
            if outcome.discard_history {
                if let Some(motion) = self.motion.as_mut() {
                    motion.clear_history();
                }
            }
            if outcome.lost {
                report.records.push(Record::Lost);
            }
            if let Some(command) = outcome.command {
                debug!(
                    delta = command.delta_degrees,
                    state = steering.state().as_str(),
                    "Steering"
                );
                metrics::record_command(if outcome.lost { "scan" } else { "track" });
                report.command = Some(command);
            }
        }

        if let Some(events) = self.events.as_mut() {
            let area = target.as_ref().and_then(|d| d.area);
            // Alert-only mode has no LOST line, so every still tick says QUIET.
            let quiet_each_tick = !self.mode.steers();
            let still = !area.is_some_and(|a| a >= events.config().min_area);
            for event in events.tick(now, area, frame.jpeg()) {
                match event {
                    MotionEvent::Activated { .. } => report.records.push(Record::Motion),
                    MotionEvent::Alert { snapshot, .. } => report.alert = Some(snapshot),
                    MotionEvent::Freeze(frames) => {
                        if let Some(motion) = self.motion.as_mut() {
                            motion.freeze(frames);
                        }
                    }
                    MotionEvent::Deactivated { .. } if !quiet_each_tick => {
                        report.records.push(Record::Quiet)
                    }
                    MotionEvent::Deactivated { .. } => {}
                    MotionEvent::Closed(episode) => report.closed = Some(episode),
                }
            }
            if quiet_each_tick && still {
                report.records.push(Record::Quiet);
            }
        }

        report
    }

    /// Drop temporal state after a stream loss. Returns the episode that
    /// was open, if it captured anything.
    pub fn reset(&mut self, now: f64) -> Option<MotionEpisode> {
        if let Some(motion) = self.motion.as_mut() {
            motion.reset();
        }
        for strategy in &mut self.faces {
            strategy.reset();
        }
        if let Some(steering) = self.steering.as_mut() {
            steering.reset();
        }
        self.last_target = None;
        self.finalize(now)
    }

    /// Close the open episode, if any.
    pub fn finalize(&mut self, now: f64) -> Option<MotionEpisode> {
        self.events.as_mut().and_then(|events| events.finalize(now))
    }

    fn detect_motion(&mut self, frame: &Frame) -> Option<Detection> {
        let motion = self.motion.as_mut()?;
        let started = Instant::now();
        let found = motion.detect(frame, None).unwrap_or_else(|e| {
            warn!(error = %e, "Motion detection failed");
            Vec::new()
        });
        metrics::record_detect_duration(motion.name(), started.elapsed().as_secs_f64());
        found.into_iter().next()
    }

    fn find_face(&mut self, frame: &Frame) -> Option<Detection> {
        let roi = self
            .last_target
            .as_ref()
            .filter(|_| self.roi_padding > 0.0)
            .map(|det| Region::around(det, frame.size(), self.roi_padding));

        let mut target = find_target(&mut self.faces, frame, roi.as_ref(), self.min_score);
        if target.is_none() && roi.is_some() {
            target = find_target(&mut self.faces, frame, None, self.min_score);
        }
        self.last_target = target.clone();
        target
    }
}
