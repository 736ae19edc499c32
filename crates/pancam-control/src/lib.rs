//! Control state machines for the pan camera.
//!
//! Both machines are synchronous and take the current monotonic time as an
//! argument. The daemon owns one of each and ticks them once per processed
//! frame.

pub mod error;
pub mod motion_events;
pub mod steering;

pub use error::{ControlError, ControlResult};
pub use motion_events::{MotionEpisode, MotionEvent, MotionEventConfig, MotionEventController};
pub use steering::{ControlState, SteeringConfig, SteeringLoop, TickOutcome};

/// Frames an episode holds after being active for `active_s` seconds,
/// sampled every `interval_s` and capped at `max_frames`.
pub fn expected_frame_count(active_s: f64, interval_s: f64, max_frames: usize) -> usize {
    let slots = (active_s / interval_s + 1e-9).floor().max(0.0) as usize + 1;
    slots.min(max_frames)
}
