//! End-to-end behavior of the control state machines over tick sequences.

use pancam_control::{
    expected_frame_count, ControlState, MotionEvent, MotionEventConfig, MotionEventController,
    SteeringConfig, SteeringLoop,
};
use pancam_models::{Detection, Label, NormalizedRect, SteerCommand};

fn target_at_px(x: f64, frame_width: u32) -> Detection {
    let cx = x / frame_width as f64;
    Detection::new(
        (cx, 0.5),
        NormalizedRect::clamped(cx - 0.05, 0.4, 0.1, 0.2),
        0.9,
        Label::Face,
    )
}

/// Deterministic pseudo-random sequence in [0, 1).
fn lcg(seed: &mut u64) -> f64 {
    *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (*seed >> 11) as f64 / (1u64 << 53) as f64
}

fn scenario_steering() -> SteeringConfig {
    SteeringConfig {
        kp: 0.09,
        dead_zone_frac: 10.0 / 320.0,
        min_delta: 1,
        max_delta: 20,
        cooldown_s: 0.5,
        ..SteeringConfig::default()
    }
}

#[test]
fn test_off_center_target_moves_once_per_cooldown() {
    let mut sl = SteeringLoop::new(scenario_steering()).unwrap();
    let target = target_at_px(200.0, 320);

    let first = sl.tick(0.0, Some(&target), 320);
    assert_eq!(first.command, Some(SteerCommand::new(-4)));

    // Target keeps reporting the same spot at 10 fps through the cooldown.
    for i in 1..5 {
        let out = sl.tick(i as f64 / 10.0, Some(&target), 320);
        assert!(out.command.is_none(), "command inside cooldown at tick {i}");
    }
    assert_eq!(sl.state(), ControlState::Cooldown);
}

#[test]
fn test_dead_zone_never_moves() {
    let mut sl = SteeringLoop::new(scenario_steering()).unwrap();
    // Errors from -9.5px to +9.5px with the 10px dead zone.
    for (i, error) in (-19..=19).map(|e| e as f64 * 0.5).enumerate() {
        let out = sl.tick(i as f64 * 10.0, Some(&target_at_px(160.0 + error, 320)), 320);
        assert!(out.command.is_none(), "moved on error {error}");
    }
}

#[test]
fn test_commands_respect_cooldown_and_clamp() {
    let config = SteeringConfig {
        kp: 0.5,
        cooldown_s: 0.4,
        ..SteeringConfig::default()
    };
    let mut sl = SteeringLoop::new(config.clone()).unwrap();
    let mut seed = 7;
    let mut now = 0.0;
    let mut emitted = Vec::new();

    for _ in 0..2000 {
        now += 0.02 + lcg(&mut seed) * 0.1;
        let target = (lcg(&mut seed) < 0.8).then(|| target_at_px(lcg(&mut seed) * 640.0, 640));
        if let Some(cmd) = sl.tick(now, target.as_ref(), 640).command {
            emitted.push((now, cmd));
        }
    }

    assert!(emitted.len() > 10);
    for (_, cmd) in &emitted {
        assert!(cmd.delta_degrees.abs() <= config.max_delta);
    }
    for pair in emitted.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= config.cooldown_s);
    }
}

#[test]
fn test_idle_scan_takes_one_step() {
    let config = SteeringConfig {
        idle_timeout_s: 3.0,
        scan_interval_s: 1.0,
        scan_step: 5,
        scan_direction: -1,
        ..SteeringConfig::default()
    };
    let mut sl = SteeringLoop::new(config).unwrap();
    let mut commands = Vec::new();

    // 10 fps for idle_timeout + scan_interval.
    for i in 0..=40 {
        let out = sl.tick(i as f64 / 10.0, None, 640);
        assert!(out.lost);
        commands.extend(out.command);
    }

    assert_eq!(commands, vec![SteerCommand::new(-5)]);
    assert_eq!(sl.state(), ControlState::Scanning);
    assert_eq!(sl.servo_estimate(), 130.0);
}

#[test]
fn test_motion_episode_handoff() {
    let config = MotionEventConfig {
        min_area: 4000.0,
        quiet_debounce_s: 5.0,
        sample_interval_s: 1.0,
        ..MotionEventConfig::default()
    };
    let mut controller = MotionEventController::new(config).unwrap();
    let mut events = Vec::new();

    for t in 0..3 {
        events.extend(controller.tick(t as f64, Some(5000.0), format!("f{t}").as_bytes()));
    }
    for t in 3..=8 {
        events.extend(controller.tick(t as f64, None, format!("f{t}").as_bytes()));
    }

    let deactivations = events
        .iter()
        .filter(|e| matches!(e, MotionEvent::Deactivated { .. }))
        .count();
    let episodes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MotionEvent::Closed(episode) => Some(episode),
            _ => None,
        })
        .collect();

    assert_eq!(deactivations, 1);
    assert_eq!(episodes.len(), 1);
    // Quiet declared at t=7; frames sampled at t=0..=7.
    let episode = episodes[0];
    assert_eq!(episode.frame_count(), expected_frame_count(7.0, 1.0, 240));
    assert_eq!(episode.frames.first().map(Vec::as_slice), Some(&b"f0"[..]));
    assert_eq!(episode.frames.last().map(Vec::as_slice), Some(&b"f7"[..]));
    assert!(!controller.is_active());
}

#[test]
fn test_area_gate_boundary() {
    let mut controller = MotionEventController::new(MotionEventConfig::default()).unwrap();
    assert!(controller.tick(0.0, Some(3999.0), b"f").is_empty());
    assert!(!controller.is_active());
    controller.tick(0.1, Some(4000.0), b"f");
    assert!(controller.is_active());
}

#[test]
fn test_episode_framing() {
    for (active_s, interval_s, max_frames) in [(2.0, 0.5, 100), (3.7, 0.5, 100), (10.0, 0.5, 6)] {
        let config = MotionEventConfig {
            sample_interval_s: interval_s,
            max_frames,
            ..MotionEventConfig::default()
        };
        let mut controller = MotionEventController::new(config).unwrap();

        let ticks = (active_s * 10.0) as u32;
        for i in 0..=ticks {
            controller.tick(i as f64 / 10.0, Some(10_000.0), b"f");
        }
        let episode = controller.finalize(active_s).unwrap();
        assert_eq!(
            episode.frame_count(),
            expected_frame_count(active_s, interval_s, max_frames),
            "T={active_s} I={interval_s}"
        );
    }
}
