//! Differential drive mixing and the link watchdog.

use std::time::{Duration, Instant};

use types::{Axes, Calibration};

/// Below this throttle magnitude, steering trim is left out of the mix: a
/// robot sitting still with a trimmed steer value would otherwise creep
/// sideways with no throttle input at all.
pub const TRIM_GATE_THROTTLE: f64 = 0.05;

/// Config-level scale limits applied before mixing. These cap how much of
/// the mixer's full `[-1.0, 1.0]` range a tick of throttle/steer can reach,
/// independent of a robot's per-wheel [`Calibration`] scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerConfig {
    /// Throttle is scaled by this before mixing.
    pub max_speed: f64,
    /// Steer is scaled by this before mixing.
    pub turn_rate: f64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            max_speed: 1.0,
            turn_rate: 1.0,
        }
    }
}

/// Mixes shaped [`Axes`] and a robot's [`Calibration`] into left/right motor
/// speeds in `[-1.0, 1.0]`.
///
/// Throttle and steer are summed/differenced and then, if either wheel would
/// exceed full scale, both are scaled down by the same factor. Scaling both
/// wheels together (instead of clamping each independently) keeps the ratio
/// between them intact, so a turn's curvature doesn't flatten out near full
/// throttle.
pub struct DifferentialMixer;

impl DifferentialMixer {
    /// Produce `(left, right)` motor speeds for the given axes and
    /// calibration, using the default [`MixerConfig`] (full speed and turn
    /// rate, i.e. no additional scaling beyond calibration).
    pub fn mix(axes: Axes, calibration: &Calibration) -> (f64, f64) {
        Self::mix_with_config(axes, calibration, &MixerConfig::default())
    }

    /// Produce `(left, right)` motor speeds for the given axes, calibration,
    /// and config-level speed/turn-rate limits.
    ///
    /// Trim is only folded into the steer term once throttle is past
    /// [`TRIM_GATE_THROTTLE`]: a robot at a dead stop must not drift just
    /// because its calibration carries a nonzero `steering_trim`.
    pub fn mix_with_config(axes: Axes, calibration: &Calibration, config: &MixerConfig) -> (f64, f64) {
        let throttle = axes.throttle * config.max_speed;
        let mut steer = axes.steer * config.turn_rate;
        if throttle.abs() > TRIM_GATE_THROTTLE {
            steer += calibration.steering_trim;
        }

        let mut left = throttle + steer;
        let mut right = throttle - steer;

        let peak = left.abs().max(right.abs());
        if peak > 1.0 {
            left /= peak;
            right /= peak;
        }

        left *= calibration.motor_left_scale;
        right *= calibration.motor_right_scale;

        (left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0))
    }
}

/// Tracks liveness of the link to a controller. A robot that stops feeding
/// the watchdog is assumed to have lost its link and must stop driving.
pub struct Watchdog {
    timeout: Duration,
    last_feed: Instant,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Instant::now(),
        }
    }

    /// Record a liveness signal, pushing the deadline out.
    pub fn feed(&mut self) {
        self.last_feed = Instant::now();
    }

    /// True once more than `timeout` has elapsed since the last feed.
    pub fn is_timed_out(&self) -> bool {
        self.last_feed.elapsed() >= self.timeout
    }

    /// Time remaining before the watchdog trips, or `Duration::ZERO` if
    /// already timed out.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.last_feed.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes(throttle: f64, steer: f64) -> Axes {
        Axes { throttle, steer }
    }

    #[test]
    fn straight_throttle_drives_both_wheels_equally() {
        let (l, r) = DifferentialMixer::mix(axes(0.6, 0.0), &Calibration::default());
        assert!((l - 0.6).abs() < 1e-9);
        assert!((r - 0.6).abs() < 1e-9);
    }

    #[test]
    fn pure_steer_spins_wheels_opposite() {
        let (l, r) = DifferentialMixer::mix(axes(0.0, 0.5), &Calibration::default());
        assert!((l - 0.5).abs() < 1e-9);
        assert!((r - -0.5).abs() < 1e-9);
    }

    #[test]
    fn overdriven_output_preserves_curvature_instead_of_clamping() {
        // Without curvature-preserving scaling this would clamp to (1.0, 0.2),
        // flattening a gentle turn into a much sharper one.
        let (l, r) = DifferentialMixer::mix(axes(0.9, 0.3), &Calibration::default());
        assert!((l - 1.0).abs() < 1e-9);
        let expected_ratio = 0.6 / 1.2;
        assert!((r - expected_ratio).abs() < 1e-9);
    }

    #[test]
    fn motor_scale_is_applied_after_normalization() {
        let calibration = Calibration {
            steering_trim: 0.0,
            motor_left_scale: 0.8,
            motor_right_scale: 1.0,
        };
        let (l, r) = DifferentialMixer::mix(axes(0.5, 0.0), &calibration);
        assert!((l - 0.4).abs() < 1e-9);
        assert!((r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn steering_trim_offsets_steer_once_throttle_clears_the_gate() {
        let calibration = Calibration {
            steering_trim: 0.1,
            ..Calibration::default()
        };
        let (l, r) = DifferentialMixer::mix(axes(0.3, 0.0), &calibration);
        assert!((l - 0.4).abs() < 1e-9);
        assert!((r - 0.2).abs() < 1e-9);
    }

    #[test]
    fn steering_trim_is_ignored_at_zero_throttle() {
        // A robot at a dead stop must not drift sideways just because its
        // calibration carries a nonzero trim.
        let calibration = Calibration {
            steering_trim: 0.1,
            ..Calibration::default()
        };
        let (l, r) = DifferentialMixer::mix(axes(0.0, 0.0), &calibration);
        assert_eq!(l, 0.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn steering_trim_matches_worked_example_with_low_throttle() {
        // Worked example: throttle 0.3, steer 0.0, trim -0.05.
        let calibration = Calibration {
            steering_trim: -0.05,
            ..Calibration::default()
        };
        let (l, r) = DifferentialMixer::mix(axes(0.3, 0.0), &calibration);
        assert!((l - 0.25).abs() < 1e-9);
        assert!((r - 0.35).abs() < 1e-9);
    }

    #[test]
    fn config_speed_and_turn_rate_scale_before_mixing() {
        let config = MixerConfig {
            max_speed: 0.5,
            turn_rate: 0.5,
        };
        let (l, r) = DifferentialMixer::mix_with_config(
            axes(1.0, 1.0),
            &Calibration::default(),
            &config,
        );
        // throttle=0.5, steer=0.5 (trim gate clears), raw mix (1.0, 0.0).
        assert!((l - 1.0).abs() < 1e-9);
        assert!((r - 0.0).abs() < 1e-9);
    }

    #[test]
    fn freshly_fed_watchdog_is_not_timed_out() {
        let mut wd = Watchdog::new(Duration::from_millis(50));
        wd.feed();
        assert!(!wd.is_timed_out());
    }

    #[test]
    fn watchdog_trips_after_timeout_elapses() {
        let wd = Watchdog::new(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert!(wd.is_timed_out());
    }
}
