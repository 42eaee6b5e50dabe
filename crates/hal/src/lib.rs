//! Motor driver abstraction.
//!
//! A single motor is driven by a PWM duty cycle plus a direction pin pair,
//! matching the Waveshare-style H-bridge wiring used on the robot's chassis.

use tracing::trace;

/// A speed below this magnitude is treated as zero: the motor coasts rather
/// than holding a barely-perceptible PWM duty cycle.
pub const COAST_THRESHOLD: f64 = 0.01;

/// Direction a motor is currently driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
    Coast,
}

/// Drives a single motor's PWM duty cycle and direction pins.
///
/// Implementations are expected to be infallible at runtime: once
/// constructed, `set_speed` and `stop` cannot fail in normal operation. This
/// mirrors how the underlying PWM/GPIO peripherals are used here: duty cycle
/// writes don't return errors once the peripheral is configured.
pub trait MotorDriver {
    /// Drive at `speed` in `[-1.0, 1.0]`, where the sign selects direction
    /// and the magnitude maps to PWM duty cycle. Values are clamped.
    fn set_speed(&mut self, speed: f64);

    /// Stop the motor (equivalent to `set_speed(0.0)`), idempotent.
    fn stop(&mut self);

    /// The last speed this driver was commanded to.
    fn speed(&self) -> f64;
}

/// A software model of a PWM + direction-pin motor, used on hosts where the
/// real peripheral isn't present and in tests.
pub struct SoftwareMotor {
    name: &'static str,
    speed: f64,
    direction: Direction,
}

impl SoftwareMotor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            speed: 0.0,
            direction: Direction::Coast,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Duty cycle as a fraction of max, always non-negative.
    pub fn duty(&self) -> f64 {
        self.speed.abs()
    }
}

impl MotorDriver for SoftwareMotor {
    fn set_speed(&mut self, speed: f64) {
        let speed = speed.clamp(-1.0, 1.0);
        self.speed = speed;
        self.direction = if speed.abs() < COAST_THRESHOLD {
            Direction::Coast
        } else if speed > 0.0 {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        trace!(motor = self.name, speed, direction = ?self.direction, "motor speed set");
    }

    fn stop(&mut self) {
        self.set_speed(0.0);
    }

    fn speed(&self) -> f64 {
        self.speed
    }
}

/// Left/right motor pair for a differential drive chassis.
pub struct DriveTrain<L, R> {
    pub left: L,
    pub right: R,
}

impl<L: MotorDriver, R: MotorDriver> DriveTrain<L, R> {
    pub fn new(left: L, right: R) -> Self {
        Self { left, right }
    }

    /// Apply mixed left/right speeds to both motors.
    pub fn drive(&mut self, left: f64, right: f64) {
        self.left.set_speed(left);
        self.right.set_speed(right);
    }

    /// Coast both motors, used on boot, e-stop, and link loss.
    pub fn stop(&mut self) {
        self.left.stop();
        self.right.stop();
    }
}

/// A physical emergency-stop input line. When asserted it must force the
/// robot into `E_STOP` regardless of what the network is saying, since a
/// jammed or malicious controller should never be able to keep a robot
/// driving through a pressed e-stop button.
pub struct EStopInput {
    gpio_pin: u32,
    active_low: bool,
}

impl EStopInput {
    pub fn new(gpio_pin: u32, active_low: bool) -> Self {
        Self {
            gpio_pin,
            active_low,
        }
    }

    /// Poll the physical line. On real hardware this reads a GPIO input;
    /// there is no peripheral on this host, so it never trips.
    ///
    /// TODO: back this with an actual GPIO read once the e-stop button is
    /// wired to a real input pin.
    pub fn is_triggered(&self) -> bool {
        let _ = (self.gpio_pin, self.active_low);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estop_input_with_no_peripheral_never_trips() {
        let input = EStopInput::new(4, true);
        assert!(!input.is_triggered());
    }

    #[test]
    fn below_coast_threshold_is_treated_as_coast() {
        let mut m = SoftwareMotor::new("left");
        m.set_speed(0.005);
        assert_eq!(m.direction(), Direction::Coast);
    }

    #[test]
    fn positive_speed_drives_forward() {
        let mut m = SoftwareMotor::new("left");
        m.set_speed(0.4);
        assert_eq!(m.direction(), Direction::Forward);
        assert!((m.duty() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn negative_speed_drives_reverse() {
        let mut m = SoftwareMotor::new("right");
        m.set_speed(-0.6);
        assert_eq!(m.direction(), Direction::Reverse);
        assert!((m.duty() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut m = SoftwareMotor::new("left");
        m.set_speed(0.5);
        m.stop();
        m.stop();
        assert_eq!(m.direction(), Direction::Coast);
        assert_eq!(m.speed(), 0.0);
    }

    #[test]
    fn out_of_range_speed_is_clamped() {
        let mut m = SoftwareMotor::new("left");
        m.set_speed(2.0);
        assert!((m.speed() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn drive_train_stop_coasts_both_motors() {
        let mut dt = DriveTrain::new(SoftwareMotor::new("left"), SoftwareMotor::new("right"));
        dt.drive(0.5, -0.5);
        dt.stop();
        assert_eq!(dt.left.direction(), Direction::Coast);
        assert_eq!(dt.right.direction(), Direction::Coast);
    }
}
