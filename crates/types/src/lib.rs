//! Shared wire and domain types for picogo.

use serde::{Deserialize, Serialize};

/// Raw stick axes from the controller, already shaped, in `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    /// Forward/back, positive = forward.
    pub throttle: f64,
    /// Left/right, positive = right turn.
    pub steer: f64,
}

/// Per-robot trim applied on top of [`Axes`] before mixing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Added to `steer` before mixing, to cancel a robot's natural drift.
    pub steering_trim: f64,
    /// Scales the left motor's mixed output.
    pub motor_left_scale: f64,
    /// Scales the right motor's mixed output.
    pub motor_right_scale: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            steering_trim: 0.0,
            motor_left_scale: 1.0,
            motor_right_scale: 1.0,
        }
    }
}

impl Calibration {
    /// Valid range for `steering_trim`.
    pub const TRIM_RANGE: (f64, f64) = (-0.2, 0.2);
    /// Valid range for either motor scale.
    pub const SCALE_RANGE: (f64, f64) = (0.5, 1.0);

    /// Clamp every field into its valid range. Values coming off the wire or
    /// out of a hand-edited file are never trusted as-is.
    pub fn clamped(mut self) -> Self {
        self.steering_trim = self.steering_trim.clamp(Self::TRIM_RANGE.0, Self::TRIM_RANGE.1);
        self.motor_left_scale = self.motor_left_scale.clamp(Self::SCALE_RANGE.0, Self::SCALE_RANGE.1);
        self.motor_right_scale = self.motor_right_scale.clamp(Self::SCALE_RANGE.0, Self::SCALE_RANGE.1);
        self
    }
}

/// An RGB color, e.g. for a robot's underglow/identity LED.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A saved identity for a robot: a name and a color, addressed by slot id.
///
/// `id` is 1-based (`1..=PROFILE_SLOT_COUNT`), matching the robot's own
/// fixed identity slot rather than a zero-based array index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotProfile {
    pub id: u8,
    pub name: String,
    pub color: Color,
}

/// Number of built-in profile slots a robot ships with.
pub const PROFILE_SLOT_COUNT: usize = 8;

/// Valid range for [`RobotProfile::id`].
pub const PROFILE_ID_RANGE: (u8, u8) = (1, PROFILE_SLOT_COUNT as u8);

/// Reply a robot sends to a `discover` request, identifying itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotInfo {
    pub robot_id: u8,
    pub name: String,
    pub firmware_version: String,
    pub color: Color,
    pub calibration: Calibration,
    pub battery_percent: Option<f32>,
}

/// High-level lifecycle state, mirrored to the host for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotState {
    Boot,
    NetUp,
    ClientOk,
    Driving,
    LinkLost,
    EStop,
    Charging,
}

/// Envelope sent from the controller to a robot over UDP, tagged on `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HostMessage {
    /// Broadcast to discover robots on the LAN. No payload.
    Discover,
    /// Drive request, sent at the controller's fixed tick rate.
    Drive {
        seq: u32,
        /// Unix epoch milliseconds when the packet was sent.
        ts: u64,
        axes: Axes,
    },
    /// Ask a robot to report its current calibration.
    GetCalibration,
    /// Push a new calibration to a robot. The robot clamps and persists it.
    SetCalibration { calibration: Calibration },
    /// Ask a robot to rename/recolor itself, if `robot_id` matches its own.
    SetProfile {
        robot_id: u8,
        name: String,
        color: Color,
    },
    /// Tell a robot it is docked/charging (disables driving).
    Charging { enable: bool },
}

/// Envelope sent from a robot back to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum RobotMessage {
    /// Reply to [`HostMessage::Discover`].
    RobotInfo(RobotInfo),
    /// Reply to [`HostMessage::GetCalibration`] or after a `set_calibration`.
    CalibrationResponse {
        /// `seq` of the `drive` packet most recently accepted, if any.
        /// Purely informational: it lets a configurator correlate a
        /// calibration change with the drive traffic around it.
        seq_ack: Option<u32>,
        calibration: Calibration,
    },
    /// Reply after a `set_profile` request.
    ProfileResponse {
        success: bool,
        message: String,
        robot_id: Option<u8>,
        name: Option<String>,
        color: Option<Color>,
    },
}

impl RobotMessage {
    /// Build a successful `profile_response` from the profile now active.
    pub fn profile_accepted(profile: &RobotProfile) -> Self {
        RobotMessage::ProfileResponse {
            success: true,
            message: "profile updated".to_string(),
            robot_id: Some(profile.id),
            name: Some(profile.name.clone()),
            color: Some(profile.color),
        }
    }

    /// Build a failed `profile_response` for a `robot_id` that isn't this
    /// robot's own id.
    pub fn profile_rejected(requested_robot_id: u8) -> Self {
        RobotMessage::ProfileResponse {
            success: false,
            message: format!("robot_id {requested_robot_id} does not match this robot"),
            robot_id: None,
            name: None,
            color: None,
        }
    }
}
