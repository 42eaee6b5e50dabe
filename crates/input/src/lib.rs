//! Gamepad/keyboard input and axis shaping.

use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use gilrs::{Axis, Button, Gilrs, GamepadId};
use thiserror::Error;
use tracing::{debug, info};
use types::Axes;

/// Stick input below this magnitude (after centering) is treated as zero,
/// so a controller that doesn't rest exactly at center doesn't creep.
pub const DEAD_ZONE: f64 = 0.08;
/// Exponent applied to throttle after the deadzone, for finer control near
/// center without sacrificing reach at full stick deflection.
pub const THROTTLE_EXPO: f64 = 2.0;
/// Exponent applied to steer after the deadzone.
pub const STEERING_EXPO: f64 = 1.5;
pub const THROTTLE_SENSITIVITY: f64 = 1.0;
pub const STEERING_SENSITIVITY: f64 = 0.4;
/// How much steering authority is given up as throttle approaches full
/// scale, so sharp turns at speed don't flip the robot.
pub const SPEED_STEERING_REDUCTION: f64 = 0.5;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("no gamepad is connected")]
    NoGamepad,
    #[error("terminal input error: {0}")]
    Terminal(#[from] std::io::Error),
}

/// Applies the deadzone/expo/sensitivity/speed-attenuation pipeline to raw
/// stick input, producing [`Axes`] ready to hand to the differential mixer.
pub struct InputShaper;

impl InputShaper {
    pub fn shape(raw_throttle: f64, raw_steer: f64) -> Axes {
        let throttle = Self::expo(Self::deadzone(raw_throttle)) * THROTTLE_SENSITIVITY;
        let mut steer = Self::expo_steer(Self::deadzone(raw_steer)) * STEERING_SENSITIVITY;

        let attenuation = (1.0 - SPEED_STEERING_REDUCTION * throttle.abs()).max(0.0);
        steer *= attenuation;

        Axes {
            throttle: throttle.clamp(-1.0, 1.0),
            steer: steer.clamp(-1.0, 1.0),
        }
    }

    fn deadzone(v: f64) -> f64 {
        if v.abs() < DEAD_ZONE {
            0.0
        } else {
            v.signum() * (v.abs() - DEAD_ZONE) / (1.0 - DEAD_ZONE)
        }
    }

    fn expo(v: f64) -> f64 {
        v.signum() * v.abs().powf(THROTTLE_EXPO)
    }

    fn expo_steer(v: f64) -> f64 {
        v.signum() * v.abs().powf(STEERING_EXPO)
    }
}

/// Low-end deadzone applied to analog trigger values before they're
/// combined into throttle, so a trigger that doesn't rest at exactly zero
/// doesn't creep the robot forward.
const TRIGGER_DEAD_ZONE: f64 = 0.1;

/// Rescale an analog trigger already normalized to `[0.0, 1.0]` (released to
/// fully pressed), applying [`TRIGGER_DEAD_ZONE`] at the low end.
fn shape_trigger(value: f64) -> f64 {
    let value = value.clamp(0.0, 1.0);
    if value < TRIGGER_DEAD_ZONE {
        0.0
    } else {
        (value - TRIGGER_DEAD_ZONE) / (1.0 - TRIGGER_DEAD_ZONE)
    }
}

/// Raw, unshaped stick input read from whichever physical source is active.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawAxes {
    pub throttle: f64,
    pub steer: f64,
}

/// One polled frame: raw axes plus edge-detected buttons a `CommandLoop`
/// might act on between drive ticks (profile/calibration/charging events).
/// Buttons are reported only on the tick they transition released→pressed,
/// so a held button doesn't fire its action every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputFrame {
    pub axes: RawAxes,
    /// Edge-triggered: toggle charging mode on the robot.
    pub charging_toggle_pressed: bool,
}

/// Reads a gamepad via `gilrs`. Throttle is the right trigger minus the
/// left trigger (both analog 0.0..=1.0), steer is the left stick's X axis.
/// `Start` is the charging-mode toggle, matching a typical dock/pause
/// button placement.
pub struct GamepadSource {
    gilrs: Gilrs,
    active: Option<GamepadId>,
}

impl GamepadSource {
    pub fn new() -> Result<Self, InputError> {
        let gilrs = Gilrs::new().map_err(|_| InputError::NoGamepad)?;
        let active = gilrs.gamepads().next().map(|(id, _)| id);
        if let Some(id) = active {
            info!(?id, "gamepad connected");
        }
        Ok(Self { gilrs, active })
    }

    /// Drain pending events (gilrs updates its cached gamepad state as a
    /// side effect) and read the active gamepad's current axes and any
    /// buttons pressed since the last poll.
    pub fn poll(&mut self) -> Result<InputFrame, InputError> {
        let mut charging_toggle_pressed = false;

        while let Some(event) = self.gilrs.next_event() {
            match event.event {
                gilrs::EventType::Connected => {
                    self.active.get_or_insert(event.id);
                    info!(id = ?event.id, "gamepad connected");
                }
                gilrs::EventType::Disconnected if Some(event.id) == self.active => {
                    info!(id = ?event.id, "gamepad disconnected");
                    self.active = None;
                }
                gilrs::EventType::ButtonPressed(Button::Start, _) if Some(event.id) == self.active => {
                    charging_toggle_pressed = true;
                }
                _ => {}
            }
        }

        let id = self.active.ok_or(InputError::NoGamepad)?;
        let gamepad = self.gilrs.gamepad(id);

        let steer = gamepad.value(Axis::LeftStickX) as f64;
        let forward = gamepad
            .button_data(Button::RightTrigger2)
            .map(|d| d.value() as f64)
            .unwrap_or(0.0);
        let reverse = gamepad
            .button_data(Button::LeftTrigger2)
            .map(|d| d.value() as f64)
            .unwrap_or(0.0);

        Ok(InputFrame {
            axes: RawAxes {
                throttle: shape_trigger(forward) - shape_trigger(reverse),
                steer,
            },
            charging_toggle_pressed,
        })
    }
}

/// How long a key is treated as "held" after its last press event, to
/// smooth over terminals that only report key-down and rely on OS
/// auto-repeat to simulate a hold.
const KEY_HOLD_WINDOW: Duration = Duration::from_millis(150);

/// Keyboard fallback for terminals without a connected gamepad. Arrow keys
/// and WASD both drive throttle/steer; `c` toggles charging mode.
#[derive(Default)]
pub struct KeyboardSource {
    up: Option<Instant>,
    down: Option<Instant>,
    left: Option<Instant>,
    right: Option<Instant>,
}

impl KeyboardSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self) -> Result<InputFrame, InputError> {
        let mut charging_toggle_pressed = false;

        while event::poll(Duration::ZERO)? {
            if let Event::Key(KeyEvent {
                code,
                kind: KeyEventKind::Press,
                ..
            }) = event::read()?
            {
                let now = Instant::now();
                match code {
                    KeyCode::Up | KeyCode::Char('w') => self.up = Some(now),
                    KeyCode::Down | KeyCode::Char('s') => self.down = Some(now),
                    KeyCode::Left | KeyCode::Char('a') => self.left = Some(now),
                    KeyCode::Right | KeyCode::Char('d') => self.right = Some(now),
                    KeyCode::Char('c') => charging_toggle_pressed = true,
                    _ => {}
                }
                debug!(?code, "key press");
            }
        }

        let held = |last: Option<Instant>| {
            last.is_some_and(|t| t.elapsed() < KEY_HOLD_WINDOW)
        };

        let throttle = match (held(self.up), held(self.down)) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        };
        let steer = match (held(self.left), held(self.right)) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        };

        Ok(InputFrame {
            axes: RawAxes { throttle, steer },
            charging_toggle_pressed,
        })
    }
}
