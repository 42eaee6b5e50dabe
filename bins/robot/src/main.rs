//! Robot runtime daemon: motor control, link watchdog, and the UDP command
//! server a controller talks to.
//!
//! Startup order matters for safety: the drive train is constructed coasted
//! and the state machine starts in `Boot`, so no motor command can reach the
//! hardware until the network is up and a controller has actually said
//! `drive`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use control::{DifferentialMixer, MixerConfig, Watchdog};
use hal::{DriveTrain, EStopInput, SoftwareMotor};
use protocol::{ProtocolError, Socket};
use state::{Event, EventBus, RobotEvent, StateMachine};
use store::{CalibrationStore, ProfileStore};
use tracing::{debug, info, warn};
use types::{HostMessage, PROFILE_ID_RANGE, RobotInfo, RobotMessage};

#[derive(Parser, Debug)]
#[command(name = "robotd", about = "picogo robot runtime")]
struct Args {
    /// UDP port to listen on.
    #[arg(long, default_value_t = protocol::PORT)]
    port: u16,

    /// Where calibration is persisted between boots.
    #[arg(long, default_value = "calibration.json")]
    calibration_path: PathBuf,

    /// How long without a fresh `drive` packet before the link is considered
    /// lost and the robot coasts.
    #[arg(long, default_value_t = 500)]
    watchdog_timeout_ms: u64,

    /// This robot's fixed identity slot (1..=8), seeding its default name
    /// and color and gating which `set_profile` requests it will accept.
    #[arg(long, default_value_t = PROFILE_ID_RANGE.0)]
    robot_id: u8,

    /// GPIO pin wired to the physical emergency-stop button.
    #[arg(long, default_value_t = 4)]
    estop_pin: u32,

    /// Mixer speed limit: throttle is scaled by this before mixing.
    #[arg(long, default_value_t = 1.0)]
    max_speed: f64,

    /// Mixer turn rate limit: steer is scaled by this before mixing.
    #[arg(long, default_value_t = 1.0)]
    turn_rate: f64,
}

struct Runtime {
    drive_train: DriveTrain<SoftwareMotor, SoftwareMotor>,
    watchdog: Watchdog,
    state: StateMachine,
    calibration: CalibrationStore,
    profiles: ProfileStore,
    estop: EStopInput,
    events: EventBus,
    mixer_config: MixerConfig,
    packets_received: u64,
    last_drive_seq: Option<u32>,
}

impl Runtime {
    fn new(args: &Args) -> Self {
        Self {
            drive_train: DriveTrain::new(SoftwareMotor::new("left"), SoftwareMotor::new("right")),
            watchdog: Watchdog::new(Duration::from_millis(args.watchdog_timeout_ms)),
            state: StateMachine::new(),
            calibration: CalibrationStore::load_or_default(&args.calibration_path),
            profiles: ProfileStore::seeded(args.robot_id),
            estop: EStopInput::new(args.estop_pin, true),
            events: EventBus::new(),
            mixer_config: MixerConfig {
                max_speed: args.max_speed,
                turn_rate: args.turn_rate,
            },
            packets_received: 0,
            last_drive_seq: None,
        }
    }

    /// Drive the state machine and mirror the result onto the event bus, so
    /// indicator subscribers see every transition without being consulted
    /// on the hot path.
    fn transition(&mut self, event: Event) {
        let state = self.state.transition(event);
        self.events.publish(RobotEvent::StateChanged(state));
    }

    async fn handle_packet(
        &mut self,
        socket: &Socket,
        from: SocketAddr,
        msg: HostMessage,
    ) -> Result<(), ProtocolError> {
        // Any well-formed command, not just `discover`/`drive`, marks the
        // robot CLIENT_OK: a controller that's only ever called
        // get_calibration so far has still been heard from.
        self.transition(Event::ClientSeen);

        match msg {
            HostMessage::Discover => {
                let profile = self.profiles.active();
                let info = RobotInfo {
                    robot_id: profile.id,
                    name: profile.name.clone(),
                    firmware_version: env!("CARGO_PKG_VERSION").to_string(),
                    color: profile.color,
                    calibration: self.calibration.get(),
                    battery_percent: None,
                };
                socket.send(from, &RobotMessage::RobotInfo(info)).await?;
            }

            HostMessage::Drive { seq, ts, axes } => {
                let now = protocol::now_millis();
                if protocol::is_stale(ts, now) {
                    debug!(seq, age_ms = now.saturating_sub(ts), "dropping stale drive packet");
                    return Ok(());
                }
                if protocol::is_clock_skewed_ahead(ts, now) {
                    warn!(seq, ahead_ms = ts.saturating_sub(now), "drive packet timestamp is ahead of local clock");
                }

                self.watchdog.feed();
                self.transition(Event::DriveCommand);
                self.packets_received += 1;
                if let Some(last) = self.last_drive_seq {
                    // seq is purely informational here: ordering is never
                    // enforced, but a gap is worth a debug log for whoever's
                    // watching link quality.
                    let gap = seq.wrapping_sub(last).wrapping_sub(1);
                    if seq > last && gap > 0 {
                        debug!(gap, total = self.packets_received, "drive packet loss detected");
                    }
                }
                self.last_drive_seq = Some(seq);

                if self.state.is_driving() {
                    let (left, right) = DifferentialMixer::mix_with_config(
                        axes,
                        &self.calibration.get(),
                        &self.mixer_config,
                    );
                    self.drive_train.drive(left, right);
                } else {
                    self.drive_train.stop();
                }

                // Fire-and-forget: drive has no reply. Acking every packet
                // at 30 Hz would double the robot's outbound traffic for no
                // benefit the watchdog/state machine don't already provide.
            }

            HostMessage::GetCalibration => {
                socket
                    .send(
                        from,
                        &RobotMessage::CalibrationResponse {
                            seq_ack: self.last_drive_seq,
                            calibration: self.calibration.get(),
                        },
                    )
                    .await?;
            }

            HostMessage::SetCalibration { calibration } => match self.calibration.set(calibration) {
                Ok(stored) => {
                    info!(?stored, "calibration updated");
                    socket
                        .send(
                            from,
                            &RobotMessage::CalibrationResponse {
                                seq_ack: self.last_drive_seq,
                                calibration: stored,
                            },
                        )
                        .await?;
                }
                Err(err) => warn!(%err, "failed to persist calibration"),
            },

            HostMessage::SetProfile { robot_id, name, color } => {
                match self.profiles.apply_set_profile(robot_id, name, color) {
                    Ok(profile) => {
                        self.events.publish(RobotEvent::ProfileChanged(profile.clone()));
                        socket.send(from, &RobotMessage::profile_accepted(profile)).await?;
                    }
                    Err(err) => {
                        warn!(%err, robot_id, "rejected set_profile for a different robot");
                        socket.send(from, &RobotMessage::profile_rejected(robot_id)).await?;
                    }
                }
            }

            HostMessage::Charging { enable } => {
                if enable {
                    self.drive_train.stop();
                    self.transition(Event::ChargingStarted);
                } else {
                    self.transition(Event::ChargingEnded);
                }
            }
        }

        Ok(())
    }

    fn check_watchdog(&mut self) {
        if self.state.is_driving() && self.watchdog.is_timed_out() {
            warn!("link watchdog timed out, coasting");
            self.drive_train.stop();
            self.transition(Event::LinkTimeout);
        }
    }

    /// Poll the physical e-stop line. A pressed button preempts every other
    /// state, network traffic included, and requires an explicit clear.
    fn check_estop(&mut self) {
        if self.estop.is_triggered() && self.state.state() != types::RobotState::EStop {
            self.drive_train.stop();
            self.transition(Event::EStop);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut runtime = Runtime::new(&args);

    let socket = match Socket::bind(("0.0.0.0", args.port)).await {
        Ok(socket) => socket,
        Err(err) => {
            // InitFailure: without a socket there is no discovery, no drive
            // path, nothing left for this process to do.
            warn!(%err, port = args.port, "failed to bind UDP socket, robot will not be reachable");
            return Err(err.into());
        }
    };
    runtime.transition(Event::NetworkUp);
    info!(port = args.port, robot_id = args.robot_id, "robot runtime listening");

    let mut watchdog_tick = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            result = socket.recv::<HostMessage>() => {
                match result {
                    Ok((from, msg)) => {
                        if let Err(err) = runtime.handle_packet(&socket, from, msg).await {
                            warn!(%err, %from, "failed to reply to packet");
                        }
                    }
                    Err(err) => warn!(%err, "malformed packet"),
                }
            }
            _ = watchdog_tick.tick() => {
                runtime.check_watchdog();
                runtime.check_estop();
            }
        }
    }
}
