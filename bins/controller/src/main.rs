//! Host controller: finds a robot, optionally reconfigures it, and otherwise
//! runs the fixed-rate drive loop that streams stick input to it.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use discovery::DiscoveredRobot;
use input::{GamepadSource, InputFrame, InputShaper, KeyboardSource};
use protocol::Socket;
use tracing::{info, warn};
use types::{Calibration, Color, HostMessage, RobotMessage};

/// Robot was found and driven (or configured) successfully, or the user
/// cancelled gracefully.
const EXIT_OK: i32 = 0;
/// No robot could be found, by cache, argument, or broadcast discovery; or
/// some other component failed to come up.
const EXIT_NO_ROBOT: i32 = 1;
/// A network error occurred talking to a robot that was otherwise found.
/// An enrichment beyond the distilled spec's two-code scheme: it lets a
/// script distinguish "nothing out there" from "something broke mid-session".
const EXIT_NETWORK_ERROR: i32 = 2;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Linearly increasing receive timeouts for the configurator's retry
/// schedule: a dropped reply on a lossy UDP link shouldn't be mistaken for
/// a robot that rejected the request.
const CONFIGURE_RETRY_TIMEOUTS: [Duration; 3] = [
    Duration::from_secs(3),
    Duration::from_secs(4),
    Duration::from_secs(5),
];

#[derive(Parser, Debug)]
#[command(name = "controller", about = "picogo host controller")]
struct Cli {
    /// Robot IP or hostname. If omitted, the last-used robot is probed and,
    /// failing that, the LAN is broadcast-scanned for one.
    robot: Option<String>,

    /// Enter configuration mode instead of driving.
    #[arg(long)]
    configure: bool,

    /// In configuration mode, the target robot's identity slot (1..=8).
    /// Only takes effect if it matches the robot's own id.
    #[arg(long)]
    robot_id: Option<u8>,

    /// In configuration mode, rename the robot (requires `--robot-id`).
    #[arg(long)]
    name: Option<String>,

    /// In configuration mode, recolor the robot as "r,g,b" (requires
    /// `--robot-id`).
    #[arg(long)]
    color: Option<String>,

    /// In configuration mode, set the robot's steering trim.
    #[arg(long)]
    steering_trim: Option<f64>,

    /// Drive loop tick rate in Hz.
    #[arg(long, default_value_t = 30)]
    rate_hz: u32,
}

fn last_robot_cache_path() -> PathBuf {
    let mut path = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    path.push(".picogo_last_robot");
    path
}

fn save_last_robot(addr: SocketAddr) {
    if let Err(err) = fs::write(last_robot_cache_path(), addr.ip().to_string()) {
        warn!(%err, "failed to cache last robot address");
    }
}

fn load_last_robot() -> Option<IpAddr> {
    fs::read_to_string(last_robot_cache_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn parse_color(s: &str) -> anyhow::Result<Color> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [r, g, b] = parts.as_slice() else {
        anyhow::bail!("color must be \"r,g,b\", got {s:?}");
    };
    Ok(Color {
        r: r.parse()?,
        g: g.parse()?,
        b: b.parse()?,
    })
}

/// Resolve the robot to talk to: an explicit argument, else a broadcast
/// scan, falling back to the cached last-used address if the scan turns up
/// nothing (some networks filter broadcast traffic).
async fn resolve_robot(explicit: Option<&str>) -> anyhow::Result<DiscoveredRobot> {
    if let Some(host) = explicit {
        let ip: IpAddr = match host.parse() {
            Ok(ip) => ip,
            Err(_) => {
                let addr = format!("{host}:{}", protocol::PORT);
                tokio::net::lookup_host(&addr)
                    .await?
                    .next()
                    .map(|a| a.ip())
                    .ok_or_else(|| anyhow::anyhow!("could not resolve host {host}"))?
            }
        };
        let addr = SocketAddr::new(ip, protocol::PORT);
        let info = discovery::probe(addr, PROBE_TIMEOUT).await?;
        return Ok(DiscoveredRobot { addr, info });
    }

    match discovery::discover(DISCOVERY_TIMEOUT).await {
        Ok(mut found) if !found.is_empty() => return Ok(found.remove(0)),
        Ok(_) => info!("broadcast discovery found nothing, falling back to cached robot"),
        Err(err) => warn!(%err, "broadcast discovery failed, falling back to cached robot"),
    }

    if let Some(ip) = load_last_robot() {
        let addr = SocketAddr::new(ip, protocol::PORT);
        if let Ok(info) = discovery::probe(addr, PROBE_TIMEOUT).await {
            info!(%addr, "reconnected to cached robot after broadcast came up empty");
            return Ok(DiscoveredRobot { addr, info });
        }
    }

    anyhow::bail!("no robots responded to discovery")
}

/// Send a configuration request and wait for its reply, retrying up to
/// [`CONFIGURE_RETRY_TIMEOUTS`]'s length of times with increasing receive
/// timeouts. UDP replies get dropped; a silent robot isn't necessarily one
/// that refused the request.
async fn send_configure_request(
    socket: &Socket,
    robot: SocketAddr,
    msg: &HostMessage,
) -> anyhow::Result<RobotMessage> {
    for (attempt, timeout) in CONFIGURE_RETRY_TIMEOUTS.iter().enumerate() {
        socket.send(robot, msg).await?;
        match tokio::time::timeout(*timeout, socket.recv::<RobotMessage>()).await {
            Ok(Ok((_, reply))) => return Ok(reply),
            Ok(Err(err)) => warn!(%err, attempt, "malformed reply from robot, retrying"),
            Err(_) => warn!(
                attempt,
                timeout_s = timeout.as_secs(),
                "no reply from robot, retrying with a longer timeout"
            ),
        }
    }
    anyhow::bail!(
        "robot at {robot} did not respond after {} attempts",
        CONFIGURE_RETRY_TIMEOUTS.len()
    )
}

async fn run_configure(socket: &Socket, robot: SocketAddr, cli: &Cli) -> anyhow::Result<()> {
    if let Some(robot_id) = cli.robot_id {
        let name = cli.name.clone().unwrap_or_default();
        let color = match &cli.color {
            Some(s) => parse_color(s)?,
            None => Color::default(),
        };
        let reply = send_configure_request(
            socket,
            robot,
            &HostMessage::SetProfile { robot_id, name, color },
        )
        .await?;
        println!("{reply:?}");
    }

    if let Some(trim) = cli.steering_trim {
        let reply = send_configure_request(socket, robot, &HostMessage::GetCalibration).await?;
        let mut calibration = match reply {
            RobotMessage::CalibrationResponse { calibration, .. } => calibration,
            _ => Calibration::default(),
        };
        calibration.steering_trim = trim;

        let reply =
            send_configure_request(socket, robot, &HostMessage::SetCalibration { calibration }).await?;
        println!("{reply:?}");
    }

    Ok(())
}

enum InputSource {
    Gamepad(GamepadSource),
    Keyboard(KeyboardSource),
}

impl InputSource {
    fn open() -> Self {
        match GamepadSource::new() {
            Ok(source) => {
                info!("using gamepad input");
                InputSource::Gamepad(source)
            }
            Err(err) => {
                warn!(%err, "no gamepad available, falling back to keyboard");
                InputSource::Keyboard(KeyboardSource::new())
            }
        }
    }

    fn poll(&mut self) -> InputFrame {
        let result = match self {
            InputSource::Gamepad(source) => source.poll(),
            InputSource::Keyboard(source) => source.poll(),
        };
        result.unwrap_or_default()
    }
}

async fn run_drive_loop(socket: &Socket, robot: SocketAddr, rate_hz: u32) -> anyhow::Result<()> {
    let mut input = InputSource::open();
    let mut seq: u32 = 0;
    let mut interval = tokio::time::interval(Duration::from_millis(1000 / rate_hz as u64));
    let mut charging = false;

    println!("driving {robot} at {rate_hz} Hz, 'c' toggles charging mode, ctrl-c to stop");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let frame = input.poll();

                if frame.charging_toggle_pressed {
                    charging = !charging;
                    if let Err(err) = socket.send(robot, &HostMessage::Charging { enable: charging }).await {
                        warn!(%err, "failed to send charging toggle");
                    }
                }

                let axes = InputShaper::shape(frame.axes.throttle, frame.axes.steer);
                let msg = HostMessage::Drive {
                    seq,
                    ts: protocol::now_millis(),
                    axes,
                };
                if let Err(err) = socket.send(robot, &msg).await {
                    warn!(%err, "failed to send drive packet");
                }
                seq = seq.wrapping_add(1);
            }
            result = socket.recv::<RobotMessage>() => {
                // Neither `drive` nor `charging` gets a reply; anything that
                // does show up here is unexpected but not fatal to the loop.
                if let Err(err) = result {
                    warn!(%err, "malformed reply from robot");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nstopping");
                let _ = socket.send(robot, &HostMessage::Drive {
                    seq,
                    ts: protocol::now_millis(),
                    axes: types::Axes::default(),
                }).await;
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let robot = tokio::select! {
        result = resolve_robot(cli.robot.as_deref()) => match result {
            Ok(robot) => robot,
            Err(err) => {
                eprintln!("no robot found: {err}");
                return std::process::ExitCode::from(EXIT_NO_ROBOT as u8);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            println!("discovery cancelled");
            return std::process::ExitCode::from(EXIT_OK as u8);
        }
    };
    println!(
        "found {} ({}) at {}",
        robot.info.name, robot.info.firmware_version, robot.addr
    );
    save_last_robot(robot.addr);

    let socket = match Socket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(err) => {
            eprintln!("failed to open socket: {err}");
            return std::process::ExitCode::from(EXIT_NETWORK_ERROR as u8);
        }
    };

    let result = if cli.configure {
        run_configure(&socket, robot.addr, &cli).await
    } else {
        run_drive_loop(&socket, robot.addr, cli.rate_hz).await
    };

    match result {
        Ok(()) => std::process::ExitCode::from(EXIT_OK as u8),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::ExitCode::from(EXIT_NETWORK_ERROR as u8)
        }
    }
}
