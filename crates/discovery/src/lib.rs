//! LAN broadcast discovery of picogo robots.
//!
//! The controller doesn't know a robot's address ahead of time, so it
//! broadcasts a `discover` packet to every IPv4 interface's broadcast
//! address and collects whichever robots reply within a short window.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use types::{HostMessage, RobotInfo, RobotMessage};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("network error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[from] std::io::Error),
    #[error("no broadcast-capable IPv4 interface found")]
    NoInterfaces,
    #[error("{0} replied to discover with something other than robot_info")]
    UnexpectedReply(SocketAddr),
}

/// A robot found by [`discover`], paired with the address it replied from.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredRobot {
    pub addr: SocketAddr,
    pub info: RobotInfo,
}

/// Broadcast a `discover` packet on every usable interface and collect
/// replies for `timeout`, deduplicated by source IP (a robot with several
/// interfaces up, or one that replies to more than one broadcast, only
/// appears once).
pub async fn discover(timeout: Duration) -> Result<Vec<DiscoveredRobot>, DiscoveryError> {
    let socket = protocol::Socket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let targets = broadcast_targets()?;
    if targets.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }
    for target in &targets {
        debug!(%target, "sending discover broadcast");
        socket.send(*target, &HostMessage::Discover).await?;
    }

    let mut seen: HashSet<IpAddr> = HashSet::new();
    let mut found: Vec<DiscoveredRobot> = Vec::new();
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv::<RobotMessage>()).await {
            Ok(Ok((from, RobotMessage::RobotInfo(info)))) => {
                // Keep the first reply from a given IP and preserve arrival
                // order; a robot that answers more than once (multiple
                // interfaces, or simply a duplicate broadcast) must not push
                // itself further down the list or overwrite its own entry.
                if seen.insert(from.ip()) {
                    found.push(DiscoveredRobot {
                        addr: SocketAddr::new(from.ip(), protocol::PORT),
                        info,
                    });
                }
            }
            Ok(Ok(_other)) => {
                // Not a discovery reply; ignore and keep listening.
            }
            Ok(Err(err)) => {
                warn!(%err, "malformed packet during discovery");
            }
            Err(_elapsed) => break,
        }
    }

    Ok(found)
}

/// Probe a single known address directly, bypassing broadcast. Used to
/// reconnect to a robot whose address was cached from a previous session.
pub async fn probe(addr: SocketAddr, timeout: Duration) -> Result<RobotInfo, DiscoveryError> {
    let socket = protocol::Socket::bind("0.0.0.0:0").await?;
    socket.send(addr, &HostMessage::Discover).await?;

    let (from, msg): (_, RobotMessage) =
        tokio::time::timeout(timeout, socket.recv())
            .await
            .map_err(|_| protocol::ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "robot did not respond to discover",
            )))??;

    match msg {
        RobotMessage::RobotInfo(info) => Ok(info),
        _ => Err(DiscoveryError::UnexpectedReply(from)),
    }
}

/// Interface name prefixes used by VPN clients and container runtimes. A
/// broadcast sent out one of these never reaches a robot and just adds noise
/// (and, for some VPNs, a confusing "discover" echoed back to ourselves).
const EXCLUDED_INTERFACE_PREFIXES: &[&str] = &["docker", "veth", "br-", "tun", "tap", "wg", "utun", "zt"];

fn is_excluded_interface(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    EXCLUDED_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Docker's default bridge network, excluded even if reached through an
/// interface name this doesn't recognize (e.g. a renamed bridge).
fn is_docker_default_bridge(addr: Ipv4Addr) -> bool {
    addr.octets()[0] == 172 && (16..=31).contains(&addr.octets()[1])
}

fn broadcast_targets() -> Result<Vec<SocketAddr>, DiscoveryError> {
    let interfaces = if_addrs::get_if_addrs()?;
    let targets = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter(|iface| !is_excluded_interface(&iface.name))
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => v4.broadcast,
            if_addrs::IfAddr::V6(_) => None,
        })
        .filter(|bcast| !is_docker_default_bridge(*bcast))
        .map(|bcast| SocketAddr::new(IpAddr::V4(bcast), protocol::PORT))
        .collect();
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Calibration, Color};

    fn sample_info(name: &str) -> RobotInfo {
        RobotInfo {
            robot_id: 1,
            name: name.into(),
            firmware_version: "0.1.0".into(),
            color: Color { r: 255, g: 0, b: 0 },
            calibration: Calibration::default(),
            battery_percent: Some(90.0),
        }
    }

    /// Mirrors the dedup-and-order logic in `discover`'s receive loop,
    /// without needing a live socket to drive it.
    fn dedupe_keep_first(replies: impl IntoIterator<Item = (IpAddr, RobotInfo)>) -> Vec<DiscoveredRobot> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for (ip, info) in replies {
            if seen.insert(ip) {
                found.push(DiscoveredRobot {
                    addr: SocketAddr::new(ip, protocol::PORT),
                    info,
                });
            }
        }
        found
    }

    #[test]
    fn discovered_robots_dedupe_by_source_ip_keeping_the_first() {
        let ip: IpAddr = "192.168.1.50".parse().unwrap();
        let found = dedupe_keep_first([
            (ip, sample_info("First Reply")),
            (ip, sample_info("Second Reply")),
        ]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].info.name, "First Reply");
    }

    #[test]
    fn discovered_robots_preserve_arrival_order_across_subnets() {
        let first: IpAddr = "10.0.0.5".parse().unwrap();
        let second: IpAddr = "192.168.1.9".parse().unwrap();
        let found = dedupe_keep_first([
            (first, sample_info("Robot A")),
            (second, sample_info("Robot B")),
        ]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].addr.ip(), first);
        assert_eq!(found[1].addr.ip(), second);
    }

    #[test]
    fn docker_and_vpn_interfaces_are_excluded_by_name() {
        assert!(is_excluded_interface("docker0"));
        assert!(is_excluded_interface("veth1234abc"));
        assert!(is_excluded_interface("tun0"));
        assert!(is_excluded_interface("wg0"));
        assert!(!is_excluded_interface("eth0"));
        assert!(!is_excluded_interface("wlan0"));
    }

    #[test]
    fn docker_default_bridge_range_is_excluded_even_if_renamed() {
        assert!(is_docker_default_bridge("172.17.255.255".parse().unwrap()));
        assert!(!is_docker_default_bridge("192.168.1.255".parse().unwrap()));
    }
}
