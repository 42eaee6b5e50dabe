//! UDP/JSON wire protocol: socket wrapper, framing, and freshness rules.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::net::{ToSocketAddrs, UdpSocket};

/// UDP port both the robot runtime and the controller bind/send to.
pub const PORT: u16 = 8765;

/// Packets larger than this are almost certainly not one of ours.
const MAX_PACKET_SIZE: usize = 2048;

/// A `drive` packet older than this, measured against the receiver's clock,
/// is dropped rather than acted on.
pub const MAX_COMMAND_AGE_MS: u64 = 500;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("packet from {0} exceeds max size")]
    TooLarge(SocketAddr),
}

/// Current time as Unix epoch milliseconds, used to stamp and validate
/// `drive` packets.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

/// True if a packet timestamped `ts_ms` is older than [`MAX_COMMAND_AGE_MS`]
/// relative to `now_ms`. Packets from a clock-skewed future are never
/// considered stale, only ones that have aged out.
pub fn is_stale(ts_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(ts_ms) > MAX_COMMAND_AGE_MS
}

/// Packets timestamped further than this into the future are almost
/// certainly from an unsynchronized host clock rather than a real replay;
/// they are still accepted (clocks across a LAN are not assumed to be
/// synchronized) but are worth a log line.
pub const CLOCK_SKEW_WARN_MS: u64 = 1_000;

/// True if `ts_ms` is far enough ahead of `now_ms` to suggest clock skew
/// worth logging. Does not affect whether the packet is accepted.
pub fn is_clock_skewed_ahead(ts_ms: u64, now_ms: u64) -> bool {
    ts_ms.saturating_sub(now_ms) > CLOCK_SKEW_WARN_MS
}

/// A JSON-over-UDP socket shared by both ends of the protocol. Generic over
/// the message type so the robot runtime can bind it to [`types::HostMessage`]
/// and the controller to [`types::RobotMessage`].
pub struct Socket {
    inner: UdpSocket,
}

impl Socket {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let inner = UdpSocket::bind(addr).await?;
        Ok(Self { inner })
    }

    /// Enable sending to the LAN broadcast address, needed for discovery.
    pub fn set_broadcast(&self, on: bool) -> Result<(), ProtocolError> {
        self.inner.set_broadcast(on)?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.inner.local_addr()?)
    }

    /// Serialize `msg` to JSON and send it to `addr`.
    pub async fn send<T: Serialize>(&self, addr: SocketAddr, msg: &T) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(msg)?;
        self.inner.send_to(&payload, addr).await?;
        Ok(())
    }

    /// Receive one packet and decode it as `T`. A packet that is too large,
    /// not valid UTF-8 JSON, or doesn't match `T`'s shape is reported as an
    /// error to the caller, which should log and keep looping rather than
    /// tear down the socket.
    pub async fn recv<T: DeserializeOwned>(&self) -> Result<(SocketAddr, T), ProtocolError> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, from) = self.inner.recv_from(&mut buf).await?;
        if len == buf.len() {
            return Err(ProtocolError::TooLarge(from));
        }
        let msg = serde_json::from_slice(&buf[..len])?;
        Ok((from, msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Axes, HostMessage};

    #[test]
    fn fresh_packet_is_not_stale() {
        let now = 10_000;
        assert!(!is_stale(now - 100, now));
    }

    #[test]
    fn packet_older_than_max_age_is_stale() {
        let now = 10_000;
        assert!(is_stale(now - 600, now));
    }

    #[test]
    fn packet_from_the_future_is_not_stale() {
        // Clock skew should not cause drive packets to be dropped.
        let now = 10_000;
        assert!(!is_stale(now + 5_000, now));
    }

    #[test]
    fn modest_future_skew_is_not_flagged() {
        let now = 10_000;
        assert!(!is_clock_skewed_ahead(now + 200, now));
    }

    #[test]
    fn large_future_skew_is_flagged_but_still_accepted() {
        let now = 10_000;
        assert!(is_clock_skewed_ahead(now + 5_000, now));
        assert!(!is_stale(now + 5_000, now));
    }

    #[tokio::test]
    async fn round_trips_a_drive_message_over_loopback() {
        let robot = Socket::bind("127.0.0.1:0").await.unwrap();
        let controller = Socket::bind("127.0.0.1:0").await.unwrap();
        let robot_addr = robot.local_addr().unwrap();

        let sent = HostMessage::Drive {
            seq: 42,
            ts: now_millis(),
            axes: Axes {
                throttle: 0.5,
                steer: -0.25,
            },
        };
        controller.send(robot_addr, &sent).await.unwrap();

        let (_from, received): (_, HostMessage) = robot.recv().await.unwrap();
        assert_eq!(received, sent);
    }
}
