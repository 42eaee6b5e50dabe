//! Robot lifecycle state machine and the indicator event bus.

use tracing::{info, warn};
use types::{RobotProfile, RobotState};

/// Events that drive [`StateMachine`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Network interface is up and the UDP socket is bound.
    NetworkUp,
    /// A controller has been heard from (discover or drive packet).
    ClientSeen,
    /// A `drive` packet was processed.
    DriveCommand,
    /// The link watchdog tripped.
    LinkTimeout,
    /// Operator-triggered or fault-triggered emergency stop.
    EStop,
    /// E-stop condition cleared.
    EStopCleared,
    /// Robot was placed on its charging dock.
    ChargingStarted,
    /// Robot was taken off its charging dock.
    ChargingEnded,
}

/// Drives a robot's lifecycle through [`RobotState`].
///
/// Boot order matters: motors are constructed disabled and the watchdog
/// disarmed before the network comes up, so a robot can never drive before
/// it has a live link to feed its watchdog.
pub struct StateMachine {
    state: RobotState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: RobotState::Boot,
        }
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    /// Process an event and return the resulting state.
    pub fn transition(&mut self, event: Event) -> RobotState {
        let old_state = self.state;

        self.state = match (self.state, event) {
            (RobotState::Boot, Event::NetworkUp) => RobotState::NetUp,

            (RobotState::NetUp, Event::ClientSeen) => RobotState::ClientOk,

            (RobotState::ClientOk, Event::DriveCommand) => RobotState::Driving,
            (RobotState::ClientOk, Event::ClientSeen) => RobotState::ClientOk,

            (RobotState::Driving, Event::DriveCommand) => RobotState::Driving,
            (RobotState::Driving, Event::LinkTimeout) => {
                warn!("link watchdog timed out while driving");
                RobotState::LinkLost
            }

            (RobotState::LinkLost, Event::ClientSeen) => RobotState::ClientOk,
            (RobotState::LinkLost, Event::DriveCommand) => RobotState::Driving,

            // E-stop preempts any active or link-lost state.
            (
                RobotState::ClientOk | RobotState::Driving | RobotState::LinkLost,
                Event::EStop,
            ) => RobotState::EStop,
            (RobotState::EStop, Event::EStopCleared) => RobotState::NetUp,

            // Docking can happen from any state that isn't already charging.
            (
                RobotState::NetUp
                | RobotState::ClientOk
                | RobotState::Driving
                | RobotState::LinkLost
                | RobotState::EStop,
                Event::ChargingStarted,
            ) => RobotState::Charging,
            (RobotState::Charging, Event::ChargingEnded) => RobotState::NetUp,

            (state, _) => state,
        };

        if self.state != old_state {
            info!(?old_state, new_state = ?self.state, ?event, "robot state transition");
        }

        self.state
    }

    /// Whether the robot is allowed to drive its motors right now.
    pub fn is_driving(&self) -> bool {
        matches!(self.state, RobotState::Driving)
    }

    /// Whether motors must be held stopped in this state.
    pub fn is_safe(&self) -> bool {
        !self.is_driving()
    }

    /// Force into e-stop regardless of current state, bypassing normal
    /// transition rules. Used for hard safety faults (e.g. a watchdog
    /// double-fault) that must win over whatever the robot was doing.
    pub fn force_estop(&mut self) {
        if self.state != RobotState::EStop {
            warn!(old_state = ?self.state, "forcing e-stop");
            self.state = RobotState::EStop;
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Something worth telling an indicator subsystem (LCD, LED underglow)
/// about. Advisory only — nothing on the drive path waits for a subscriber
/// to read one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotEvent {
    /// The lifecycle state changed.
    StateChanged(RobotState),
    /// The active profile's name/color changed.
    ProfileChanged(RobotProfile),
}

/// Default number of unread events a slow indicator subscriber may fall
/// behind by before the oldest is dropped in favor of the newest.
pub const EVENT_BUS_CAPACITY: usize = 16;

/// Publishes [`RobotEvent`]s to any number of indicator subscribers without
/// ever blocking the publisher or growing unbounded memory.
///
/// Backed by a broadcast channel: once a lagging subscriber's queue fills,
/// the oldest unread event for that subscriber is dropped and its next
/// `recv()` returns a `Lagged` error reporting how many were skipped. That
/// is exactly the drop-oldest behavior indicators need — they only ever
/// care about the most current state, never a lossless history of it.
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<RobotEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = tokio::sync::broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Subscribe to future events. Past events are never replayed.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RobotEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Never blocks and never fails even with zero
    /// subscribers: an indicator that isn't listening yet simply misses it.
    pub fn publish(&self, event: RobotEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted() -> StateMachine {
        let mut sm = StateMachine::new();
        sm.transition(Event::NetworkUp);
        sm
    }

    #[test]
    fn boots_through_to_driving() {
        let mut sm = booted();
        assert_eq!(sm.state(), RobotState::NetUp);

        sm.transition(Event::ClientSeen);
        assert_eq!(sm.state(), RobotState::ClientOk);

        sm.transition(Event::DriveCommand);
        assert_eq!(sm.state(), RobotState::Driving);
        assert!(sm.is_driving());
    }

    #[test]
    fn watchdog_timeout_drops_to_link_lost_and_stops_driving() {
        let mut sm = booted();
        sm.transition(Event::ClientSeen);
        sm.transition(Event::DriveCommand);

        sm.transition(Event::LinkTimeout);
        assert_eq!(sm.state(), RobotState::LinkLost);
        assert!(sm.is_safe());
    }

    #[test]
    fn estop_preempts_driving_and_requires_explicit_clear() {
        let mut sm = booted();
        sm.transition(Event::ClientSeen);
        sm.transition(Event::DriveCommand);

        sm.transition(Event::EStop);
        assert_eq!(sm.state(), RobotState::EStop);

        // A further drive command does not resume driving.
        sm.transition(Event::DriveCommand);
        assert_eq!(sm.state(), RobotState::EStop);

        sm.transition(Event::EStopCleared);
        assert_eq!(sm.state(), RobotState::NetUp);
    }

    #[test]
    fn docking_and_undocking_round_trips_through_net_up() {
        let mut sm = booted();
        sm.transition(Event::ClientSeen);
        sm.transition(Event::DriveCommand);

        sm.transition(Event::ChargingStarted);
        assert_eq!(sm.state(), RobotState::Charging);
        assert!(sm.is_safe());

        sm.transition(Event::ChargingEnded);
        assert_eq!(sm.state(), RobotState::NetUp);
    }

    #[test]
    fn force_estop_overrides_any_state() {
        let mut sm = StateMachine::new();
        sm.force_estop();
        assert_eq!(sm.state(), RobotState::EStop);
    }

    #[tokio::test]
    async fn event_bus_delivers_published_events_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(RobotEvent::StateChanged(RobotState::Driving));

        assert_eq!(
            rx.recv().await.unwrap(),
            RobotEvent::StateChanged(RobotState::Driving)
        );
    }

    #[tokio::test]
    async fn event_bus_publish_never_blocks_with_no_subscribers() {
        let bus = EventBus::new();
        bus.publish(RobotEvent::StateChanged(RobotState::Boot));
    }

    #[tokio::test]
    async fn event_bus_drops_oldest_when_a_subscriber_falls_behind() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for _ in 0..(EVENT_BUS_CAPACITY + 5) {
            bus.publish(RobotEvent::StateChanged(RobotState::Driving));
        }

        // The lagging subscriber should observe a Lagged error rather than
        // blocking the publisher or growing memory unbounded.
        let result = rx.recv().await;
        assert!(matches!(
            result,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_))
        ));
    }
}
