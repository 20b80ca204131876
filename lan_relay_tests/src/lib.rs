// Test-only peer for end-to-end relay tests.
//
// Wraps a real `Relay` (server or client role) and adds synchronous,
// test-friendly helpers: blocking polls that wait for a particular event or
// roster state, and a history of every event seen so far so tests can also
// assert that something did NOT happen. All networking goes through the same
// code paths as a real embedding application.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use lan_relay::{Relay, RelayConfig, RelayEvent};
use lan_relay_protocol::Message;

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `settle` waits for stragglers.
const SETTLE_TIME: Duration = Duration::from_millis(200);

pub struct TestPeer {
    relay: Relay,
    history: Vec<RelayEvent>,
}

impl TestPeer {
    /// A loopback server on an OS-assigned port.
    pub fn server() -> (Self, SocketAddr) {
        Self::server_with(RelayConfig::loopback())
    }

    /// A loopback server on a fixed port (for restarts).
    pub fn server_on(port: u16) -> (Self, SocketAddr) {
        Self::server_with(RelayConfig {
            port,
            ..RelayConfig::loopback()
        })
    }

    fn server_with(config: RelayConfig) -> (Self, SocketAddr) {
        let mut relay = Relay::new(config);
        let addr = relay.start_server().expect("start_server failed");
        let mut peer = Self {
            relay,
            history: Vec::new(),
        };
        peer.wait_for(&RelayEvent::ServerStarted { addr });
        (peer, addr)
    }

    /// Connect a client and wait until the server has answered its
    /// announcement (its ID is final and its roster is seeded).
    pub fn client(addr: SocketAddr, desired: &str) -> Self {
        Self::client_with(RelayConfig::loopback(), addr, desired)
    }

    pub fn client_with(config: RelayConfig, addr: SocketAddr, desired: &str) -> Self {
        let mut relay = Relay::new(config);
        relay
            .connect_client(desired, &addr.to_string())
            .expect("connect_client failed");
        let mut peer = Self {
            relay,
            history: Vec::new(),
        };
        peer.poll_until_registered();
        peer
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn relay_mut(&mut self) -> &mut Relay {
        &mut self.relay
    }

    pub fn unique_id(&self) -> String {
        self.relay
            .local_unique_id()
            .expect("peer is not a client")
    }

    pub fn send(&self, msg: Message) {
        self.relay.send_message(msg).expect("send_message failed");
    }

    /// Every event seen so far, oldest first.
    pub fn history(&self) -> &[RelayEvent] {
        &self.history
    }

    /// Application messages seen so far.
    pub fn received(&self) -> Vec<&Message> {
        self.history
            .iter()
            .filter_map(|event| match event {
                RelayEvent::MessageReceived { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Number of times `expected` has been seen.
    pub fn count(&self, expected: &RelayEvent) -> usize {
        self.history.iter().filter(|e| *e == expected).count()
    }

    /// Record everything pending without waiting.
    pub fn drain(&mut self) {
        self.history.extend(self.relay.poll_events());
    }

    /// Keep recording for a short quiet period, so that negative assertions
    /// see any event that was still in flight.
    pub fn settle(&mut self) {
        let start = Instant::now();
        while start.elapsed() < SETTLE_TIME {
            self.drain();
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until a new event satisfies `pick`.
    pub fn poll_until<T>(&mut self, what: &str, mut pick: impl FnMut(&RelayEvent) -> Option<T>) -> T {
        let start = Instant::now();
        loop {
            let remaining = POLL_TIMEOUT.saturating_sub(start.elapsed());
            assert!(!remaining.is_zero(), "timed out waiting for {what}");
            if let Some(event) = self.relay.recv_event_timeout(remaining) {
                let found = pick(&event);
                self.history.push(event);
                if let Some(found) = found {
                    return found;
                }
            }
        }
    }

    /// Blocking poll until `expected` arrives.
    pub fn wait_for(&mut self, expected: &RelayEvent) {
        self.poll_until(&format!("{expected:?}"), |event| (event == expected).then_some(()));
    }

    /// Blocking poll until an application message arrives.
    pub fn poll_until_received(&mut self) -> Message {
        self.poll_until("a message", |event| match event {
            RelayEvent::MessageReceived { message } => Some(message.clone()),
            _ => None,
        })
    }

    /// Blocking poll until the roster is exactly `expected` (in any order).
    pub fn poll_until_roster(&mut self, expected: &[&str]) {
        let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        expected.sort();
        let start = Instant::now();
        loop {
            let mut roster = self.relay.roster();
            roster.sort();
            if roster == expected {
                return;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for roster {expected:?}, have {roster:?}"
            );
            self.drain();
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking poll until this client's roster contains its own ID, which
    /// happens once the server's reply to the announcement is processed.
    pub fn poll_until_registered(&mut self) {
        let start = Instant::now();
        loop {
            let own = self.relay.local_unique_id();
            if own.is_some_and(|id| self.relay.roster().contains(&id)) {
                self.drain();
                return;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for registration"
            );
            self.drain();
            thread::sleep(POLL_INTERVAL);
        }
    }
}
