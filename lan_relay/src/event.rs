// Notifications from the relay to the embedding application.
//
// Each notification kind is one `RelayEvent` variant, delivered through the
// `mpsc` channel owned by `Relay` (drain it with `Relay::poll_events`). The
// engines return events in the order they processed the triggering batch, and
// the transport drivers forward them in that order.

use std::net::SocketAddr;
use std::sync::mpsc::Sender;

use lan_relay_protocol::Message;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    /// The server is listening.
    ServerStarted { addr: SocketAddr },
    /// The server stopped. `reason` is set when it stopped on a failure.
    ServerStopped { reason: Option<String> },
    /// This client's connection to the server came up.
    Connected { unique_id: String },
    /// This client's connection to the server went down.
    Disconnected,
    /// The server renamed this client to resolve an ID collision.
    UniqueIdChanged { old: String, new: String },
    /// An application message addressed to this process arrived.
    MessageReceived { message: Message },
    /// Another peer joined.
    PeerConnected { unique_id: String },
    /// Another peer left.
    PeerDisconnected { unique_id: String },
}

/// Forward events to the application. A dropped receiver means the
/// application no longer listens; events are discarded.
pub(crate) fn emit_all(tx: &Sender<RelayEvent>, events: impl IntoIterator<Item = RelayEvent>) {
    for event in events {
        if tx.send(event).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use lan_relay_protocol::Receivers;

    use super::*;

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_string(&RelayEvent::PeerConnected {
            unique_id: "Alice".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"peer_connected","unique_id":"Alice"}"#);
    }

    #[test]
    fn message_events_carry_the_message() {
        let event = RelayEvent::MessageReceived {
            message: Message::new(Receivers::AllClients, "chat", "hi"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "message_received");
        assert_eq!(value["message"]["content"], "hi");
    }

    #[test]
    fn emit_stops_quietly_without_a_listener() {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        emit_all(&tx, [RelayEvent::Disconnected]);
    }
}
