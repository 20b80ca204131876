// Server relay engine: the server's routing table as a pure state machine.
//
// `ServerEngine` owns the `SessionRegistry` and turns inbound batches into
// (a) messages to multicast to every session and (b) local notifications.
// It never touches a socket; `server.rs` feeds it transport callbacks from
// the actor thread and writes whatever it returns.
//
// Routing by inbound classification:
// - Connection:           ID negotiation (below).
// - ClientToServer:       local notification only.
// - ClientToAll,
//   ClientToClient:       relayed verbatim to everyone; receivers filter.
// - ClientToAllAndServer: both.
// - anything else:        ignored.
//
// ID negotiation for a Connection from session S asking for ID D with client
// handle H: resolve D against the roster (D, else D1, D2, ...), register it
// for S, then queue ChangeID (addressed to H, only if renamed), ClientOnline
// (the full roster, addressed to the assigned ID), and ClientConnected. The
// order matters: the newcomer must adopt its new ID before it checks the
// ClientOnline receiver.
//
// A requested ID the wire cannot carry (empty, or containing a separator) is
// cleaned first: separators are stripped and an empty result becomes
// `FALLBACK_ID`. The cleaned ID then resolves like any other, so the client
// learns it through ChangeID.
//
// Everything one inbound batch produces is flushed as one outbound batch.
// Disconnect notices are flushed on their own, immediately.

use lan_relay_protocol::{
    Classification, FIELD_SEP, Message, REC_SEP, SUB_SEP, SessionHandle, is_valid_unique_id,
};
use tracing::{debug, info, warn};

use crate::event::RelayEvent;
use crate::registry::SessionRegistry;

/// Stand-in for a requested ID that is empty once cleaned.
const FALLBACK_ID: &str = "Peer";

/// What processing produced: one outbound batch plus local events.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ServerOutput {
    pub broadcast: Vec<Message>,
    pub events: Vec<RelayEvent>,
}

#[derive(Debug, Default)]
pub struct ServerEngine {
    registry: SessionRegistry,
}

impl ServerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Process one decoded inbound batch from `session`, in order.
    pub fn process_batch(&mut self, session: SessionHandle, messages: Vec<Message>) -> ServerOutput {
        let mut out = ServerOutput::default();
        for msg in messages {
            match msg.classification() {
                Classification::Connection => self.negotiate(session, msg, &mut out),
                Classification::ClientToServer => {
                    out.events.push(RelayEvent::MessageReceived { message: msg });
                }
                Classification::ClientToAll | Classification::ClientToClient => {
                    out.broadcast.push(msg);
                }
                Classification::ClientToAllAndServer => {
                    out.events.push(RelayEvent::MessageReceived {
                        message: msg.clone(),
                    });
                    out.broadcast.push(msg);
                }
                other => {
                    debug!(%session, classification = ?other, "ignoring message");
                }
            }
        }
        out
    }

    fn negotiate(&mut self, session: SessionHandle, msg: Message, out: &mut ServerOutput) {
        if let Some(existing) = self.registry.unique_id(session) {
            warn!(role = "server", %session, unique_id = existing, "repeated Connection on a registered session, ignoring");
            return;
        }

        let desired = msg.sender_unique_id.unwrap_or_default();
        let client_handle = msg.content;
        let usable = usable_id(&desired);
        if usable != desired {
            warn!(role = "server", %session, requested = ?desired, cleaned = %usable, "requested unique id is not usable");
        }
        let assigned = self.registry.resolve_id(&usable);
        self.registry.register(session, assigned.clone());

        if assigned != desired {
            info!(role = "server", %session, requested = ?desired, assigned = %assigned, "renaming client");
            out.broadcast.push(Message::change_id(&client_handle, &assigned));
        }
        out.broadcast.push(Message::client_online(
            &assigned,
            self.registry.roster_snapshot(),
        ));
        out.broadcast.push(Message::client_connected(&assigned));

        info!(role = "server", %session, unique_id = %assigned, peers = self.registry.len(), "client registered");
        out.events.push(RelayEvent::PeerConnected {
            unique_id: assigned,
        });
    }

    /// A session's transport closed. Returns the disconnect notice to send
    /// right away, or nothing if the session never registered.
    pub fn session_closed(&mut self, session: SessionHandle) -> ServerOutput {
        let Some(unique_id) = self.registry.release(session) else {
            debug!(%session, "unregistered session closed");
            return ServerOutput::default();
        };
        info!(role = "server", %session, unique_id = %unique_id, peers = self.registry.len(), "client left");
        ServerOutput {
            broadcast: vec![Message::client_disconnected(&unique_id)],
            events: vec![RelayEvent::PeerDisconnected { unique_id }],
        }
    }

    /// Drop all registrations (server stop).
    pub fn reset(&mut self) {
        self.registry.clear();
    }
}

fn usable_id(requested: &str) -> String {
    if is_valid_unique_id(requested) {
        return requested.to_string();
    }
    let cleaned: String = requested
        .chars()
        .filter(|c| ![REC_SEP, FIELD_SEP, SUB_SEP].contains(c))
        .collect();
    if cleaned.is_empty() {
        FALLBACK_ID.to_string()
    } else {
        cleaned
    }
}
