// Client relay engine: the client's routing table as a pure state machine.
//
// `ClientEngine` holds this peer's identity (its Unique ID and the session
// handle of the current connection), a best-effort mirror of the roster, and
// the connection phase. `client.rs` drives it from the client actor thread;
// the engine itself never touches a socket.
//
// The server relays ClientToAll/ClientToClient verbatim to every session, so
// filtering happens here:
// - ChangeID:             only if addressed to our session handle; adopt the
//                         new ID.
// - ClientConnected:      add to roster unless it announces us.
// - ClientDisconnected:   remove from roster.
// - ClientOnline:         only if addressed to us; replace the roster.
// - ClientToAll(+Server): deliver unless we sent it.
// - ClientToClient:       deliver if addressed to us and not sent by us.
// - ServerToAll:          deliver.
// - ServerToClient:       deliver if addressed to us.
// A message that fails its check is skipped; the rest of the batch is still
// processed.

use std::collections::BTreeSet;

use lan_relay_protocol::{Classification, Message, SessionHandle, split_roster};
use tracing::{debug, info, warn};

use crate::event::RelayEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    /// First connect attempt in progress.
    Connecting,
    Connected,
    /// Lost the connection (or never got one); retrying.
    Reconnecting,
}

#[derive(Debug)]
pub struct ClientEngine {
    unique_id: String,
    session: Option<SessionHandle>,
    roster: BTreeSet<String>,
    phase: ClientPhase,
    link_up: bool,
}

impl ClientEngine {
    /// Start out with `desired` as the provisional ID.
    pub fn new(desired: impl Into<String>) -> Self {
        Self {
            unique_id: desired.into(),
            session: None,
            roster: BTreeSet::new(),
            phase: ClientPhase::Connecting,
            link_up: false,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session
    }

    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ClientPhase::Connected && self.link_up
    }

    pub fn roster(&self) -> impl Iterator<Item = &str> {
        self.roster.iter().map(String::as_str)
    }

    /// The transport connected with a fresh `session` handle. Returns the
    /// Connection announcement to send and the events to emit.
    pub fn on_connected(&mut self, session: SessionHandle) -> (Message, Vec<RelayEvent>) {
        self.session = Some(session);
        self.phase = ClientPhase::Connected;
        self.link_up = true;
        info!(%session, unique_id = %self.unique_id, "connected to server");

        let announce = Message::connection(&self.unique_id, &session.to_string());
        let events = vec![RelayEvent::Connected {
            unique_id: self.unique_id.clone(),
        }];
        (announce, events)
    }

    /// The transport closed. Clears the roster and moves to reconnecting;
    /// the driver decides whether to actually retry.
    pub fn on_disconnected(&mut self) -> Vec<RelayEvent> {
        let was_connected = self.phase == ClientPhase::Connected;
        self.session = None;
        self.link_up = false;
        self.roster.clear();
        self.phase = ClientPhase::Reconnecting;
        if was_connected {
            info!(unique_id = %self.unique_id, "disconnected from server");
            vec![RelayEvent::Disconnected]
        } else {
            Vec::new()
        }
    }

    /// The transport reported an error. The connection counts as down,
    /// but reconnecting waits for the close.
    pub fn on_transport_error(&mut self) {
        self.link_up = false;
    }

    pub fn process_batch(&mut self, messages: Vec<Message>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        for msg in messages {
            self.process(msg, &mut events);
        }
        events
    }

    fn process(&mut self, msg: Message, events: &mut Vec<RelayEvent>) {
        match msg.classification() {
            Classification::ChangeId => {
                let ours = self
                    .session
                    .is_some_and(|session| session.to_string() == msg.content);
                if !ours {
                    return;
                }
                let Some(new) = msg.receiver_unique_id.filter(|id| !id.is_empty()) else {
                    warn!(role = "client", "ChangeID without a new id, ignoring");
                    return;
                };
                if new == self.unique_id {
                    return;
                }
                let old = std::mem::replace(&mut self.unique_id, new.clone());
                self.roster.remove(&old);
                self.roster.insert(new.clone());
                info!(old = %old, new = %new, "server assigned a new unique id");
                events.push(RelayEvent::UniqueIdChanged { old, new });
            }
            Classification::ClientConnected => {
                let unique_id = msg.content;
                if unique_id == self.unique_id {
                    return;
                }
                self.roster.insert(unique_id.clone());
                events.push(RelayEvent::PeerConnected { unique_id });
            }
            Classification::ClientDisconnected => {
                let unique_id = msg.content;
                self.roster.remove(&unique_id);
                events.push(RelayEvent::PeerDisconnected { unique_id });
            }
            Classification::ClientOnline => {
                if !self.is_receiver(&msg) {
                    return;
                }
                self.roster = split_roster(&msg.content).map(str::to_string).collect();
                debug!(peers = self.roster.len(), "roster seeded");
            }
            Classification::ClientToAll | Classification::ClientToAllAndServer => {
                if !self.is_sender(&msg) {
                    events.push(RelayEvent::MessageReceived { message: msg });
                }
            }
            Classification::ClientToClient => {
                if self.is_receiver(&msg) && !self.is_sender(&msg) {
                    events.push(RelayEvent::MessageReceived { message: msg });
                }
            }
            Classification::ServerToAll => {
                events.push(RelayEvent::MessageReceived { message: msg });
            }
            Classification::ServerToClient => {
                if self.is_receiver(&msg) {
                    events.push(RelayEvent::MessageReceived { message: msg });
                }
            }
            other => {
                debug!(classification = ?other, "ignoring message");
            }
        }
    }

    fn is_receiver(&self, msg: &Message) -> bool {
        msg.receiver_unique_id.as_deref() == Some(self.unique_id.as_str())
    }

    fn is_sender(&self, msg: &Message) -> bool {
        msg.sender_unique_id.as_deref() == Some(self.unique_id.as_str())
    }
}
