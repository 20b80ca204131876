// The relay's single wire record and its routing vocabulary.
//
// Every transmission carries `Message` values. Two enums describe where a
// message is going:
// - `Receivers`: what the application asked for (server, one client, all
//   clients, or both).
// - `Classification`: the protocol-internal routing instruction the relay
//   engines act on. Application messages get it from `(Receivers, Origin)` at
//   send time via `Message::stamp`; the five synthetic kinds (Connection,
//   ChangeID, ClientConnected, ClientDisconnected, ClientOnline) only come
//   from the protocol constructors below.
//
// Both enums have stable integer codes because the codec writes them as
// decimal text (see `codec.rs`).

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// The audience an application chose for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Receivers {
    Server,
    Client,
    AllClients,
    ServerAndAllClients,
}

impl Receivers {
    pub fn code(self) -> u8 {
        match self {
            Receivers::Server => 0,
            Receivers::Client => 1,
            Receivers::AllClients => 2,
            Receivers::ServerAndAllClients => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Receivers::Server),
            1 => Some(Receivers::Client),
            2 => Some(Receivers::AllClients),
            3 => Some(Receivers::ServerAndAllClients),
            _ => None,
        }
    }
}

/// Which role is stamping an application message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Server,
    Client,
}

/// Routing instruction carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    None,
    Connection,
    ChangeId,
    ClientConnected,
    ClientDisconnected,
    ClientOnline,
    ClientToAll,
    ClientToClient,
    ClientToServer,
    ServerToAll,
    ServerToClient,
    ClientToAllAndServer,
}

impl Classification {
    const ALL: [Classification; 12] = [
        Classification::None,
        Classification::Connection,
        Classification::ChangeId,
        Classification::ClientConnected,
        Classification::ClientDisconnected,
        Classification::ClientOnline,
        Classification::ClientToAll,
        Classification::ClientToClient,
        Classification::ClientToServer,
        Classification::ServerToAll,
        Classification::ServerToClient,
        Classification::ClientToAllAndServer,
    ];

    pub fn code(self) -> u8 {
        // Declaration order is the wire order.
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Classification of an application message sent by `origin` to
    /// `receivers`. A server addressing `Receivers::Server` yields `None`;
    /// the relay refuses to send those.
    pub fn for_receivers(receivers: Receivers, origin: Origin) -> Self {
        match (origin, receivers) {
            (Origin::Client, Receivers::Server) => Classification::ClientToServer,
            (Origin::Client, Receivers::Client) => Classification::ClientToClient,
            (Origin::Client, Receivers::AllClients) => Classification::ClientToAll,
            (Origin::Client, Receivers::ServerAndAllClients) => {
                Classification::ClientToAllAndServer
            }
            (Origin::Server, Receivers::Server) => Classification::None,
            (Origin::Server, Receivers::Client) => Classification::ServerToClient,
            (Origin::Server, Receivers::AllClients | Receivers::ServerAndAllClients) => {
                Classification::ServerToAll
            }
        }
    }

    /// True for the kinds only the relay engines manufacture.
    pub fn is_protocol_internal(self) -> bool {
        matches!(
            self,
            Classification::Connection
                | Classification::ChangeId
                | Classification::ClientConnected
                | Classification::ClientDisconnected
                | Classification::ClientOnline
        )
    }
}

/// One logical relay message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub tag: String,
    /// Set only for single-recipient addressing.
    pub receiver_unique_id: Option<String>,
    /// `None` means the server sent it.
    pub sender_unique_id: Option<String>,
    pub receivers: Receivers,
    classification: Classification,
}

impl Message {
    /// An application message for `receivers`. Unclassified until stamped.
    pub fn new(receivers: Receivers, tag: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tag: tag.into(),
            receiver_unique_id: None,
            sender_unique_id: None,
            receivers,
            classification: Classification::None,
        }
    }

    /// An application message for the single client holding `receiver_id`.
    pub fn to_client(
        receiver_id: impl Into<String>,
        tag: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Receivers::Client, tag, content);
        msg.receiver_unique_id = Some(receiver_id.into());
        msg
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    /// Derive the classification from `receivers` and the sending role, and
    /// record the sender. Called by the relay at send time.
    pub fn stamp(mut self, origin: Origin, sender_unique_id: Option<String>) -> Self {
        self.classification = Classification::for_receivers(self.receivers, origin);
        self.sender_unique_id = sender_unique_id;
        self
    }

    /// Client announcement: the desired ID plus the client's session handle.
    pub fn connection(desired_id: &str, session_handle: &str) -> Self {
        Self::internal(
            Classification::Connection,
            Receivers::Server,
            Some(desired_id.to_string()),
            None,
            session_handle,
        )
    }

    /// Rename notice addressed by session handle, carrying the new ID.
    pub fn change_id(session_handle: &str, new_id: &str) -> Self {
        Self::internal(
            Classification::ChangeId,
            Receivers::Client,
            None,
            Some(new_id.to_string()),
            session_handle,
        )
    }

    /// Roster snapshot for a newcomer. `roster` is already sub-separated.
    pub fn client_online(receiver_id: &str, roster: String) -> Self {
        Self::internal(
            Classification::ClientOnline,
            Receivers::Client,
            None,
            Some(receiver_id.to_string()),
            roster,
        )
    }

    pub fn client_connected(unique_id: &str) -> Self {
        Self::internal(
            Classification::ClientConnected,
            Receivers::AllClients,
            None,
            None,
            unique_id,
        )
    }

    pub fn client_disconnected(unique_id: &str) -> Self {
        Self::internal(
            Classification::ClientDisconnected,
            Receivers::AllClients,
            None,
            None,
            unique_id,
        )
    }

    fn internal(
        classification: Classification,
        receivers: Receivers,
        sender_unique_id: Option<String>,
        receiver_unique_id: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            tag: String::new(),
            receiver_unique_id,
            sender_unique_id,
            receivers,
            classification,
        }
    }

    /// Rebuild a message from decoded wire fields.
    pub(crate) fn from_wire(
        classification: Classification,
        sender_unique_id: Option<String>,
        receiver_unique_id: Option<String>,
        receivers: Receivers,
        tag: String,
        content: String,
    ) -> Self {
        Self {
            content,
            tag,
            receiver_unique_id,
            sender_unique_id,
            receivers,
            classification,
        }
    }
}

pub(crate) fn parse_code(field: &'static str, value: &str) -> Result<u8, CodecError> {
    value.parse::<u8>().map_err(|_| CodecError::InvalidCode {
        field,
        value: value.to_string(),
    })
}
