// Error types for the relay crate.
//
// `RelayError` covers the usage errors of the public API (state guards) and
// the transport errors that surface synchronously (bad address, listen
// failure). Asynchronous transport failures never come back as a `Result`;
// they are logged and reported as `RelayEvent`s instead.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use lan_relay_protocol::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("cannot do that while acting as {active}")]
    RoleConflict { active: &'static str },

    #[error("client is already connecting or connected")]
    AlreadyConnecting,

    #[error("client is not connected")]
    NotConnected,

    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid unique id {0:?}: must be non-empty and free of separator characters")]
    InvalidUniqueId(String),

    #[error("permission denied listening on {addr}")]
    PermissionDenied { addr: SocketAddr },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("cannot send: relay is idle")]
    Idle,

    #[error("server cannot address a message to itself")]
    SelfAddressed,

    #[error("relay worker has shut down")]
    WorkerGone,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("firewall command is empty")]
    EmptyCommand,

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
}
