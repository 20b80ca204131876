// The relay context: role state and the public API.
//
// A `Relay` is in exactly one role at a time: idle, serving, or acting as a
// client. The role owns its driver handle (`ServerHandle` / `ClientHandle`),
// so leaving a role is dropping the handle, and dropping the `Relay` leaves
// whichever role is active.
//
// Guards are checked synchronously and never change state on failure. The
// drivers report everything asynchronous (peers joining, messages, lost
// connections) on one event channel shared by both roles; drain it with
// `poll_events` or wait on it with `recv_event_timeout`.
//
// A server can stop on its own when its listener fails. Its handle then
// reports not running, `state()` reads `Idle`, and the next role operation
// reaps it.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use lan_relay_protocol::{Message, Origin, Receivers, encode_batch, is_valid_unique_id};
use tracing::{error, info, warn};

use crate::client::ClientHandle;
use crate::client_engine::ClientPhase;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::event::{RelayEvent, emit_all};
use crate::firewall::{self, PortExposer};
use crate::server::ServerHandle;

/// Observable role of a `Relay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleState {
    Idle,
    Server,
    /// Client role, no connection yet.
    Connecting,
    Connected,
    /// Client role, connection lost; retrying.
    Reconnecting,
}

enum Role {
    Idle,
    Server(ServerHandle),
    Client(ClientHandle),
}

pub struct Relay {
    config: RelayConfig,
    firewall: Box<dyn PortExposer>,
    firewall_done: bool,
    role: Role,
    events_tx: Sender<RelayEvent>,
    events_rx: Receiver<RelayEvent>,
}

impl Relay {
    /// An idle relay. The firewall hook comes from `config.firewall_command`.
    pub fn new(config: RelayConfig) -> Self {
        let firewall = firewall::from_config(&config);
        Self::with_firewall(config, firewall)
    }

    pub fn with_firewall(config: RelayConfig, firewall: Box<dyn PortExposer>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            firewall,
            firewall_done: false,
            role: Role::Idle,
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Drop a server whose listener failed.
    fn reap(&mut self) {
        if let Role::Server(handle) = &self.role
            && !handle.is_running()
        {
            self.role = Role::Idle;
        }
    }

    /// Start serving on the configured address. Returns the bound address
    /// (useful with port 0).
    pub fn start_server(&mut self) -> Result<SocketAddr, RelayError> {
        self.reap();
        match self.role {
            Role::Server(_) => return Err(self.reject(RelayError::AlreadyRunning)),
            Role::Client(_) => {
                return Err(self.reject(RelayError::RoleConflict { active: "client" }));
            }
            Role::Idle => {}
        }

        // Only the first start in this relay's lifetime touches the firewall.
        if !self.firewall_done {
            self.firewall_done = true;
            if let Err(e) = self.firewall.ensure_port_reachable(self.config.port) {
                warn!(role = "server", port = self.config.port, error = %e, "could not open firewall port");
            }
        }

        let addr = self.config.listen_addr();
        let write_timeout = self.config.write_timeout();
        let handle = TcpListener::bind(addr)
            .and_then(|listener| {
                ServerHandle::start(listener, write_timeout, self.events_tx.clone())
            })
            .map_err(|source| {
                let err = listen_error(addr, source);
                error!(role = "server", %addr, error = %err, "failed to start server");
                emit_all(
                    &self.events_tx,
                    [RelayEvent::ServerStopped {
                        reason: Some(err.to_string()),
                    }],
                );
                err
            })?;

        let local = handle.addr();
        self.role = Role::Server(handle);
        info!(role = "server", addr = %local, "server started");
        emit_all(&self.events_tx, [RelayEvent::ServerStarted { addr: local }]);
        Ok(local)
    }

    pub fn stop_server(&mut self) -> Result<(), RelayError> {
        self.reap();
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Server(handle) => {
                handle.stop();
                Ok(())
            }
            Role::Client(handle) => {
                self.role = Role::Client(handle);
                Err(self.reject(RelayError::RoleConflict { active: "client" }))
            }
            Role::Idle => Err(self.reject(RelayError::NotRunning)),
        }
    }

    /// Start connecting to the server at `address` as `desired`. Returns as
    /// soon as the connect is under way; `RelayEvent::Connected` follows.
    ///
    /// `address` is `host:port` or a bare IP, which gets the configured port.
    pub fn connect_client(&mut self, desired: &str, address: &str) -> Result<(), RelayError> {
        self.reap();
        match self.role {
            Role::Client(_) => return Err(self.reject(RelayError::AlreadyConnecting)),
            Role::Server(_) => {
                return Err(self.reject(RelayError::RoleConflict { active: "server" }));
            }
            Role::Idle => {}
        }
        if !is_valid_unique_id(desired) {
            return Err(self.reject(RelayError::InvalidUniqueId(desired.to_string())));
        }
        let addr = resolve_address(address, self.config.port).map_err(|e| self.reject(e))?;

        info!(role = "client", %addr, desired, "connecting to server");
        let handle = ClientHandle::start(desired.to_string(), addr, &self.config, self.events_tx.clone());
        self.role = Role::Client(handle);
        Ok(())
    }

    /// Disconnect and wait until the connection is closed. No reconnect
    /// follows.
    pub fn disconnect_client(&mut self) -> Result<(), RelayError> {
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Client(handle) => {
                handle.disconnect();
                Ok(())
            }
            other => {
                self.role = other;
                Err(self.reject(RelayError::NotConnected))
            }
        }
    }

    /// Send an application message in the current role. The relay fills in
    /// the classification and, as a client, the sender ID.
    pub fn send_message(&self, msg: Message) -> Result<(), RelayError> {
        match &self.role {
            Role::Server(handle) if handle.is_running() => {
                if msg.receivers == Receivers::Server {
                    return Err(self.reject(RelayError::SelfAddressed));
                }
                let bytes = encode_batch(&[msg.stamp(Origin::Server, None)])?;
                handle.multicast(bytes)
            }
            Role::Client(handle) => {
                let sender = handle.engine().unique_id().to_string();
                let bytes = encode_batch(&[msg.stamp(Origin::Client, Some(sender))])?;
                handle.send(bytes)
            }
            Role::Server(_) | Role::Idle => Err(self.reject(RelayError::Idle)),
        }
    }

    pub fn state(&self) -> RoleState {
        match &self.role {
            Role::Idle => RoleState::Idle,
            Role::Server(handle) if handle.is_running() => RoleState::Server,
            Role::Server(_) => RoleState::Idle,
            Role::Client(handle) => match handle.engine().phase() {
                ClientPhase::Connecting => RoleState::Connecting,
                ClientPhase::Connected => RoleState::Connected,
                ClientPhase::Reconnecting => RoleState::Reconnecting,
            },
        }
    }

    pub fn is_server_running(&self) -> bool {
        self.state() == RoleState::Server
    }

    pub fn is_client_connected(&self) -> bool {
        match &self.role {
            Role::Client(handle) => handle.engine().is_connected(),
            _ => false,
        }
    }

    /// This peer's Unique ID. `None` when not a client; provisional until
    /// the server confirms or renames it.
    pub fn local_unique_id(&self) -> Option<String> {
        match &self.role {
            Role::Client(handle) => Some(handle.engine().unique_id().to_string()),
            _ => None,
        }
    }

    /// Known peer IDs: the registry on a server, the local mirror on a
    /// client.
    pub fn roster(&self) -> Vec<String> {
        match &self.role {
            Role::Server(handle) => handle.roster(),
            Role::Client(handle) => handle.engine().roster().map(str::to_string).collect(),
            Role::Idle => Vec::new(),
        }
    }

    /// Every event emitted since the last call.
    pub fn poll_events(&self) -> Vec<RelayEvent> {
        self.events_rx.try_iter().collect()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<RelayEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    /// Leave the active role, if any.
    pub fn shutdown(&mut self) {
        self.role = Role::Idle;
    }

    /// Log a usage error on its way back to the caller.
    fn reject(&self, err: RelayError) -> RelayError {
        let role = match &self.role {
            Role::Server(handle) if handle.is_running() => "server",
            Role::Client(_) => "client",
            Role::Server(_) | Role::Idle => "idle",
        };
        warn!(role, error = %err, "rejected relay call");
        err
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn listen_error(addr: SocketAddr, source: io::Error) -> RelayError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        RelayError::PermissionDenied { addr }
    } else {
        RelayError::Listen { addr, source }
    }
}

fn resolve_address(address: &str, default_port: u16) -> Result<SocketAddr, RelayError> {
    let invalid = |reason: String| RelayError::InvalidAddress {
        address: address.to_string(),
        reason,
    };
    let address = address.trim();
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    let resolved = if address.contains(':') {
        address.to_socket_addrs()
    } else {
        (address, default_port).to_socket_addrs()
    };
    resolved
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("no addresses found".to_string()))
}
