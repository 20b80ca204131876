// lan_relay: role state, relay engines and TCP drivers for the LAN peer
// relay.
//
// A process is idle, a relay server, or a relay client. The server accepts
// TCP sessions, negotiates a unique ID for each client, and relays tagged
// application messages between them; clients filter what the server relays
// and reconnect on their own when the link drops. The wire format lives in
// `lan_relay_protocol`.
//
// Module overview:
// - `relay.rs`:         `Relay`, the owned context and public API
//                       (start/stop server, connect/disconnect client,
//                       send, accessors, event channel).
// - `server_engine.rs`: Server routing table and ID negotiation, pure.
// - `registry.rs`:      Session handle to Unique ID map plus the roster.
// - `client_engine.rs`: Client routing table and identity, pure.
// - `server.rs`:        Listener thread, reader threads and the server actor.
// - `client.rs`:        Client actor with the reconnect loop.
// - `event.rs`:         `RelayEvent`, the notifications to the application.
// - `config.rs`:        `RelayConfig` (JSON file, env overrides).
// - `firewall.rs`:      One-shot hook that opens the listen port.
// - `error.rs`:         `RelayError`, `ConfigError`, `FirewallError`.
//
// The engines never touch sockets and the drivers never make routing
// decisions, so all protocol behavior is testable without a network. Each
// driver funnels its transport callbacks into one actor thread through an
// `mpsc` channel; that thread is the only place registry and roster state
// changes.
//
// The relay can be embedded through `Relay` or run as the standalone `relay`
// binary (`main.rs`).

pub mod client;
pub mod client_engine;
pub mod config;
pub mod error;
pub mod event;
pub mod firewall;
pub mod registry;
pub mod relay;
pub mod server;
pub mod server_engine;

pub use client_engine::{ClientEngine, ClientPhase};
pub use config::{DEFAULT_PORT, LOOPBACK_ADDRESS, RECONNECT_DELAY, RelayConfig, WRITE_TIMEOUT};
pub use error::{ConfigError, FirewallError, RelayError};
pub use event::RelayEvent;
pub use firewall::{CommandFirewall, NoFirewall, PortExposer};
pub use relay::{Relay, RoleState};
pub use server_engine::{ServerEngine, ServerOutput};
