// Relay configuration.
//
// `RelayConfig` collects the knobs both roles read: where the server listens,
// how long the client waits between reconnect attempts, how long a single
// connect attempt or frame write may block, and the optional firewall command
// run before listening. Every field has a default, so an empty JSON object is a valid
// config file.
//
// Sources, later wins: defaults, then a JSON file (`from_json_file`), then
// `LAN_RELAY_*` environment variables (`apply_env`).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 7878;

/// Address for reaching a server on the same device.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Fixed wait between client reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long one frame write may block before the peer counts as gone.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Listen port. 0 lets the OS pick one (tests).
    pub port: u16,
    /// Listen address. `0.0.0.0` so LAN peers can reach the server.
    pub bind_address: IpAddr,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Applies to every session socket on both roles. 0 is treated as 1.
    pub write_timeout_ms: u64,
    /// argv run once before listening; `{port}` is substituted.
    pub firewall_command: Option<Vec<String>>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            connect_timeout_ms: 3000,
            write_timeout_ms: WRITE_TIMEOUT.as_millis() as u64,
            firewall_command: None,
        }
    }
}

impl RelayConfig {
    /// Loopback-only config on an OS-assigned port.
    pub fn loopback() -> Self {
        Self {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json, path)
    }

    /// Apply `LAN_RELAY_PORT`, `LAN_RELAY_BIND`,
    /// `LAN_RELAY_RECONNECT_DELAY_MS` and `LAN_RELAY_WRITE_TIMEOUT_MS` from
    /// the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("LAN_RELAY_PORT") {
            self.port = parse_var("LAN_RELAY_PORT", value)?;
        }
        if let Some(value) = lookup("LAN_RELAY_BIND") {
            self.bind_address = parse_var("LAN_RELAY_BIND", value)?;
        }
        if let Some(value) = lookup("LAN_RELAY_RECONNECT_DELAY_MS") {
            self.reconnect_delay_ms = parse_var("LAN_RELAY_RECONNECT_DELAY_MS", value)?;
        }
        if let Some(value) = lookup("LAN_RELAY_WRITE_TIMEOUT_MS") {
            self.write_timeout_ms = parse_var("LAN_RELAY_WRITE_TIMEOUT_MS", value)?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Never zero: sockets reject a zero timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn origin() -> &'static Path {
        Path::new("test.json")
    }

    #[test]
    fn empty_object_is_default() {
        let config = RelayConfig::from_json_str("{}", origin()).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.reconnect_delay(), RECONNECT_DELAY);
        assert_eq!(config.write_timeout(), WRITE_TIMEOUT);
    }

    #[test]
    fn partial_file_overrides_named_fields() {
        let json = r#"{ "port": 9000, "firewall_command": ["ufw", "allow", "{port}/tcp"] }"#;
        let config = RelayConfig::from_json_str(json, origin()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.connect_timeout_ms, 3000);
        assert_eq!(config.firewall_command.unwrap().len(), 3);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = RelayConfig::from_json_str(r#"{ "prot": 1 }"#, origin()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = RelayConfig::from_json_file(Path::new("/nonexistent/relay.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LAN_RELAY_PORT", "4242"),
            ("LAN_RELAY_BIND", "127.0.0.1"),
            ("LAN_RELAY_RECONNECT_DELAY_MS", " 250 "),
            ("LAN_RELAY_WRITE_TIMEOUT_MS", "0"),
        ]
        .into_iter()
        .collect();
        let mut config = RelayConfig::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:4242".parse().unwrap());
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(config.write_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_vars(|name| (name == "LAN_RELAY_PORT").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "LAN_RELAY_PORT",
                ..
            }
        ));
    }
}
