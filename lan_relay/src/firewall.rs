// Making the listen port reachable before the server starts.
//
// `Relay::start_server` calls `PortExposer::ensure_port_reachable` exactly
// once before binding. Whatever happens is logged; the server listens either
// way. `CommandFirewall` runs a configured argv (e.g. `ufw allow {port}/tcp`)
// so platform specifics stay out of the relay.

use std::process::Command;

use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::error::FirewallError;

pub trait PortExposer: Send {
    fn ensure_port_reachable(&self, port: u16) -> Result<(), FirewallError>;
}

/// Does nothing. The default when no command is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFirewall;

impl PortExposer for NoFirewall {
    fn ensure_port_reachable(&self, port: u16) -> Result<(), FirewallError> {
        debug!(port, "no firewall command configured");
        Ok(())
    }
}

/// Runs an external command, substituting `{port}` in every argument.
#[derive(Clone, Debug)]
pub struct CommandFirewall {
    argv: Vec<String>,
}

impl CommandFirewall {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl PortExposer for CommandFirewall {
    fn ensure_port_reachable(&self, port: u16) -> Result<(), FirewallError> {
        let port_text = port.to_string();
        let mut args = self.argv.iter().map(|arg| arg.replace("{port}", &port_text));
        let program = args.next().ok_or(FirewallError::EmptyCommand)?;

        let status = Command::new(&program)
            .args(args)
            .status()
            .map_err(|source| FirewallError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(FirewallError::Failed {
                program,
                status: status.to_string(),
            });
        }
        info!(port, %program, "firewall rule applied");
        Ok(())
    }
}

/// The exposer a config asks for.
pub fn from_config(config: &RelayConfig) -> Box<dyn PortExposer> {
    match &config.firewall_command {
        Some(argv) => Box::new(CommandFirewall::new(argv.clone())),
        None => Box::new(NoFirewall),
    }
}
