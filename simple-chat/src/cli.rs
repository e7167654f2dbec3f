use clap::Parser;
use thiserror::Error;

use crate::config::{DEFAULT_CLIENT_PORT, DEFAULT_HOST, DEFAULT_SERVER_PORT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("No login ID specified. Connection aborted.")]
    MissingLoginId,
    #[error("invalid port number {0:?}")]
    InvalidPort(String),
}

#[derive(Parser, Debug, Clone)]
#[command(name = "server", version, about = "Run the chat server.", long_about = None)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    pub port: Option<String>,
}

impl ServerArgs {
    /// The requested port, or the default when none was given.
    pub fn port(&self) -> Result<u16, CliError> {
        parse_port(self.port.as_deref(), DEFAULT_SERVER_PORT)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "client", version, about = "Join a chat server.", long_about = None)]
pub struct ClientArgs {
    /// Identifier announced to the server in the login handshake.
    pub login_id: Option<String>,

    /// Host of the chat server.
    #[arg(default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port of the chat server.
    pub port: Option<String>,
}

impl ClientArgs {
    pub fn login_id(&self) -> Result<&str, CliError> {
        self.login_id.as_deref().ok_or(CliError::MissingLoginId)
    }

    pub fn port(&self) -> Result<u16, CliError> {
        parse_port(self.port.as_deref(), DEFAULT_CLIENT_PORT)
    }
}

fn parse_port(raw: Option<&str>, default: u16) -> Result<u16, CliError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CliError::InvalidPort(raw.to_string())),
    }
}
