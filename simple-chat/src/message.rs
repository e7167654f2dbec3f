use std::{fmt, io};

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Prefix of the handshake line. Matching is case-sensitive and requires the
/// trailing space, so a bare `#login` is an ordinary chat line.
pub const LOGIN_PREFIX: &str = "#login ";

/// Prefix the server puts on lines typed at its own console.
pub const SERVER_NOTICE_PREFIX: &str = "SERVER MSG> ";

/// A line sent by a client, classified the way the server reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientToServer {
    Login { login_id: String },
    Chat { text: String },
}

impl ClientToServer {
    pub fn parse(line: &str) -> Self {
        match line.strip_prefix(LOGIN_PREFIX) {
            Some(rest) => ClientToServer::Login {
                login_id: rest.trim().to_string(),
            },
            None => ClientToServer::Chat {
                text: line.to_string(),
            },
        }
    }

    pub fn login(login_id: &str) -> Self {
        ClientToServer::Login {
            login_id: login_id.to_string(),
        }
    }
}

impl fmt::Display for ClientToServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientToServer::Login { login_id } => write!(f, "{LOGIN_PREFIX}{login_id}"),
            ClientToServer::Chat { text } => f.write_str(text),
        }
    }
}

/// Every line the server ever writes to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerToClient {
    LoginSuccessful { login_id: String },
    AlreadyLoggedIn,
    LoginRequired,
    Chat { login_id: String, text: String },
    ServerNotice { text: String },
}

impl fmt::Display for ServerToClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerToClient::LoginSuccessful { login_id } => {
                write!(f, "Login successful as {login_id}")
            }
            ServerToClient::AlreadyLoggedIn => f.write_str("Error: Already logged in."),
            ServerToClient::LoginRequired => f.write_str("Error: Login required."),
            ServerToClient::Chat { login_id, text } => write!(f, "{login_id}: {text}"),
            ServerToClient::ServerNotice { text } => write!(f, "{SERVER_NOTICE_PREFIX}{text}"),
        }
    }
}

/// Writes one line plus the `\n` delimiter and flushes.
///
/// Reading goes through `tokio::io::Lines`, which strips both `\n` and `\r\n`
/// and whose `next_line` is safe to race inside `select!`.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
