//! Server-side login state for one connection.

use std::{collections::HashMap, net::SocketAddr};

use thiserror::Error;

use crate::{message::ServerToClient, transport::ConnectionId};

/// Display name used in logs for a connection that never logged in.
pub const UNKNOWN_LOGIN: &str = "unknown";

/// Input a session must refuse. Either one ends the connection.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("login required")]
    LoginRequired,
}

impl ProtocolViolation {
    /// The line sent to the offending client before it is closed.
    pub fn reply(self) -> ServerToClient {
        match self {
            ProtocolViolation::AlreadyLoggedIn => ServerToClient::AlreadyLoggedIn,
            ProtocolViolation::LoginRequired => ServerToClient::LoginRequired,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    connection: ConnectionId,
    peer: SocketAddr,
    login_id: Option<String>,
}

impl Session {
    pub fn new(connection: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            connection,
            peer,
            login_id: None,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn login_id(&self) -> Option<&str> {
        self.login_id.as_deref()
    }

    /// The login id, or [`UNKNOWN_LOGIN`] before the handshake.
    pub fn display_name(&self) -> &str {
        self.login_id().unwrap_or(UNKNOWN_LOGIN)
    }

    /// Records the handshake. The id never changes once set.
    pub fn login(&mut self, login_id: String) -> Result<(), ProtocolViolation> {
        if self.login_id.is_some() {
            return Err(ProtocolViolation::AlreadyLoggedIn);
        }
        self.login_id = Some(login_id);
        Ok(())
    }

    /// The identifier a chat line from this session is relayed under.
    pub fn sender(&self) -> Result<&str, ProtocolViolation> {
        self.login_id().ok_or(ProtocolViolation::LoginRequired)
    }
}

/// Active sessions keyed by connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.connection(), session);
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection)
    }

    pub fn get_mut(&mut self, connection: ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(&connection)
    }

    pub fn remove(&mut self, connection: ConnectionId) -> Option<Session> {
        self.sessions.remove(&connection)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.sessions.keys().copied()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Session> + '_ {
        self.sessions.drain().map(|(_, session)| session)
    }
}
