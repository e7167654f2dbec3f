//! Chat server core: login handshake, relay, and session bookkeeping.
//!
//! [`ChatServer`] is the [`ConnectionHandler`] the transport drives. Every
//! callback runs under one lock around the session set, so logins, relays,
//! and removals never interleave. Sends only enqueue, which keeps the critical
//! section short even when a peer stalls.
//!
//! A session moves from unauthenticated to authenticated on its first
//! `#login <id>` and is removed on disconnect. Any other line from an
//! unauthenticated session, or a second `#login`, gets an error line and a
//! forced close; other sessions are not affected.

pub mod admin;
pub mod console;

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, error, info, warn};

use crate::{
    message::{ClientToServer, ServerToClient},
    session::{ProtocolViolation, Session, SessionRegistry},
    transport::{ConnectionHandler, ConnectionId, Transport},
};

pub use admin::{AdminError, ServerAdmin};
pub use console::ServerConsole;

/// What the server did with one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    LoggedIn { login_id: String },
    Relayed { login_id: String, recipients: usize },
    Rejected(ProtocolViolation),
    /// The connection no longer has a session (it is being closed).
    Ignored,
}

struct ServerState {
    sessions: SessionRegistry,
    shut_down: bool,
}

pub struct ChatServer {
    transport: Arc<dyn Transport>,
    state: Mutex<ServerState>,
}

impl ChatServer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ServerState {
                sessions: SessionRegistry::new(),
                shut_down: false,
            }),
        }
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn login_id(&self, connection: ConnectionId) -> Option<String> {
        self.state()
            .sessions
            .get(connection)
            .and_then(|session| session.login_id().map(str::to_owned))
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    /// Opens an unauthenticated session. Refused once shutdown has begun.
    pub fn handle_connect(&self, connection: ConnectionId, peer: SocketAddr) -> bool {
        let mut state = self.state();
        if state.shut_down {
            warn!(connection, %peer, "refusing connection during shutdown");
            self.transport.close(connection);
            return false;
        }

        info!(connection, "Client connected: {}", peer.ip());
        state.sessions.insert(Session::new(connection, peer));
        true
    }

    pub fn handle_message(&self, connection: ConnectionId, line: &str) -> MessageOutcome {
        let mut state = self.state();
        let Some(session) = state.sessions.get_mut(connection) else {
            debug!(connection, "dropping line from a connection without a session");
            return MessageOutcome::Ignored;
        };

        match ClientToServer::parse(line) {
            ClientToServer::Login { login_id } => match session.login(login_id.clone()) {
                Ok(()) => {
                    info!(connection, "Client {login_id} has logged in.");
                    let reply = ServerToClient::LoginSuccessful {
                        login_id: login_id.clone(),
                    };
                    self.deliver(connection, &reply.to_string());
                    MessageOutcome::LoggedIn { login_id }
                }
                Err(violation) => self.reject(&mut state.sessions, connection, violation),
            },
            ClientToServer::Chat { text } => match session.sender().map(str::to_owned) {
                Ok(login_id) => {
                    info!(connection, "Message received from {login_id}: {text}");
                    let relayed = ServerToClient::Chat {
                        login_id: login_id.clone(),
                        text,
                    };
                    let recipients = self.relay(&state.sessions, &relayed.to_string());
                    MessageOutcome::Relayed {
                        login_id,
                        recipients,
                    }
                }
                Err(violation) => self.reject(&mut state.sessions, connection, violation),
            },
        }
    }

    /// Removes the session, returning it if the server still had one.
    pub fn handle_disconnect(&self, connection: ConnectionId) -> Option<Session> {
        let removed = self.state().sessions.remove(connection);
        match &removed {
            Some(session) => log_disconnect(session),
            None => debug!(connection, "connection closed after its session ended"),
        }
        removed
    }

    /// Sends `line` to every session, logged in or not. Returns how many
    /// sessions it was queued for.
    pub fn broadcast(&self, line: &str) -> usize {
        let state = self.state();
        self.relay(&state.sessions, line)
    }

    /// Forcibly closes every session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let mut state = self.state();
        self.close_sessions(&mut state)
    }

    /// Closes every session and refuses new ones from now on. Only the first
    /// call does anything; it returns `false` afterwards.
    pub fn shutdown(&self) -> bool {
        let mut state = self.state();
        if state.shut_down {
            info!("shutdown already in progress");
            return false;
        }

        state.shut_down = true;
        let closed = self.close_sessions(&mut state);
        info!(closed, "server shut down");
        true
    }

    fn close_sessions(&self, state: &mut ServerState) -> usize {
        let closed: Vec<Session> = state.sessions.drain().collect();
        for session in &closed {
            self.transport.close(session.connection());
            log_disconnect(session);
        }
        closed.len()
    }

    fn reject(
        &self,
        sessions: &mut SessionRegistry,
        connection: ConnectionId,
        violation: ProtocolViolation,
    ) -> MessageOutcome {
        warn!(connection, %violation, "protocol violation, closing connection");
        self.deliver(connection, &violation.reply().to_string());
        self.transport.close(connection);
        if let Some(session) = sessions.remove(connection) {
            log_disconnect(&session);
        }
        MessageOutcome::Rejected(violation)
    }

    fn relay(&self, sessions: &SessionRegistry, line: &str) -> usize {
        sessions
            .connections()
            .filter(|&connection| self.deliver(connection, line))
            .count()
    }

    fn deliver(&self, connection: ConnectionId, line: &str) -> bool {
        match self.transport.send(connection, line) {
            Ok(()) => true,
            Err(err) => {
                error!(connection, error = %err, "could not send message to client");
                false
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionHandler for ChatServer {
    fn on_connect(&self, connection: ConnectionId, peer: SocketAddr) {
        self.handle_connect(connection, peer);
    }

    fn on_message(&self, connection: ConnectionId, line: &str) {
        self.handle_message(connection, line);
    }

    fn on_disconnect(&self, connection: ConnectionId) {
        self.handle_disconnect(connection);
    }
}

fn log_disconnect(session: &Session) {
    info!(
        connection = session.connection(),
        peer = %session.peer(),
        "Client {} has disconnected.",
        session.display_name()
    );
}
