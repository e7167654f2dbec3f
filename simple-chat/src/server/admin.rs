//! Operator commands typed at the server console.

use std::{io, net::SocketAddr, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    command::{CommandRouter, Flow},
    config::SHUTDOWN_GRACE,
    console::ChatDisplay,
    message::ServerToClient,
    server::ChatServer,
    transport::{ConnectionHandler, ConnectionTable, Listener, ListenerHandle},
};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Server is already listening.")]
    AlreadyListening,
    #[error("Server is not listening.")]
    NotListening,
    #[error("Cannot change port while server is open.")]
    ServerOpen,
    #[error("Invalid port number.")]
    InvalidPort,
    #[error("Server is shutting down.")]
    ShuttingDown,
    #[error("Could not start server.")]
    Bind(#[source] io::Error),
}

/// Listener control plus the session set, as the console sees them.
pub struct ServerAdmin {
    server: Arc<ChatServer>,
    connections: Arc<ConnectionTable>,
    display: Arc<dyn ChatDisplay>,
    port: u16,
    listener: Option<ListenerHandle>,
}

impl ServerAdmin {
    pub fn new(port: u16, display: Arc<dyn ChatDisplay>) -> Self {
        let connections = Arc::new(ConnectionTable::new());
        let server = Arc::new(ChatServer::new(connections.clone()));
        Self {
            server,
            connections,
            display,
            port,
            listener: None,
        }
    }

    pub fn server(&self) -> &Arc<ChatServer> {
        &self.server
    }

    /// The configured port; after a bind to port 0 it is the one the OS chose.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(ListenerHandle::local_addr)
    }

    pub async fn start(&mut self) -> Result<SocketAddr, AdminError> {
        if self.server.is_shut_down() {
            return Err(AdminError::ShuttingDown);
        }
        if self.listener.is_some() {
            return Err(AdminError::AlreadyListening);
        }

        let listener = Listener::bind(self.port).await.map_err(AdminError::Bind)?;
        let handler: Arc<dyn ConnectionHandler> = self.server.clone();
        let handle = listener
            .spawn(Arc::clone(&self.connections), handler)
            .map_err(AdminError::Bind)?;

        let local_addr = handle.local_addr();
        self.port = local_addr.port();
        self.listener = Some(handle);

        info!(port = self.port, "server listening");
        self.say(&format!(
            "Server listening for connections on port {}",
            self.port
        ));
        Ok(local_addr)
    }

    /// Stops accepting new connections; existing sessions stay.
    pub async fn stop_listening(&mut self) -> Result<(), AdminError> {
        let handle = self.listener.take().ok_or(AdminError::NotListening)?;
        handle.stop().await;
        self.say("Server has stopped listening for connections.");
        Ok(())
    }

    /// Stops listening and forcibly closes every session.
    pub async fn close(&mut self) -> usize {
        let _ = self.stop_listening().await;
        self.server.close_all()
    }

    /// Only allowed while stopped with no sessions left.
    pub fn set_port(&mut self, port: u16) -> Result<(), AdminError> {
        if self.is_listening() || self.server.session_count() > 0 {
            return Err(AdminError::ServerOpen);
        }
        self.port = port;
        Ok(())
    }

    /// Stops listening, closes every session, and gives queued lines a moment
    /// to be written. Later calls are no-ops.
    pub async fn shutdown(&mut self) -> bool {
        let _ = self.stop_listening().await;
        if !self.server.shutdown() {
            return false;
        }

        if timeout(SHUTDOWN_GRACE, self.connections.wait_idle())
            .await
            .is_err()
        {
            warn!(
                open = self.connections.len(),
                "connections still open after shutdown grace period"
            );
        }
        true
    }

    /// Echoes an operator line locally and broadcasts it to every session.
    pub fn announce(&self, text: &str) -> usize {
        let line = ServerToClient::ServerNotice {
            text: text.to_string(),
        }
        .to_string();
        self.say(&line);
        self.server.broadcast(&line)
    }

    pub fn commands() -> CommandRouter<ServerAdmin> {
        CommandRouter::new()
            .route("quit", quit)
            .route("stop", stop)
            .route("close", close)
            .route("setport", set_port)
            .route("start", start)
            .route("getport", get_port)
    }

    pub(crate) fn say(&self, message: &str) {
        self.display.display(message);
    }

    fn report(&self, err: &AdminError) {
        self.say(&format!("Error: {err}"));
    }
}

fn quit<'a>(admin: &'a mut ServerAdmin, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        admin.shutdown().await;
        admin.say("Server is shutting down.");
        Flow::Shutdown
    }
    .boxed()
}

fn stop<'a>(admin: &'a mut ServerAdmin, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        match admin.stop_listening().await {
            Ok(()) => admin.say("Server has stopped listening for clients."),
            Err(err) => admin.report(&err),
        }
        Flow::Continue
    }
    .boxed()
}

fn close<'a>(admin: &'a mut ServerAdmin, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        let closed = admin.close().await;
        info!(closed, "closed all connections");
        admin.say("Server has closed all connections.");
        Flow::Continue
    }
    .boxed()
}

fn set_port<'a>(admin: &'a mut ServerAdmin, args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        let result = args
            .parse::<u16>()
            .map_err(|_| AdminError::InvalidPort)
            .and_then(|port| admin.set_port(port).map(|()| port));
        match result {
            Ok(port) => admin.say(&format!("Port set to {port}")),
            Err(err) => admin.report(&err),
        }
        Flow::Continue
    }
    .boxed()
}

fn start<'a>(admin: &'a mut ServerAdmin, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        match admin.start().await {
            Ok(_) => admin.say("Server is now listening for clients."),
            Err(err) => {
                if let AdminError::Bind(source) = &err {
                    warn!(port = admin.port(), error = %source, "could not bind listener");
                }
                admin.report(&err);
            }
        }
        Flow::Continue
    }
    .boxed()
}

fn get_port<'a>(admin: &'a mut ServerAdmin, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        admin.say(&format!("Current port: {}", admin.port()));
        Flow::Continue
    }
    .boxed()
}
