//! Chat client core: one outbound connection plus the local command set.
//!
//! Each connection the client opens gets a generation number, and the task
//! reading server lines tags every [`ClientEvent`] with it. Events from a
//! connection the user already logged off are dropped, so `#logoff` never
//! looks like the server going away.

pub mod console;

use std::{io, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    command::{CommandRouter, Flow},
    console::ChatDisplay,
    message::{ClientToServer, write_line},
};

pub use console::ClientConsole;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {host}:{port}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Already connected.")]
    AlreadyConnected,
    #[error("Not connected to the server.")]
    NotConnected,
    #[error("Cannot change {0} while connected.")]
    Connected(&'static str),
    #[error("Invalid host.")]
    InvalidHost,
    #[error("Invalid port number.")]
    InvalidPort,
    #[error("could not send message to server")]
    Send(#[source] io::Error),
}

/// Something the server side of a connection did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message { generation: u64, line: String },
    Closed { generation: u64 },
    Failed { generation: u64, error: String },
}

impl ClientEvent {
    pub fn generation(&self) -> u64 {
        match self {
            ClientEvent::Message { generation, .. }
            | ClientEvent::Closed { generation }
            | ClientEvent::Failed { generation, .. } => *generation,
        }
    }
}

/// Receiving end for events from the client's connections.
pub struct ClientEvents {
    receiver: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientEvents {
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.receiver.recv().await
    }
}

struct ServerConnection {
    generation: u64,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

pub struct ChatClient {
    login_id: String,
    host: String,
    port: u16,
    connection: Option<ServerConnection>,
    generation: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
    display: Arc<dyn ChatDisplay>,
}

impl ChatClient {
    /// A client that has not connected yet.
    pub fn new(
        login_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        display: Arc<dyn ChatDisplay>,
    ) -> (Self, ClientEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let client = Self {
            login_id: login_id.into(),
            host: host.into(),
            port,
            connection: None,
            generation: 0,
            events,
            display,
        };
        (client, ClientEvents { receiver })
    }

    /// Connects and sends the `#login` handshake as the first line.
    pub async fn connect(
        login_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        display: Arc<dyn ChatDisplay>,
    ) -> Result<(Self, ClientEvents), ClientError> {
        let (mut client, events) = Self::new(login_id, host, port, display);
        client.open_connection().await?;
        Ok((client, events))
    }

    pub fn login_id(&self) -> &str {
        &self.login_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Opens a connection to the current host and port and sends the
    /// handshake. Reconnecting after `#logoff` goes through here too, so the
    /// server always sees `#login <id>` first.
    pub async fn open_connection(&mut self) -> Result<(), ClientError> {
        if self.connection.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| ClientError::Connect {
                host: self.host.clone(),
                port: self.port,
                source,
            })?;
        let (reader, mut writer) = stream.into_split();

        let handshake = ClientToServer::login(&self.login_id).to_string();
        write_line(&mut writer, &handshake)
            .await
            .map_err(ClientError::Send)?;

        self.generation += 1;
        let generation = self.generation;
        let reader = tokio::spawn(read_server_lines(generation, reader, self.events.clone()));
        self.connection = Some(ServerConnection {
            generation,
            writer,
            reader,
        });

        info!(host = %self.host, port = self.port, login_id = %self.login_id, "connected to server");
        Ok(())
    }

    /// Closes the current connection. Returns `false` if there was none.
    pub async fn close_connection(&mut self) -> bool {
        let Some(mut connection) = self.connection.take() else {
            return false;
        };

        connection.reader.abort();
        if let Err(error) = connection.writer.shutdown().await {
            debug!(?error, "failed to shut down connection cleanly");
        }
        info!(generation = connection.generation, "disconnected from server");
        true
    }

    pub fn set_host(&mut self, host: &str) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::Connected("host"));
        }
        if host.is_empty() {
            return Err(ClientError::InvalidHost);
        }
        self.host = host.to_string();
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::Connected("port"));
        }
        self.port = port;
        Ok(())
    }

    /// Sends one chat line to the server.
    pub async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        write_line(&mut connection.writer, text)
            .await
            .map_err(ClientError::Send)
    }

    /// Chat input from the user. A failed write ends the client.
    pub async fn send_chat(&mut self, text: &str) -> Flow {
        match self.send(text).await {
            Ok(()) => Flow::Continue,
            Err(ClientError::Send(error)) => {
                warn!(?error, "could not send message to server");
                self.say("Could not send message to server. Terminating client.");
                self.close_connection().await;
                Flow::Abort
            }
            Err(err) => {
                self.report(&err);
                Flow::Continue
            }
        }
    }

    pub fn handle_event(&mut self, event: ClientEvent) -> Flow {
        let current = self.connection.as_ref().map(|connection| connection.generation);
        if current != Some(event.generation()) {
            debug!(generation = event.generation(), "ignoring event from a closed connection");
            return Flow::Continue;
        }

        match event {
            ClientEvent::Message { line, .. } => {
                self.say(&line);
                Flow::Continue
            }
            ClientEvent::Closed { .. } => {
                self.connection = None;
                info!("server closed the connection");
                self.say("Server has shut down.");
                Flow::Shutdown
            }
            ClientEvent::Failed { error, .. } => {
                self.connection = None;
                warn!(%error, "server connection failed");
                self.say(&format!("Server connection error: {error}"));
                Flow::Abort
            }
        }
    }

    pub fn commands() -> CommandRouter<ChatClient> {
        CommandRouter::new()
            .route("quit", quit)
            .route("logoff", logoff)
            .route("sethost", set_host)
            .route("setport", set_port)
            .route("login", login)
            .route("gethost", get_host)
            .route("getport", get_port)
    }

    pub(crate) fn say(&self, message: &str) {
        self.display.display(message);
    }

    fn report(&self, err: &ClientError) {
        self.say(&format!("Error: {err}"));
    }
}

async fn read_server_lines(
    generation: u64,
    reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut lines = BufReader::new(reader).lines();
    let last = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events.send(ClientEvent::Message { generation, line }).is_err() {
                    return;
                }
            }
            Ok(None) => break ClientEvent::Closed { generation },
            Err(err) => {
                break ClientEvent::Failed {
                    generation,
                    error: err.to_string(),
                };
            }
        }
    };
    let _ = events.send(last);
}

fn quit<'a>(client: &'a mut ChatClient, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        client.close_connection().await;
        Flow::Shutdown
    }
    .boxed()
}

fn logoff<'a>(client: &'a mut ChatClient, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        if client.close_connection().await {
            client.say("Logged off from the server.");
        } else {
            client.report(&ClientError::NotConnected);
        }
        Flow::Continue
    }
    .boxed()
}

fn set_host<'a>(client: &'a mut ChatClient, args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        match client.set_host(args) {
            Ok(()) => client.say(&format!("Host set to: {}", client.host())),
            Err(err) => client.report(&err),
        }
        Flow::Continue
    }
    .boxed()
}

fn set_port<'a>(client: &'a mut ChatClient, args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        let result = if client.is_connected() {
            Err(ClientError::Connected("port"))
        } else {
            args.parse::<u16>()
                .map_err(|_| ClientError::InvalidPort)
                .and_then(|port| client.set_port(port))
        };
        match result {
            Ok(()) => client.say(&format!("Port set to: {}", client.port())),
            Err(err) => client.report(&err),
        }
        Flow::Continue
    }
    .boxed()
}

fn login<'a>(client: &'a mut ChatClient, args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        // The id is fixed at startup; `#login <anything>` is not a command.
        if !args.is_empty() {
            client.say("Unknown command.");
            return Flow::Continue;
        }
        match client.open_connection().await {
            Ok(()) => client.say("Logged in to the server."),
            Err(ClientError::Connect { host, port, source }) => {
                warn!(%host, port, error = %source, "reconnect failed");
                client.say("Error connecting to server.");
            }
            Err(err) => client.report(&err),
        }
        Flow::Continue
    }
    .boxed()
}

fn get_host<'a>(client: &'a mut ChatClient, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        client.say(&format!("Current host: {}", client.host()));
        Flow::Continue
    }
    .boxed()
}

fn get_port<'a>(client: &'a mut ChatClient, _args: &'a str) -> BoxFuture<'a, Flow> {
    async move {
        client.say(&format!("Current port: {}", client.port()));
        Flow::Continue
    }
    .boxed()
}
