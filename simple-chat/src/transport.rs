//! TCP plumbing underneath the chat server.
//!
//! [`Listener`] accepts connections and gives each one an id, an outbound
//! queue in the shared [`ConnectionTable`], and a task that reads lines and
//! drains the queue. Received lines and connect/disconnect events go to a
//! [`ConnectionHandler`]; the handler answers through the [`Transport`]
//! trait, which the table implements. None of this knows about logins.

use std::{
    collections::HashMap,
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{Notify, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::message::write_line;

pub type ConnectionId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection {0} is not open")]
    NotConnected(ConnectionId),
}

/// Outbound side of the connection primitive, as seen by the chat core.
pub trait Transport: Send + Sync {
    /// Queues `line` for delivery. Never blocks on the peer.
    fn send(&self, connection: ConnectionId, line: &str) -> Result<(), TransportError>;

    /// Closes the connection once everything queued before this call is written.
    fn close(&self, connection: ConnectionId);
}

/// Inbound side: callbacks driven by each connection's task.
///
/// `on_connect` runs on the accept loop before the connection task starts,
/// so a stopped listener has no connects still in flight.
pub trait ConnectionHandler: Send + Sync {
    fn on_connect(&self, connection: ConnectionId, peer: SocketAddr);
    fn on_message(&self, connection: ConnectionId, line: &str);
    fn on_disconnect(&self, connection: ConnectionId);
}

#[derive(Debug)]
enum Outbound {
    Line(String),
    Close,
}

/// Outbound queues of every open connection.
pub struct ConnectionTable {
    writers: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>,
    next_id: AtomicU64,
    idle: Notify,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            writers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            idle: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.writers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers().is_empty()
    }

    /// Resolves once no connection is left open.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Unbounded: a peer that stops reading grows its queue until it is closed.
        let (sender, receiver) = mpsc::unbounded_channel();
        self.writers().insert(id, sender);
        (id, receiver)
    }

    fn unregister(&self, connection: ConnectionId) {
        let mut writers = self.writers();
        writers.remove(&connection);
        if writers.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn enqueue(&self, connection: ConnectionId, outbound: Outbound) -> Result<(), TransportError> {
        let writers = self.writers();
        let sender = writers
            .get(&connection)
            .ok_or(TransportError::NotConnected(connection))?;
        sender
            .send(outbound)
            .map_err(|_| TransportError::NotConnected(connection))
    }

    fn writers(&self) -> MutexGuard<'_, HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>> {
        self.writers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ConnectionTable {
    fn send(&self, connection: ConnectionId, line: &str) -> Result<(), TransportError> {
        self.enqueue(connection, Outbound::Line(line.to_string()))
    }

    fn close(&self, connection: ConnectionId) {
        if self.enqueue(connection, Outbound::Close).is_err() {
            debug!(connection, "close requested for a connection that is already gone");
        }
    }
}

pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Binds every IPv4 interface on `port`; `0` picks an ephemeral port.
    pub async fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves. Connections already
    /// accepted keep running afterwards.
    pub async fn run_until<F>(
        self,
        shutdown: F,
        table: Arc<ConnectionTable>,
        handler: Arc<dyn ConnectionHandler>,
    ) where
        F: Future<Output = ()> + Send,
    {
        let Listener { listener } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("listener stopped");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &table, &handler);
                }
            }
        }
    }

    /// Runs the accept loop on its own task.
    pub fn spawn(
        self,
        table: Arc<ConnectionTable>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> io::Result<ListenerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            self.run_until(shutdown, table, handler).await;
        });

        Ok(ListenerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// A running accept loop.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits for the accept loop to exit, so every
    /// accepted connection has already been reported to the handler.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            warn!(error = ?err, "listener task ended abnormally");
        }
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    table: &Arc<ConnectionTable>,
    handler: &Arc<dyn ConnectionHandler>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, table, handler),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    table: &Arc<ConnectionTable>,
    handler: &Arc<dyn ConnectionHandler>,
) {
    let (connection, outbound) = table.register();
    handler.on_connect(connection, peer);

    let table = Arc::clone(table);
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        if let Err(err) = drive_connection(connection, stream, outbound, handler.as_ref()).await {
            debug!(connection, %peer, error = ?err, "connection ended with error");
        }
        handler.on_disconnect(connection);
        table.unregister(connection);
    });
}

async fn drive_connection(
    connection: ConnectionId,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    handler: &dyn ConnectionHandler,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    // No cap on line length; a line is buffered until its newline arrives.
    let mut lines = BufReader::new(reader).lines();

    let result = loop {
        select! {
            // Queued replies go out before more input is read, so an error
            // line and its close are never overtaken by the next request.
            biased;
            queued = outbound.recv() => match queued {
                Some(Outbound::Line(line)) => {
                    if let Err(err) = write_line(&mut writer, &line).await {
                        break Err(err);
                    }
                }
                Some(Outbound::Close) | None => break Ok(()),
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => handler.on_message(connection, &line),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            },
        }
    };

    let _ = writer.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{net::TcpStream, time::timeout};

    use super::*;

    #[derive(Default)]
    struct Echo {
        table: Mutex<Option<Arc<ConnectionTable>>>,
        events: Mutex<Vec<String>>,
    }

    impl Echo {
        fn events(&self) -> Vec<String> {
            self.events.lock().expect("events lock").clone()
        }

        fn table(&self) -> Arc<ConnectionTable> {
            self.table
                .lock()
                .expect("table lock")
                .clone()
                .expect("table installed")
        }
    }

    impl ConnectionHandler for Echo {
        fn on_connect(&self, connection: ConnectionId, _peer: SocketAddr) {
            self.events.lock().expect("events lock").push(format!("connect {connection}"));
        }

        fn on_message(&self, connection: ConnectionId, line: &str) {
            self.events.lock().expect("events lock").push(format!("message {line}"));
            let table = self.table();
            if line == "bye" {
                table.send(connection, "goodbye").expect("send goodbye");
                table.close(connection);
            } else {
                table.send(connection, &line.to_uppercase()).expect("send echo");
            }
        }

        fn on_disconnect(&self, connection: ConnectionId) {
            self.events.lock().expect("events lock").push(format!("disconnect {connection}"));
        }
    }

    #[tokio::test]
    async fn lines_flow_both_ways_and_close_drains_the_queue() {
        let table = Arc::new(ConnectionTable::new());
        let echo = Arc::new(Echo::default());
        *echo.table.lock().expect("table lock") = Some(Arc::clone(&table));

        let listener = Listener::bind(0).await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let handle = listener
            .spawn(Arc::clone(&table), echo.clone())
            .expect("spawn listener");

        let stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        write_line(&mut writer, "hi there").await.expect("write");
        let echoed = timeout(Duration::from_secs(1), lines.next_line())
            .await
            .expect("echo in time")
            .expect("read echo");
        assert_eq!(echoed.as_deref(), Some("HI THERE"));

        write_line(&mut writer, "bye").await.expect("write bye");
        let goodbye = timeout(Duration::from_secs(1), lines.next_line())
            .await
            .expect("goodbye in time")
            .expect("read goodbye");
        assert_eq!(goodbye.as_deref(), Some("goodbye"));
        let closed = timeout(Duration::from_secs(1), lines.next_line())
            .await
            .expect("close in time")
            .expect("read eof");
        assert_eq!(closed, None);

        timeout(Duration::from_secs(1), table.wait_idle())
            .await
            .expect("table drains");
        handle.stop().await;

        assert_eq!(
            echo.events(),
            vec![
                "connect 1".to_string(),
                "message hi there".to_string(),
                "message bye".to_string(),
                "disconnect 1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn sending_to_an_unknown_connection_fails() {
        let table = ConnectionTable::new();
        assert_eq!(
            table.send(42, "hello"),
            Err(TransportError::NotConnected(42))
        );
        table.close(42);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn stopped_listener_refuses_new_connections() {
        let table = Arc::new(ConnectionTable::new());
        let echo = Arc::new(Echo::default());
        let listener = Listener::bind(0).await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let handle = listener.spawn(table, echo).expect("spawn listener");

        handle.stop().await;

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
