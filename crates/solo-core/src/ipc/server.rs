//! IPC server: the resident instance's side of the endpoint.
//!
//! A single reactor task owns the listener and a table of live connections
//! keyed by [`ConnectionId`]. Each accepted connection gets a reader task
//! that waits for data and forwards it to the reactor as an event; the
//! reactor routes the request, writes the reply, and only then lets that
//! reader continue. Requests are therefore routed one at a time, and on a
//! given connection reply N is written before request N+1 is read.
//!
//! Connections are not closed after replying unless
//! `server.close_after_response` is set; they live until the peer hangs up
//! or the server shuts down.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use solo_config::ServerConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::wire;
use crate::endpoint::{Endpoint, EndpointClaim, EndpointError};
use crate::instance::ShutdownSignal;
use crate::router::Router;

/// Opaque identifier of an accepted connection.
pub type ConnectionId = u64;

/// Where a connection is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingData,
    Processing,
    /// Nothing more will be written; waiting for the peer to hang up.
    AwaitingPeerClose,
}

enum ConnectionEvent {
    Data {
        id: ConnectionId,
        bytes: Vec<u8>,
        done: oneshot::Sender<()>,
    },
    Closed {
        id: ConnectionId,
        error: Option<io::Error>,
    },
}

struct Connection {
    writer: OwnedWriteHalf,
    state: ConnectionState,
    rounds: u64,
}

/// Handle to a running server. Dropping it stops the reactor and gives the
/// endpoint back.
pub struct ServerHandle {
    endpoint: Endpoint,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    live: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
    claim: Option<EndpointClaim>,
}

impl ServerHandle {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Broadcast shutdown, wait for the reactor to drain, and release the endpoint.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Server task ended abnormally");
        }
        self.claim.take();
        info!(endpoint = %self.endpoint, "Server closed");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("endpoint", &self.endpoint)
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Server side of the endpoint.
pub struct Server;

impl Server {
    /// Claim and bind the endpoint, then start serving in the background.
    ///
    /// Fails with [`EndpointError::AlreadyRunning`] when another instance
    /// holds the endpoint. Must be called from within a Tokio runtime. The
    /// reactor stops when a [`ShutdownSignal`] is broadcast on `shutdown`;
    /// a forwarded `--quit` broadcasts one after its reply is written.
    pub fn listen(
        endpoint: &Endpoint,
        router: Router,
        config: &ServerConfig,
        shutdown: broadcast::Sender<ShutdownSignal>,
    ) -> Result<ServerHandle, EndpointError> {
        let claim = endpoint.claim()?;
        let listener =
            UnixListener::bind(claim.socket_path()).map_err(|source| EndpointError::Bind {
                path: claim.socket_path().to_path_buf(),
                source,
            })?;
        info!(endpoint = %endpoint, path = %claim.socket_path().display(), "Open server");

        let live = Arc::new(AtomicUsize::new(0));
        let (events_tx, events_rx) = mpsc::channel(64);
        let (readers_stop, _) = watch::channel(false);

        let reactor = Reactor {
            router,
            config: config.clone(),
            shutdown: shutdown.clone(),
            connections: HashMap::new(),
            next_id: 0,
            live: Arc::clone(&live),
            events_tx,
            readers_stop,
        };
        let shutdown_rx = shutdown.subscribe();
        let task = tokio::spawn(reactor.run(listener, events_rx, shutdown_rx));

        Ok(ServerHandle {
            endpoint: endpoint.clone(),
            shutdown_tx: shutdown,
            live,
            task: Some(task),
            claim: Some(claim),
        })
    }
}

struct Reactor {
    router: Router,
    config: ServerConfig,
    shutdown: broadcast::Sender<ShutdownSignal>,
    connections: HashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    live: Arc<AtomicUsize>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    readers_stop: watch::Sender<bool>,
}

impl Reactor {
    async fn run(
        mut self,
        listener: UnixListener,
        mut events: mpsc::Receiver<ConnectionEvent>,
        mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => self.accept(stream),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(event) = events.recv() => self.handle(event).await,
            }
        }

        let _ = self.readers_stop.send(true);
        let open = self.connections.len();
        self.connections.clear();
        self.live.store(0, Ordering::Relaxed);
        debug!(open, "Disconnected remaining peers");
    }

    fn accept(&mut self, stream: UnixStream) {
        let id = self.next_id;
        self.next_id += 1;

        let (reader, writer) = stream.into_split();
        tokio::spawn(read_loop(
            id,
            reader,
            self.events_tx.clone(),
            self.readers_stop.subscribe(),
            self.config.max_request_bytes,
        ));
        self.connections.insert(
            id,
            Connection {
                writer,
                state: ConnectionState::AwaitingData,
                rounds: 0,
            },
        );
        self.live.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "Peer connected");
    }

    async fn handle(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Data { id, bytes, done } => {
                let quit = self.respond(id, &bytes).await;
                let _ = done.send(());
                if quit {
                    let _ = self.shutdown.send(ShutdownSignal);
                }
            }
            ConnectionEvent::Closed { id, error } => {
                if let Some(conn) = self.connections.remove(&id) {
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    match error {
                        Some(e) => debug!(connection = id, rounds = conn.rounds, error = %e, "Peer connection failed"),
                        None => debug!(connection = id, rounds = conn.rounds, "Peer disconnected"),
                    }
                }
            }
        }
    }

    /// Route one request and answer it. Returns whether the request asked
    /// for shutdown.
    async fn respond(&mut self, id: ConnectionId, bytes: &[u8]) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        if conn.state == ConnectionState::AwaitingPeerClose {
            debug!(connection = id, len = bytes.len(), "Ignoring data on closing connection");
            return false;
        }

        conn.state = ConnectionState::Processing;
        let reply = self.router.process_line(bytes);
        let response = reply.text();
        info!(connection = id, response = %response, "WriteData");

        let written =
            tokio::time::timeout(self.config.write_timeout(), conn.writer.write_all(response.as_bytes()))
                .await;
        conn.rounds += 1;
        conn.state = match written {
            Ok(Ok(())) if self.config.close_after_response => {
                if let Err(e) = conn.writer.shutdown().await {
                    debug!(connection = id, error = %e, "Shutdown of write half failed");
                }
                ConnectionState::AwaitingPeerClose
            }
            Ok(Ok(())) => ConnectionState::AwaitingData,
            Ok(Err(e)) => {
                warn!(connection = id, error = %e, "Failed to write response");
                ConnectionState::AwaitingPeerClose
            }
            Err(_) => {
                warn!(
                    connection = id,
                    timeout_ms = self.config.write_timeout_ms,
                    "Timed out writing response"
                );
                ConnectionState::AwaitingPeerClose
            }
        };

        reply.quit_requested()
    }
}

async fn read_loop(
    id: ConnectionId,
    reader: OwnedReadHalf,
    events: mpsc::Sender<ConnectionEvent>,
    mut stop: watch::Receiver<bool>,
    max_bytes: usize,
) {
    loop {
        let read = tokio::select! {
            read = wire::read_available(&reader, max_bytes) => read,
            _ = stop.changed() => return,
        };

        let bytes = match read {
            Ok(bytes) if bytes.is_empty() => {
                let _ = events.send(ConnectionEvent::Closed { id, error: None }).await;
                return;
            }
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = events
                    .send(ConnectionEvent::Closed { id, error: Some(e) })
                    .await;
                return;
            }
        };

        debug!(connection = id, len = bytes.len(), "ReadData");
        let (done, processed) = oneshot::channel();
        if events
            .send(ConnectionEvent::Data { id, bytes, done })
            .await
            .is_err()
        {
            return;
        }
        if processed.await.is_err() {
            return;
        }
    }
}
