//! WebSocket Coordinator Server
//!
//! Async WebSocket front end. Each connection gets a reader task and a
//! writer task; every decoded message is forwarded to the single
//! coordinator task, which owns all session state and fans results out
//! through per-connection channels.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::config::{CoordinatorConfig, ServerConfig};
use crate::network::broadcast::Broadcaster;
use crate::network::coordinator::{Coordinator, CoordinatorEvent};
use crate::network::diagnostics::DiagnosticsSnapshot;
use crate::network::protocol::{ClientMessage, ServerMessage, ErrorCode};
use crate::network::registry::ConnectionId;

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The coordinator task is gone.
    #[error("Coordinator unavailable")]
    CoordinatorUnavailable,

    /// `run` was called twice.
    #[error("Server already running")]
    AlreadyRunning,
}

// =============================================================================
// COORDINATOR TASK
// =============================================================================

/// Commands accepted by the coordinator task.
#[derive(Debug)]
pub enum Command {
    /// A connection opened; register its outbound channel.
    Connected {
        /// New connection.
        connection: ConnectionId,
        /// Outbound channel for that connection.
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Forward an event to the coordinator.
    Event(CoordinatorEvent),
    /// Request a diagnostics snapshot.
    Snapshot {
        /// Where to send it.
        reply: oneshot::Sender<DiagnosticsSnapshot>,
    },
}

/// Cloneable handle to the coordinator task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    /// Register a connection's outbound channel.
    pub async fn connected(
        &self,
        connection: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), ServerError> {
        self.send(Command::Connected { connection, sender }).await
    }

    /// Submit an event.
    pub async fn submit(&self, event: CoordinatorEvent) -> Result<(), ServerError> {
        self.send(Command::Event(event)).await
    }

    /// Fetch a diagnostics snapshot.
    pub async fn snapshot(&self) -> Result<DiagnosticsSnapshot, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| ServerError::CoordinatorUnavailable)
    }

    async fn send(&self, command: Command) -> Result<(), ServerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServerError::CoordinatorUnavailable)
    }
}

/// Create a coordinator handle and the receiving end of its command queue.
pub fn coordinator_channel(buffer: usize) -> (CoordinatorHandle, mpsc::Receiver<Command>) {
    let (commands, rx) = mpsc::channel(buffer.max(1));
    (CoordinatorHandle { commands }, rx)
}

/// Spawn the coordinator task.
pub fn spawn_coordinator(
    config: CoordinatorConfig,
    commands: mpsc::Receiver<Command>,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run_coordinator(Coordinator::new(config), commands, shutdown))
}

async fn run_coordinator(
    mut coordinator: Coordinator,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut broadcaster = Broadcaster::new();

    let mut reap_interval = interval(coordinator.config().reap_interval);
    reap_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sweep_interval = interval(coordinator.config().sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the immediate first sweep
    sweep_interval.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All coordinator handles dropped");
                    break;
                };
                match command {
                    Command::Connected { connection, sender } => {
                        broadcaster.register(connection, sender);
                    }
                    Command::Event(event) => {
                        let closed = match &event {
                            CoordinatorEvent::Disconnected { connection } => Some(*connection),
                            CoordinatorEvent::Message { .. } => None,
                        };
                        let outbox = coordinator.intake(event, Instant::now());
                        let report = broadcaster.deliver(outbox);
                        if report.dropped > 0 {
                            warn!("Dropped {} message(s) for slow clients", report.dropped);
                        }
                        if let Some(connection) = closed {
                            broadcaster.unregister(connection);
                        }
                    }
                    Command::Snapshot { reply } => {
                        let _ = reply.send(coordinator.snapshot());
                    }
                }
            }
            _ = reap_interval.tick() => {
                coordinator.reap(Instant::now());
            }
            _ = sweep_interval.tick() => {
                coordinator.sweep(Instant::now());
            }
            _ = shutdown.recv() => {
                info!("Coordinator received shutdown signal");
                break;
            }
        }
    }

    coordinator.shutdown();
    let report = broadcaster.announce_all(ServerMessage::Shutdown {
        reason: "Server shutting down".to_string(),
    });
    info!("Shutdown notice sent to {} connection(s)", report.delivered);
}

// =============================================================================
// SERVER
// =============================================================================

/// The coordinator server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Handle to the coordinator task.
    handle: CoordinatorHandle,
    /// Command queue, taken when the server starts.
    commands: Mutex<Option<mpsc::Receiver<Command>>>,
    /// Open WebSocket connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (handle, commands) = coordinator_channel(config.command_buffer);

        Self {
            config,
            handle,
            commands: Mutex::new(Some(commands)),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind and run the server until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let commands = self.commands
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or(ServerError::AlreadyRunning)?;

        info!("Coordinator v{} listening on {}", self.config.version, listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let coordinator_handle = spawn_coordinator(
            self.config.coordinator.clone(),
            commands,
            self.shutdown_tx.subscribe(),
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = coordinator_handle.await {
            error!("Coordinator task failed: {}", e);
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let handle = self.handle.clone();
        let outbound_buffer = self.config.outbound_buffer;
        let connections = self.connections.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, addr, handle, outbound_buffer, shutdown_rx).await {
                error!("Connection {} failed: {}", addr, e);
            }
            connections.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Handle to the coordinator task.
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: CoordinatorHandle,
    outbound_buffer: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream).await?;
    let connection = ConnectionId::new();
    debug!("Connection {} opened from {}", connection, addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(outbound_buffer.max(1));

    handle.connected(connection, msg_tx.clone()).await?;

    // Writer: drains the outbound channel in order
    let sender_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ClientMessage::from_json(&text) {
                            Ok(message) => {
                                handle.submit(CoordinatorEvent::Message { connection, message }).await?;
                            }
                            Err(e) => {
                                debug!("Invalid message from {}: {}", connection, e);
                                let _ = msg_tx.send(ServerMessage::invalid(
                                    ErrorCode::InvalidInput,
                                    "Invalid message format",
                                )).await;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let _ = msg_tx.send(ServerMessage::invalid(
                            ErrorCode::InvalidInput,
                            "Binary frames are not supported",
                        )).await;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        let _ = msg_tx.send(ServerMessage::Pong {
                            timestamp: 0,
                            server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                        }).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection {} closed", connection);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", connection, e);
                        break;
                    }
                    _ => {}
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    // The coordinator may already be gone during shutdown
    let _ = handle.submit(CoordinatorEvent::Disconnected { connection }).await;
    drop(msg_tx);

    if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
        debug!("Writer for {} did not drain in time", connection);
    }

    info!("Connection {} cleaned up", connection);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::PlayerId;
    use crate::network::protocol::PairingRequest;
    use crate::network::session::SessionId;
    use tokio_tungstenite::connect_async;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    fn ready(player: &str, key: &str) -> ClientMessage {
        ClientMessage::Ready(PairingRequest {
            player: PlayerId::new(player),
            key: SessionId::new(key),
        })
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(test_config());
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = GameServer::new(test_config());
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_coordinator_task_pairs_and_shuts_down() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (handle, commands) = coordinator_channel(16);
        let task = spawn_coordinator(CoordinatorConfig::default(), commands, shutdown_tx.subscribe());

        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        handle.connected(c1, tx1).await.unwrap();
        handle.connected(c2, tx2).await.unwrap();

        handle.submit(CoordinatorEvent::Message { connection: c1, message: ready("alice", "9") }).await.unwrap();
        handle.submit(CoordinatorEvent::Message { connection: c2, message: ready("bob", "9") }).await.unwrap();

        assert!(matches!(rx1.recv().await.unwrap(), ServerMessage::Waiting { .. }));
        assert!(matches!(rx1.recv().await.unwrap(), ServerMessage::Ready(_)));
        assert!(matches!(rx2.recv().await.unwrap(), ServerMessage::Ready(_)));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.waiting_count, 0);

        handle.submit(CoordinatorEvent::Disconnected { connection: c1 }).await.unwrap();
        assert!(matches!(rx2.recv().await.unwrap(), ServerMessage::PeerDisconnected { .. }));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(matches!(rx2.recv().await.unwrap(), ServerMessage::Shutdown { .. }));
        assert!(handle.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(test_config()));

        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(Message::Text("not json".to_string())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        let ServerMessage::Invalid(rejection) = ServerMessage::from_json(reply.to_text().unwrap()).unwrap() else {
            panic!("expected invalid");
        };
        assert_eq!(rejection.code, ErrorCode::InvalidInput);

        ws.send(Message::Text(ready("alice", "5").to_json().unwrap())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(
            ServerMessage::from_json(reply.to_text().unwrap()).unwrap(),
            ServerMessage::Waiting { key: SessionId::new("5") }
        );

        let snapshot = server.handle().snapshot().await.unwrap();
        assert_eq!(snapshot.waiting_keys, vec![SessionId::new("5")]);

        server.shutdown();
        serving.await.unwrap().unwrap();
    }
}
