//! Listening server session manager.
//!
//! `TradingServer` accepts connections, registers each in the
//! [`SessionRegistry`], runs one receive task per client and dispatches
//! decoded frames to the configured [`MessageHandler`].

use crate::config::ServerConfig;
use crate::connection::{receive_loop, CloseReason, Connection, MessageSink};
use crate::error::SessionError;
use crate::handler::MessageHandler;
use crate::registry::SessionRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use trading_protocol::{Message, MessageType};

/// Lifecycle of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Point-in-time server counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStats {
    pub active_connections: usize,
    pub total_connections: u64,
    pub messages_processed: u64,
    pub errors: u64,
}

#[derive(Default)]
struct StatCells {
    total_connections: AtomicU64,
    messages_processed: AtomicU64,
    errors: AtomicU64,
}

struct ServerInner {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    handler: Arc<dyn MessageHandler>,
    state: Mutex<ServerState>,
    client_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    sequence: AtomicU64,
    stats: StatCells,
}

impl ServerInner {
    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap() = state;
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Frame consumer for one server-side connection.
struct ServerSink {
    inner: Arc<ServerInner>,
    client_id: String,
    connection: Arc<Connection>,
}

#[async_trait]
impl MessageSink for ServerSink {
    async fn on_message(&self, message: Message) {
        self.inner
            .stats
            .messages_processed
            .fetch_add(1, Ordering::SeqCst);
        self.inner.registry.record_received(&self.client_id);
        if message.message_type() == MessageType::Heartbeat {
            self.inner.registry.touch_heartbeat(&self.client_id);
        }

        let reply = self
            .inner
            .handler
            .handle(message, &self.client_id, &self.inner.registry)
            .await;
        if let Some(mut reply) = reply {
            reply.sequence = self.inner.next_sequence();
            match self.connection.send(&reply).await {
                Ok(_) => self.inner.registry.record_sent(&self.client_id),
                Err(error) => {
                    log::warn!("reply to {} failed: {error}", self.client_id);
                    self.inner.stats.errors.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }
}

/// The listening side of the session layer.
pub struct TradingServer {
    inner: Arc<ServerInner>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TradingServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_clients));
        Self {
            inner: Arc::new(ServerInner {
                config,
                registry,
                handler,
                state: Mutex::new(ServerState::Stopped),
                client_tasks: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                stats: StatCells::default(),
            }),
            shutdown: Mutex::new(None),
            accept_task: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.lock().unwrap()
    }

    /// The bound address, available once the server has started. With port 0
    /// in the config this is where the kernel actually put the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            active_connections: self.inner.registry.len(),
            total_connections: self.inner.stats.total_connections.load(Ordering::SeqCst),
            messages_processed: self.inner.stats.messages_processed.load(Ordering::SeqCst),
            errors: self.inner.stats.errors.load(Ordering::SeqCst),
        }
    }

    /// Binds the listener and starts accepting. Returns once the socket is
    /// bound; accepted clients are served by background tasks.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.inner.config.validate()?;
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != ServerState::Stopped {
                return Err(SessionError::AlreadyRunning);
            }
            *state = ServerState::Starting;
        }

        let bind_to = format!("{}:{}", self.inner.config.bind_address, self.inner.config.port);
        let listener = match TcpListener::bind(&bind_to).await {
            Ok(listener) => listener,
            Err(error) => {
                self.inner.set_state(ServerState::Stopped);
                return Err(SessionError::Bind(error));
            }
        };
        let local = listener.local_addr().map_err(SessionError::Bind)?;
        *self.local_addr.lock().unwrap() = Some(local);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);

        let inner = self.inner.clone();
        let task = tokio::spawn(accept_loop(inner, listener, shutdown_rx));
        *self.accept_task.lock().await = Some(task);

        self.inner.set_state(ServerState::Running);
        log::info!("listening on {local}");
        Ok(())
    }

    /// Signals shutdown, then waits for the accept loop and every client
    /// task to finish and closes all registered connections. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                ServerState::Running | ServerState::Starting => {
                    *state = ServerState::Stopping;
                }
                _ => return,
            }
        }

        let shutdown = self.shutdown.lock().unwrap().take();
        if let Some(sender) = shutdown {
            let _ = sender.send(true);
        }
        let accept = self.accept_task.lock().await.take();
        if let Some(handle) = accept {
            if let Err(error) = handle.await {
                log::error!("accept loop panicked: {error}");
            }
        }

        let tasks: Vec<JoinHandle<()>> = {
            let mut client_tasks = self.inner.client_tasks.lock().unwrap();
            client_tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in tasks {
            if let Err(error) = handle.await {
                log::error!("client task panicked: {error}");
            }
        }

        for (client_id, connection) in self.inner.registry.drain() {
            log::debug!("closing session {client_id}");
            connection.close().await;
        }

        self.inner.set_state(ServerState::Stopped);
        log::info!("server stopped");
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => admit(&inner, stream, peer, shutdown.clone()).await,
                Err(error) => {
                    log::error!("accept failed: {error}");
                    inner.stats.errors.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.changed() => return,
        }
    }
}

async fn admit(
    inner: &Arc<ServerInner>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    if inner.registry.len() >= inner.registry.capacity() {
        log::warn!("at capacity ({}), refusing {peer}", inner.registry.capacity());
        drop(stream);
        return;
    }
    if let Err(error) = stream.set_nodelay(true) {
        log::debug!("set_nodelay for {peer} failed: {error}");
    }

    let client_id = peer.to_string();
    let (connection, reader) = match Connection::split(stream) {
        Ok(split) => split,
        Err(error) => {
            log::warn!("could not set up {peer}: {error}");
            return;
        }
    };
    if let Err(error) = inner.registry.register(&client_id, connection.clone()) {
        log::warn!("refusing {peer}: {error}");
        connection.close().await;
        return;
    }
    inner.stats.total_connections.fetch_add(1, Ordering::SeqCst);
    log::info!("client {client_id} connected");

    let task_inner = inner.clone();
    let task = tokio::spawn(async move {
        let sink = ServerSink {
            inner: task_inner.clone(),
            client_id: client_id.clone(),
            connection,
        };
        let reason = receive_loop(reader, shutdown, peer, &sink).await;
        teardown(&task_inner, &client_id, reason).await;
    });
    inner
        .client_tasks
        .lock()
        .unwrap()
        .insert(peer.to_string(), task);
}

async fn teardown(inner: &Arc<ServerInner>, client_id: &str, reason: CloseReason) {
    match &reason {
        CloseReason::Remote => log::info!("client {client_id} disconnected"),
        CloseReason::Shutdown => log::debug!("session {client_id} stopping"),
        CloseReason::ReadError(error) => {
            log::warn!("client {client_id} read failed: {error}");
            inner.stats.errors.fetch_add(1, Ordering::SeqCst);
        }
        CloseReason::Desync(error) => {
            log::warn!("client {client_id} desynchronized: {error}");
            inner.stats.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
    if let Some(connection) = inner.registry.unregister(client_id) {
        connection.close().await;
    }
    // Drop our own join handle unless stop() already drained it.
    if !matches!(reason, CloseReason::Shutdown) {
        inner.client_tasks.lock().unwrap().remove(client_id);
    }
}
