//! Outbound client session.
//!
//! `TradingClient` owns one connection to a server, a background receive
//! task that dispatches server pushes to a [`ClientEvents`] subscriber, and
//! the sequence counter stamped onto every outbound message.

use crate::config::{ClientConfig, RECONNECT_DELAY};
use crate::connection::{receive_loop, CloseReason, Connection, MessageSink};
use crate::error::SessionError;
use crate::events::ClientEvents;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use trading_protocol::{MarketData, Message, MessagePayload, Order};

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// A connect attempt or the live connection failed; `connect` may be
    /// called again from this state.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Point-in-time counters for one client session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub orders_sent: u64,
    pub trades_received: u64,
    pub errors: u64,
    /// Unix seconds of the last successful connect, 0 if never connected.
    pub connected_at: i64,
    /// Unix seconds of the last heartbeat seen from the server.
    pub last_heartbeat: i64,
}

#[derive(Default)]
struct StatCells {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    orders_sent: AtomicU64,
    trades_received: AtomicU64,
    errors: AtomicU64,
    connected_at: AtomicI64,
    last_heartbeat: AtomicI64,
}

impl StatCells {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            messages_sent: self.messages_sent.load(Ordering::SeqCst),
            messages_received: self.messages_received.load(Ordering::SeqCst),
            orders_sent: self.orders_sent.load(Ordering::SeqCst),
            trades_received: self.trades_received.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            connected_at: self.connected_at.load(Ordering::SeqCst),
            last_heartbeat: self.last_heartbeat.load(Ordering::SeqCst),
        }
    }
}

/// State shared between the client handle and its receive task.
struct ClientShared {
    state: Mutex<SessionState>,
    connection: Mutex<Option<Arc<Connection>>>,
    stats: StatCells,
    events: Arc<dyn ClientEvents>,
    disconnect_notified: AtomicBool,
}

impl ClientShared {
    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Runs `on_disconnect` at most once per connection.
    async fn notify_disconnect(&self) {
        if !self.disconnect_notified.swap(true, Ordering::SeqCst) {
            self.events.on_disconnect().await;
        }
    }
}

/// Frame consumer for the client receive task.
struct ClientSink {
    shared: Arc<ClientShared>,
}

#[async_trait]
impl MessageSink for ClientSink {
    async fn on_message(&self, message: Message) {
        self.shared.stats.messages_received.fetch_add(1, Ordering::SeqCst);
        match message.payload {
            MessagePayload::Heartbeat => {
                self.shared
                    .stats
                    .last_heartbeat
                    .store(Utc::now().timestamp(), Ordering::SeqCst);
            }
            MessagePayload::OrderStatus(order) => {
                self.shared.events.on_order_status(order).await;
            }
            MessagePayload::MarketData(data) => {
                self.shared.events.on_market_data(data).await;
            }
            MessagePayload::TradeExec(trade) => {
                self.shared.stats.trades_received.fetch_add(1, Ordering::SeqCst);
                self.shared.events.on_trade(trade).await;
            }
            MessagePayload::Error(info) => {
                self.shared.stats.errors.fetch_add(1, Ordering::SeqCst);
                self.shared.events.on_error(info.code, info.message).await;
            }
            other => {
                log::warn!("unexpected {:?} from server, dropping", other);
            }
        }
    }
}

/// One client session. All methods take `&self`; the handle can be shared
/// behind an `Arc` and used from several tasks.
pub struct TradingClient {
    config: ClientConfig,
    shared: Arc<ClientShared>,
    recv_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    sequence: AtomicU64,
}

impl TradingClient {
    pub fn new(config: ClientConfig, events: Arc<dyn ClientEvents>) -> Self {
        Self {
            config,
            shared: Arc::new(ClientShared {
                state: Mutex::new(SessionState::Disconnected),
                connection: Mutex::new(None),
                stats: StatCells::default(),
                events,
                // Armed on connect; true here so disconnect() before any
                // connect fires nothing.
                disconnect_notified: AtomicBool::new(true),
            }),
            recv_task: tokio::sync::Mutex::new(None),
            shutdown: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.stats.snapshot()
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Resolves the configured server and dials it, retrying up to
    /// `reconnect_attempts` times with a fixed delay between rounds.
    ///
    /// On success the session is Connected, a receive task is running, and
    /// `on_connect` has fired. On failure the session is left in Error and
    /// `connect` may be called again.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.config.validate()?;
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                SessionState::Disconnected | SessionState::Error => {
                    *state = SessionState::Connecting;
                }
                SessionState::Connected => return Err(SessionError::AlreadyConnected),
                current => return Err(SessionError::InvalidState(current)),
            }
        }

        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(error) => {
                self.shared.set_state(SessionState::Error);
                return Err(error);
            }
        };
        if let Err(error) = stream.set_nodelay(true) {
            log::debug!("set_nodelay failed: {error}");
        }

        let (connection, reader) = match Connection::split(stream) {
            Ok(split) => split,
            Err(error) => {
                self.shared.set_state(SessionState::Error);
                return Err(SessionError::ConnectFailed(error));
            }
        };
        let peer = connection.peer();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        *self.shared.connection.lock().unwrap() = Some(connection);
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);
        self.shared.disconnect_notified.store(false, Ordering::SeqCst);
        self.shared
            .stats
            .connected_at
            .store(Utc::now().timestamp(), Ordering::SeqCst);
        self.shared.set_state(SessionState::Connected);
        log::info!("connected to {peer} as {}", self.config.client_id);

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let sink = ClientSink {
                shared: shared.clone(),
            };
            let reason = receive_loop(reader, shutdown_rx, peer, &sink).await;
            match &reason {
                CloseReason::Remote => {
                    log::info!("server {peer} closed the connection");
                    shared.set_state(SessionState::Disconnected);
                }
                CloseReason::Shutdown => {
                    shared.set_state(SessionState::Disconnected);
                }
                CloseReason::ReadError(error) => {
                    log::error!("read from {peer} failed: {error}");
                    shared.set_state(SessionState::Error);
                }
                CloseReason::Desync(error) => {
                    log::error!("lost framing with {peer}: {error}");
                    shared.set_state(SessionState::Error);
                }
            }
            // The socket is gone either way; clear the stored handle.
            let _ = shared.connection.lock().unwrap().take();
            shared.notify_disconnect().await;
        });
        *self.recv_task.lock().await = Some(task);

        self.shared.events.on_connect().await;
        Ok(())
    }

    async fn dial(&self) -> Result<TcpStream, SessionError> {
        let target = format!("{}:{}", self.config.server_host, self.config.server_port);
        let addrs: Vec<_> = lookup_host(&target)
            .await
            .map_err(|_| SessionError::AddressResolution(target.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(SessionError::AddressResolution(target));
        }

        let rounds = self.config.reconnect_attempts.max(1);
        let mut last_error: Option<std::io::Error> = None;
        for round in 0..rounds {
            if round > 0 {
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            for addr in &addrs {
                let attempt = TcpStream::connect(*addr);
                let result = if self.config.socket_timeout > 0 {
                    match tokio::time::timeout(
                        Duration::from_secs(self.config.socket_timeout),
                        attempt,
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!("connect to {addr} timed out"),
                        )),
                    }
                } else {
                    attempt.await
                };
                match result {
                    Ok(stream) => return Ok(stream),
                    Err(error) => {
                        log::warn!(
                            "connect to {addr} failed (attempt {}/{rounds}): {error}",
                            round + 1
                        );
                        last_error = Some(error);
                    }
                }
            }
        }
        Err(SessionError::ConnectFailed(last_error.unwrap_or_else(
            || std::io::Error::new(std::io::ErrorKind::Other, "no addresses tried"),
        )))
    }

    fn connected(&self) -> Result<Arc<Connection>, SessionError> {
        let state = self.shared.state();
        if state != SessionState::Connected {
            return Err(SessionError::InvalidState(state));
        }
        self.shared
            .connection
            .lock()
            .unwrap()
            .clone()
            .ok_or(SessionError::Closed)
    }

    /// Stamps the next sequence number and sends one message.
    pub async fn send_message(&self, mut message: Message) -> Result<(), SessionError> {
        let connection = self.connected()?;
        message.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        connection.send(&message).await?;
        self.shared.stats.messages_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn send_order(&self, order: Order) -> Result<(), SessionError> {
        self.send_message(Message::order_new(order)).await?;
        self.shared.stats.orders_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn cancel_order(&self, order_id: u64) -> Result<(), SessionError> {
        let request = Order::cancel_request(order_id, &self.config.client_id);
        self.send_message(Message::order_cancel(request)).await
    }

    pub async fn modify_order(&self, order: Order) -> Result<(), SessionError> {
        self.send_message(Message::order_modify(order)).await
    }

    pub async fn request_market_data(&self, symbol: &str) -> Result<(), SessionError> {
        self.send_message(Message::market_data(MarketData::request(symbol)))
            .await
    }

    pub async fn send_heartbeat(&self) -> Result<(), SessionError> {
        self.send_message(Message::heartbeat()).await
    }

    /// Stops the receive task, closes the socket and leaves the session
    /// Disconnected. Safe to call in any state, any number of times.
    pub async fn disconnect(&self) {
        let shutdown = self.shutdown.lock().unwrap().take();
        if let Some(sender) = shutdown {
            let _ = sender.send(true);
        }
        let task = self.recv_task.lock().await.take();
        if let Some(handle) = task {
            if let Err(error) = handle.await {
                log::error!("receive task panicked: {error}");
            }
        }
        let connection = self.shared.connection.lock().unwrap().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.shared.set_state(SessionState::Disconnected);
        self.shared.notify_disconnect().await;
    }
}
