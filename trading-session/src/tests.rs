//! End-to-end tests running a real server and client over loopback.

use crate::client::{SessionState, TradingClient};
use crate::config::{ClientConfig, ServerConfig};
use crate::connection::Connection;
use crate::error::SessionError;
use crate::events::{ClientEvents, NullEvents};
use crate::handler::{AcceptAllOrders, ExchangeRouter, StaticMarketData};
use crate::registry::SessionRegistry;
use crate::server::TradingServer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use trading_protocol::{
    codec, MarketData, Message, Order, OrderSide, OrderStatus, OrderType, Price, TimeInForce,
    TradeExecution,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Grabs a port the kernel considers free right now.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn sample_order(id: u64, client_id: &str) -> Order {
    Order::new(
        id,
        "AAPL",
        client_id,
        OrderType::Limit,
        OrderSide::Buy,
        TimeInForce::Gtc,
        Price::new(100_500_000, -6),
        100,
    )
}

fn sample_quote(symbol: &str) -> MarketData {
    MarketData::new(
        symbol,
        Price::from_decimal(100.50),
        Price::from_decimal(100.49),
        Price::from_decimal(100.51),
        100,
        500,
        400,
        1_000_000,
        42,
    )
}

async fn start_test_server(max_clients: usize) -> TradingServer {
    let router = ExchangeRouter::new(
        Arc::new(AcceptAllOrders),
        Arc::new(StaticMarketData::new().with_quote(sample_quote("AAPL"))),
    );
    let server = TradingServer::new(
        ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: free_port().await,
            max_clients,
            socket_timeout: 0,
        },
        Arc::new(router),
    );
    server.start().await.unwrap();
    server
}

fn client_config(server: &TradingServer, client_id: &str) -> ClientConfig {
    let addr = server.local_addr().unwrap();
    ClientConfig {
        server_host: addr.ip().to_string(),
        server_port: addr.port(),
        client_id: client_id.to_string(),
        socket_timeout: 5,
        reconnect_attempts: 1,
    }
}

/// Forwards every event into channels the test can await on.
struct Recorder {
    order_status: mpsc::UnboundedSender<Order>,
    market_data: mpsc::UnboundedSender<MarketData>,
    trades: mpsc::UnboundedSender<TradeExecution>,
    errors: mpsc::UnboundedSender<(i32, String)>,
    disconnects: AtomicU64,
}

impl Recorder {
    fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<Order>,
        mpsc::UnboundedReceiver<MarketData>,
        mpsc::UnboundedReceiver<TradeExecution>,
        mpsc::UnboundedReceiver<(i32, String)>,
    ) {
        let (order_tx, order_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let (trade_tx, trade_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            order_status: order_tx,
            market_data: data_tx,
            trades: trade_tx,
            errors: error_tx,
            disconnects: AtomicU64::new(0),
        });
        (recorder, order_rx, data_rx, trade_rx, error_rx)
    }
}

#[async_trait]
impl ClientEvents for Recorder {
    async fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_order_status(&self, order: Order) {
        let _ = self.order_status.send(order);
    }

    async fn on_market_data(&self, data: MarketData) {
        let _ = self.market_data.send(data);
    }

    async fn on_trade(&self, trade: TradeExecution) {
        let _ = self.trades.send(trade);
    }

    async fn on_error(&self, code: i32, message: String) {
        let _ = self.errors.send((code, message));
    }
}

#[tokio::test]
async fn registry_enforces_duplicates_and_capacity() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            held.push(stream);
        }
    });

    let registry = SessionRegistry::new(2);
    let mut connections = Vec::new();
    for _ in 0..3 {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (connection, _reader) = Connection::split(stream).unwrap();
        connections.push(connection);
    }

    registry.register("a", connections[0].clone()).unwrap();
    assert!(matches!(
        registry.register("a", connections[1].clone()),
        Err(SessionError::DuplicateId(_))
    ));
    registry.register("b", connections[1].clone()).unwrap();
    assert!(matches!(
        registry.register("c", connections[2].clone()),
        Err(SessionError::RegistryFull { capacity: 2 })
    ));

    assert!(registry.unregister("a").is_some());
    assert!(registry.unregister("a").is_none());
    assert_eq!(registry.len(), 1);

    accept.abort();
}

#[tokio::test]
async fn broadcast_reaches_every_session_except_the_excluded_one() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let registry = Arc::new(SessionRegistry::new(16));
    let mut peers = Vec::new();
    for i in 0..8 {
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (connection, _reader) = Connection::split(server_side).unwrap();
        registry.register(&format!("c{i}"), connection).unwrap();
        peers.push(client);
    }

    let delivered = registry.broadcast(&Message::heartbeat(), Some("c0")).await;
    assert_eq!(delivered, 7);

    // The excluded peer must see nothing; everyone else one valid frame.
    let mut header = [0u8; codec::HEADER_LEN];
    for (i, peer) in peers.iter_mut().enumerate() {
        if i == 0 {
            let pending = timeout(Duration::from_millis(200), peer.read(&mut header)).await;
            assert!(pending.is_err(), "excluded peer received data");
            continue;
        }
        timeout(WAIT, peer.read_exact(&mut header))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(codec::declared_size(&header), codec::HEADER_LEN + 16);
    }
}

#[tokio::test]
async fn broadcast_skips_a_dead_session_and_keeps_going() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let registry = SessionRegistry::new(4);
    let mut keepalive = Vec::new();
    for i in 0..3 {
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (connection, _reader) = Connection::split(server_side).unwrap();
        if i == 1 {
            connection.close().await;
        }
        registry.register(&format!("c{i}"), connection).unwrap();
        keepalive.push(client);
    }

    let delivered = registry.broadcast(&Message::heartbeat(), None).await;
    assert_eq!(delivered, 2);
}

#[tokio::test]
async fn sending_before_connect_is_rejected() {
    let client = TradingClient::new(ClientConfig::default(), Arc::new(NullEvents));
    let result = client.send_order(sample_order(1, "client")).await;
    assert!(matches!(
        result,
        Err(SessionError::InvalidState(SessionState::Disconnected))
    ));
    assert_eq!(client.stats().messages_sent, 0);
}

#[tokio::test]
async fn connecting_to_a_dead_port_leaves_the_session_in_error() {
    init_logging();
    let port = free_port().await;
    let client = TradingClient::new(
        ClientConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: port,
            client_id: "c".to_string(),
            socket_timeout: 5,
            reconnect_attempts: 1,
        },
        Arc::new(NullEvents),
    );
    assert!(matches!(
        client.connect().await,
        Err(SessionError::ConnectFailed(_))
    ));
    assert_eq!(client.state(), SessionState::Error);
}

#[tokio::test]
async fn order_round_trip_and_market_data_lookup() {
    init_logging();
    let server = start_test_server(4).await;
    let (events, mut orders, mut data, _trades, mut errors) = Recorder::new();
    let client = TradingClient::new(client_config(&server, "trader-1"), events.clone());
    client.connect().await.unwrap();

    client.send_order(sample_order(42, "trader-1")).await.unwrap();
    let ack = timeout(WAIT, orders.recv()).await.unwrap().unwrap();
    assert_eq!(ack.order_id, 42);
    assert_eq!(ack.status, OrderStatus::New);
    assert_eq!(ack.price, Price::new(100_500_000, -6));

    client.request_market_data("AAPL").await.unwrap();
    let snapshot = timeout(WAIT, data.recv()).await.unwrap().unwrap();
    assert_eq!(snapshot.symbol, "AAPL");
    assert_eq!(snapshot.bid, Price::from_decimal(100.49));

    client.request_market_data("ZZZZ").await.unwrap();
    let (code, message) = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert_eq!(code, trading_protocol::model::error_code::MARKET_DATA);
    assert!(message.contains("ZZZZ"));

    let stats = client.stats();
    assert_eq!(stats.orders_sent, 1);
    assert_eq!(stats.messages_sent, 3);
    assert_eq!(stats.messages_received, 3);

    // The server-side entry mirrors the traffic. The sent counter is
    // recorded just after the write, so poll briefly.
    let session_id = server.registry().ids().pop().unwrap();
    timeout(WAIT, async {
        loop {
            match server.registry().entry(&session_id) {
                Some(entry) if entry.messages_sent() == 3 => break,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .unwrap();
    let entry = server.registry().entry(&session_id).unwrap();
    assert_eq!(entry.messages_received(), 3);

    client.disconnect().await;
    server.stop().await;
    assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn trade_executions_fan_out_to_buyer_and_seller() {
    init_logging();
    let server = start_test_server(4).await;
    let (events_a, _oa, _da, mut trades_a, _ea) = Recorder::new();
    let (events_b, _ob, _db, mut trades_b, _eb) = Recorder::new();
    let first = TradingClient::new(client_config(&server, "first"), events_a);
    let second = TradingClient::new(client_config(&server, "second"), events_b);
    first.connect().await.unwrap();
    second.connect().await.unwrap();

    timeout(WAIT, async {
        while server.registry().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let ids = server.registry().ids();

    // Both registered sessions are notified, whichever submitted the trade.
    let trade = TradeExecution::new(
        99,
        42,
        "AAPL",
        Price::from_decimal(100.50),
        100,
        ids[0].clone(),
        ids[1].clone(),
    );
    first
        .send_message(Message::trade_exec(trade.clone()))
        .await
        .unwrap();

    let seen_a = timeout(WAIT, trades_a.recv()).await.unwrap().unwrap();
    let seen_b = timeout(WAIT, trades_b.recv()).await.unwrap().unwrap();
    for seen in [&seen_a, &seen_b] {
        assert_eq!(seen.trade_id, 99);
        assert_eq!(seen.price, Price::from_decimal(100.50));
        assert!(seen.involves(&ids[0]) && seen.involves(&ids[1]));
    }
    assert_eq!(first.stats().trades_received, 1);
    assert_eq!(second.stats().trades_received, 1);

    // A party with no live session is skipped; the known one still hears.
    let ghost = TradeExecution::new(
        100,
        43,
        "AAPL",
        Price::from_decimal(100.50),
        50,
        ids[0].clone(),
        "nobody".to_string(),
    );
    first
        .send_message(Message::trade_exec(ghost))
        .await
        .unwrap();

    let mut delivered = 0;
    for trades in [&mut trades_a, &mut trades_b] {
        if let Ok(Some(seen)) = timeout(Duration::from_millis(500), trades.recv()).await {
            assert_eq!(seen.trade_id, 100);
            delivered += 1;
        }
    }
    assert_eq!(delivered, 1);
    assert_eq!(server.registry().len(), 2);

    first.disconnect().await;
    second.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn server_refuses_connections_beyond_max_clients() {
    init_logging();
    let server = start_test_server(1).await;
    let addr = server.local_addr().unwrap();

    let (events, mut orders, _data, _trades, _errors) = Recorder::new();
    let first = TradingClient::new(client_config(&server, "first"), events);
    first.connect().await.unwrap();

    // Give the accept loop a moment to register the first session.
    timeout(WAIT, async {
        while server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The second connection is dropped at admission: its peer sees EOF.
    let mut refused = TcpStream::connect(addr).await.unwrap();
    let mut buffer = [0u8; 1];
    let read = timeout(WAIT, refused.read(&mut buffer)).await.unwrap().unwrap();
    assert_eq!(read, 0);

    // The first session keeps working.
    first.send_order(sample_order(7, "first")).await.unwrap();
    let ack = timeout(WAIT, orders.recv()).await.unwrap().unwrap();
    assert_eq!(ack.order_id, 7);

    first.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn disconnect_is_idempotent_and_joins_the_receive_task() {
    init_logging();
    let server = start_test_server(4).await;
    let (events, _orders, _data, _trades, _errors) = Recorder::new();
    let client = TradingClient::new(client_config(&server, "c"), events.clone());
    client.connect().await.unwrap();
    client.send_heartbeat().await.unwrap();

    timeout(WAIT, client.disconnect()).await.unwrap();
    assert_eq!(client.state(), SessionState::Disconnected);
    timeout(WAIT, client.disconnect()).await.unwrap();
    assert_eq!(events.disconnects.load(Ordering::SeqCst), 1);

    server.stop().await;
}

#[tokio::test]
async fn server_stop_is_idempotent_and_closes_sessions() {
    init_logging();
    let server = start_test_server(4).await;
    let (events, _orders, _data, _trades, _errors) = Recorder::new();
    let client = TradingClient::new(client_config(&server, "c"), events);
    client.connect().await.unwrap();

    timeout(WAIT, async {
        while server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(server.stats().total_connections, 1);

    timeout(WAIT, server.stop()).await.unwrap();
    assert!(server.registry().is_empty());
    timeout(WAIT, server.stop()).await.unwrap();

    // The client observes the close and leaves Connected.
    timeout(WAIT, async {
        while client.state() == SessionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn concurrent_registrations_all_land() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(SessionRegistry::new(16));

    let accept = tokio::spawn(async move {
        let mut held = Vec::new();
        for _ in 0..8 {
            let (stream, _) = listener.accept().await.unwrap();
            held.push(stream);
        }
        held
    });

    let mut tasks = Vec::new();
    for i in 0..8 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (connection, _reader) = Connection::split(stream).unwrap();
            registry.register(&format!("c{i}"), connection).unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    let _held = accept.await.unwrap();

    assert_eq!(registry.len(), 8);
    let mut ids = registry.ids();
    ids.sort();
    assert_eq!(ids.len(), 8);
    assert!(registry.contains("c3"));
}
