//! Interactive trading client binary.
//!
//! Connects to an exchange server, submits one order, requests a market
//! data snapshot and prints whatever the server pushes back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use trading_protocol::{
    MarketData, Order, OrderSide, OrderType, Price, TimeInForce, TradeExecution,
};
use trading_session::config::HEARTBEAT_INTERVAL;
use trading_session::{ClientConfig, ClientEvents, TradingClient};

#[derive(Parser)]
#[command(name = "trading-client")]
#[command(about = "Client for the trading wire protocol")]
struct Cli {
    /// Server host to connect to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Client identifier sent with every order.
    #[arg(long, default_value = "trader-1")]
    client_id: String,

    /// Symbol to trade and query.
    #[arg(short, long, default_value = "AAPL")]
    symbol: String,

    /// Order quantity.
    #[arg(short, long, default_value_t = 100)]
    quantity: u32,

    /// Limit price.
    #[arg(long, default_value_t = 100.50)]
    price: f64,

    /// Sell instead of buy.
    #[arg(long)]
    sell: bool,

    /// Log filter (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Prints every server push to the log.
struct PrintEvents;

#[async_trait]
impl ClientEvents for PrintEvents {
    async fn on_connect(&self) {
        log::info!("connected");
    }

    async fn on_disconnect(&self) {
        log::info!("disconnected");
    }

    async fn on_order_status(&self, order: Order) {
        log::info!(
            "order {} is {:?}: {}/{} filled at {}",
            order.order_id,
            order.status,
            order.filled_quantity,
            order.quantity,
            order.price
        );
    }

    async fn on_market_data(&self, data: MarketData) {
        log::info!(
            "{}: last {} bid {} x{} ask {} x{}",
            data.symbol,
            data.last_price,
            data.bid,
            data.bid_size,
            data.ask,
            data.ask_size
        );
    }

    async fn on_trade(&self, trade: TradeExecution) {
        log::info!(
            "trade {}: {} x{} at {}",
            trade.trade_id,
            trade.symbol,
            trade.quantity,
            trade.price
        );
    }

    async fn on_error(&self, code: i32, message: String) {
        log::warn!("server error {code}: {message}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let config = ClientConfig {
        server_host: cli.host.clone(),
        server_port: cli.port,
        client_id: cli.client_id.clone(),
        ..ClientConfig::default()
    };
    let client = Arc::new(TradingClient::new(config, Arc::new(PrintEvents)));
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}:{}", cli.host, cli.port))?;

    // First tick fires immediately, then every interval until disconnect.
    let heartbeats = {
        let client = client.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if client.send_heartbeat().await.is_err() {
                    break;
                }
            }
        })
    };

    let side = if cli.sell {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    };
    let order = Order::new(
        1,
        cli.symbol.clone(),
        cli.client_id.clone(),
        OrderType::Limit,
        side,
        TimeInForce::Day,
        Price::from_decimal(cli.price),
        cli.quantity,
    );
    client.send_order(order).await?;
    client.request_market_data(&cli.symbol).await?;

    // Let the acknowledgements arrive before tearing the session down.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let stats = client.stats();
    log::info!(
        "sent {} messages, received {}",
        stats.messages_sent,
        stats.messages_received
    );
    heartbeats.abort();
    client.disconnect().await;
    Ok(())
}
