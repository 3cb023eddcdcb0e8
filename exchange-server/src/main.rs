//! Exchange server binary.
//!
//! Listens for trading clients, acknowledges their orders and serves a
//! small built-in set of market data quotes. Runs until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use trading_protocol::{MarketData, Price};
use trading_session::{
    AcceptAllOrders, ExchangeRouter, ServerConfig, StaticMarketData, TradingServer,
};

#[derive(Parser)]
#[command(name = "exchange-server")]
#[command(about = "Exchange-side server for the trading wire protocol")]
struct Cli {
    /// Address to bind the listener on.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum number of simultaneous client sessions.
    #[arg(long)]
    max_clients: Option<usize>,

    /// Per-socket timeout in seconds (0 disables it).
    #[arg(long)]
    timeout: Option<u64>,

    /// Path to a JSON configuration file; flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.bind_address = bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(max_clients) = cli.max_clients {
        config.max_clients = max_clients;
    }
    if let Some(timeout) = cli.timeout {
        config.socket_timeout = timeout;
    }
    Ok(config)
}

/// A few liquid symbols so clients have something to query out of the box.
fn seed_quotes() -> StaticMarketData {
    StaticMarketData::new()
        .with_quote(quote("AAPL", 100.49, 100.51))
        .with_quote(quote("MSFT", 412.20, 412.30))
        .with_quote(quote("TSLA", 248.90, 249.10))
}

fn quote(symbol: &str, bid: f64, ask: f64) -> MarketData {
    MarketData::new(
        symbol,
        Price::from_decimal((bid + ask) / 2.0),
        Price::from_decimal(bid),
        Price::from_decimal(ask),
        100,
        500,
        400,
        1_000_000,
        100,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();
    let config = load_config(&cli)?;

    let router = ExchangeRouter::new(Arc::new(AcceptAllOrders), Arc::new(seed_quotes()));
    let server = TradingServer::new(config, Arc::new(router));
    server.start().await.context("starting server")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    log::info!("shutting down");
    server.stop().await;

    let stats = server.stats();
    log::info!(
        "served {} connections, {} messages ({} errors)",
        stats.total_connections,
        stats.messages_processed,
        stats.errors
    );
    Ok(())
}
