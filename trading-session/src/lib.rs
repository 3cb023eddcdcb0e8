//! Concurrent TCP session layer for the trading wire protocol.
//!
//! The server side ([`TradingServer`]) accepts clients, tracks them in a
//! [`SessionRegistry`] and dispatches their frames through a
//! [`MessageHandler`]. The client side ([`TradingClient`]) maintains one
//! connection and surfaces server pushes through [`ClientEvents`]. Both
//! sides share the framed [`Connection`] and its receive loop.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handler;
pub mod registry;
pub mod server;

pub use client::{ClientStats, SessionState, TradingClient};
pub use config::{ClientConfig, ServerConfig};
pub use connection::{CloseReason, Connection};
pub use error::SessionError;
pub use events::{ClientEvents, NullEvents};
pub use handler::{
    AcceptAllOrders, ExchangeRouter, MarketDataProvider, MessageHandler, OrderHandler,
    StaticMarketData,
};
pub use registry::{SessionEntry, SessionRegistry};
pub use server::{ServerState, ServerStats, TradingServer};

#[cfg(test)]
mod tests;
