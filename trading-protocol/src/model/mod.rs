//! Core data model shared by the client and server session layers.
//!
//! Defining these types in one crate keeps the wire layout identical on both
//! sides of a connection.
//!
//! # Submodules
//! - [`price`]: Fixed-point price representation.
//! - [`order`]: Trading orders and their lifecycle enums.
//! - [`market_data`]: Per-symbol market snapshots.
//! - [`trade`]: Trade execution reports.
//! - [`message`]: The tagged message union carried on the wire.

pub mod market_data;
pub mod message;
pub mod order;
pub mod price;
pub mod trade;

pub use market_data::MarketData;
pub use message::{error_code, ErrorInfo, Message, MessagePayload, MessageType};
pub use order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use price::Price;
pub use trade::TradeExecution;

use thiserror::Error;

/// Maximum encoded length of a symbol, in bytes.
pub const MAX_SYMBOL_LEN: usize = 16;

/// Maximum encoded length of a client identifier, in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 32;

/// Maximum encoded length of an error message, in bytes.
pub const MAX_ERROR_MSG_LEN: usize = 256;

/// Validation failures for message payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("symbol is empty")]
    EmptySymbol,
    #[error("symbol {0:?} exceeds {MAX_SYMBOL_LEN} bytes")]
    SymbolTooLong(String),
    #[error("crossed book: bid {bid} is not below ask {ask}")]
    CrossedBook { bid: Price, ask: Price },
}
