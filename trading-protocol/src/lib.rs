//! # Trading Protocol Library
//!
//! Shared message model and wire codec for the trading client/server pair.
//!
//! ## Modules
//! - `model`: Fixed-schema message types (Order, MarketData, TradeExecution)
//!   built around fixed-point prices.
//! - `codec`: Length-prefixed binary framing with checksum validation. Every
//!   multi-byte field is big-endian so encoded frames are portable across
//!   architectures.

pub mod codec;
pub mod model;

pub use codec::{decode, encode, CodecError};
pub use model::{
    MarketData, Message, MessagePayload, MessageType, Order, OrderSide, OrderStatus, OrderType,
    Price, TimeInForce, TradeExecution,
};
