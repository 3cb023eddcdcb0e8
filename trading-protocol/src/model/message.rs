//! The tagged message union carried on the wire.

use crate::model::market_data::MarketData;
use crate::model::order::Order;
use crate::model::trade::TradeExecution;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Wire tags for every supported message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageType {
    Heartbeat = 1,
    OrderNew = 2,
    OrderCancel = 3,
    OrderModify = 4,
    OrderStatus = 5,
    MarketData = 6,
    TradeExec = 7,
    Error = 8,
}

impl MessageType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Heartbeat),
            2 => Some(Self::OrderNew),
            3 => Some(Self::OrderCancel),
            4 => Some(Self::OrderModify),
            5 => Some(Self::OrderStatus),
            6 => Some(Self::MarketData),
            7 => Some(Self::TradeExec),
            8 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Protocol-level error codes carried in [`ErrorInfo`].
pub mod error_code {
    pub const INVALID_MESSAGE: i32 = -13;
    pub const INVALID_ORDER: i32 = -14;
    pub const ORDER_NOT_FOUND: i32 = -15;
    pub const MARKET_DATA: i32 = -16;
}

/// Payload of an [`MessageType::Error`] message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Exactly one payload variant per message tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    Heartbeat,
    OrderNew(Order),
    OrderCancel(Order),
    OrderModify(Order),
    OrderStatus(Order),
    MarketData(MarketData),
    TradeExec(TradeExecution),
    Error(ErrorInfo),
}

/// One protocol message: a monotonically-assigned sequence number, a
/// timestamp, and a single payload variant.
///
/// Constructors stamp the current time and leave the sequence number at
/// zero; the session layer assigns it just before the message is framed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sequence: u64,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    pub payload: MessagePayload,
}

impl Message {
    fn with_payload(payload: MessagePayload) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now().timestamp(),
            payload,
        }
    }

    pub fn heartbeat() -> Self {
        Self::with_payload(MessagePayload::Heartbeat)
    }

    pub fn order_new(order: Order) -> Self {
        Self::with_payload(MessagePayload::OrderNew(order))
    }

    pub fn order_cancel(order: Order) -> Self {
        Self::with_payload(MessagePayload::OrderCancel(order))
    }

    pub fn order_modify(order: Order) -> Self {
        Self::with_payload(MessagePayload::OrderModify(order))
    }

    pub fn order_status(order: Order) -> Self {
        Self::with_payload(MessagePayload::OrderStatus(order))
    }

    pub fn market_data(data: MarketData) -> Self {
        Self::with_payload(MessagePayload::MarketData(data))
    }

    pub fn trade_exec(trade: TradeExecution) -> Self {
        Self::with_payload(MessagePayload::TradeExec(trade))
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::with_payload(MessagePayload::Error(ErrorInfo::new(code, message)))
    }

    /// The wire tag matching the payload variant.
    pub fn message_type(&self) -> MessageType {
        match &self.payload {
            MessagePayload::Heartbeat => MessageType::Heartbeat,
            MessagePayload::OrderNew(_) => MessageType::OrderNew,
            MessagePayload::OrderCancel(_) => MessageType::OrderCancel,
            MessagePayload::OrderModify(_) => MessageType::OrderModify,
            MessagePayload::OrderStatus(_) => MessageType::OrderStatus,
            MessagePayload::MarketData(_) => MessageType::MarketData,
            MessagePayload::TradeExec(_) => MessageType::TradeExec,
            MessagePayload::Error(_) => MessageType::Error,
        }
    }
}
