use crate::model::price::Price;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A trade execution report, delivered to the buyer and seller sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecution {
    pub trade_id: u64,
    /// The order this execution originated from.
    pub order_id: u64,
    pub symbol: String,
    pub price: Price,
    pub quantity: u32,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    pub buyer_id: String,
    pub seller_id: String,
}

impl TradeExecution {
    pub fn new(
        trade_id: u64,
        order_id: u64,
        symbol: impl Into<String>,
        price: Price,
        quantity: u32,
        buyer_id: impl Into<String>,
        seller_id: impl Into<String>,
    ) -> Self {
        Self {
            trade_id,
            order_id,
            symbol: symbol.into(),
            price,
            quantity,
            timestamp: Utc::now().timestamp(),
            buyer_id: buyer_id.into(),
            seller_id: seller_id.into(),
        }
    }

    pub fn involves(&self, client_id: &str) -> bool {
        self.buyer_id == client_id || self.seller_id == client_id
    }
}
