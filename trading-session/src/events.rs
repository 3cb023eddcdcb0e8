//! Client-side event interface.
//!
//! One method per event, each delivered at most once per occurrence per
//! connection. All methods default to no-ops so subscribers implement only
//! what they care about.

use async_trait::async_trait;
use trading_protocol::{MarketData, Order, TradeExecution};

#[async_trait]
pub trait ClientEvents: Send + Sync {
    /// Fired exactly once after the session reaches Connected.
    async fn on_connect(&self) {}

    /// Fired exactly once when the session leaves Connected, whether the
    /// peer closed, an error occurred, or `disconnect` was called.
    async fn on_disconnect(&self) {}

    async fn on_order_status(&self, _order: Order) {}

    async fn on_market_data(&self, _data: MarketData) {}

    async fn on_trade(&self, _trade: TradeExecution) {}

    async fn on_error(&self, _code: i32, _message: String) {}
}

/// Subscriber that ignores every event.
pub struct NullEvents;

#[async_trait]
impl ClientEvents for NullEvents {}
