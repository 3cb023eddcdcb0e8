//! Server-side dispatch seam and the collaborator contracts behind it.
//!
//! The session layer performs no trading logic. Orders, market data and
//! trade routing are delegated through these interfaces; the bundled
//! implementations are placeholders with the same depth as the rest of the
//! system expects from an external matching engine.

use crate::registry::SessionRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use chrono::Utc;
use trading_protocol::model::error_code;
use trading_protocol::{MarketData, Message, MessagePayload, Order, OrderStatus};

/// Order-processing collaborator. The session layer only needs a status to
/// echo back to the submitting client.
pub trait OrderHandler: Send + Sync {
    fn handle(&self, order: &Order) -> OrderStatus;
}

/// Market-data collaborator, consulted for snapshot requests.
pub trait MarketDataProvider: Send + Sync {
    fn lookup(&self, symbol: &str) -> Option<MarketData>;
}

/// The single extension point the per-connection receive task dispatches
/// into. Returning a message sends it back to the originating client.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: Message,
        client_id: &str,
        sessions: &SessionRegistry,
    ) -> Option<Message>;
}

/// Default router: orders to the [`OrderHandler`], market-data requests to
/// the [`MarketDataProvider`], trade executions to the buyer and seller
/// sessions.
pub struct ExchangeRouter {
    orders: Arc<dyn OrderHandler>,
    market_data: Arc<dyn MarketDataProvider>,
    sequence: AtomicU64,
}

impl ExchangeRouter {
    pub fn new(orders: Arc<dyn OrderHandler>, market_data: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            orders,
            market_data,
            sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl MessageHandler for ExchangeRouter {
    async fn handle(
        &self,
        message: Message,
        client_id: &str,
        sessions: &SessionRegistry,
    ) -> Option<Message> {
        match message.payload {
            MessagePayload::Heartbeat => None,
            MessagePayload::OrderNew(order)
            | MessagePayload::OrderCancel(order)
            | MessagePayload::OrderModify(order) => {
                log::info!(
                    "order {} ({}) from {client_id}",
                    order.order_id,
                    order.symbol
                );
                let status = self.orders.handle(&order);
                let mut ack = order;
                ack.status = status;
                ack.modified_at = Utc::now().timestamp();
                Some(Message::order_status(ack))
            }
            MessagePayload::MarketData(request) => {
                match self.market_data.lookup(&request.symbol) {
                    Some(snapshot) => Some(Message::market_data(snapshot)),
                    None => Some(Message::error(
                        error_code::MARKET_DATA,
                        format!("no market data for {}", request.symbol),
                    )),
                }
            }
            MessagePayload::TradeExec(trade) => {
                for party in [trade.buyer_id.clone(), trade.seller_id.clone()] {
                    let Some(connection) = sessions.lookup(&party) else {
                        continue;
                    };
                    let mut notice = Message::trade_exec(trade.clone());
                    notice.sequence = self.next_sequence();
                    match connection.send(&notice).await {
                        Ok(_) => sessions.record_sent(&party),
                        Err(error) => {
                            log::warn!("trade {} notice to {party} failed: {error}", trade.trade_id)
                        }
                    }
                }
                None
            }
            MessagePayload::OrderStatus(_) | MessagePayload::Error(_) => {
                log::warn!(
                    "unexpected {:?} from {client_id}, dropping",
                    message.message_type()
                );
                None
            }
        }
    }
}

/// Placeholder order handler: acknowledges everything as accepted.
pub struct AcceptAllOrders;

impl OrderHandler for AcceptAllOrders {
    fn handle(&self, order: &Order) -> OrderStatus {
        match order.status {
            OrderStatus::Cancelled => OrderStatus::Cancelled,
            _ => OrderStatus::New,
        }
    }
}

/// In-memory market data provider backed by a fixed set of quotes.
#[derive(Default)]
pub struct StaticMarketData {
    quotes: HashMap<String, MarketData>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(mut self, data: MarketData) -> Self {
        self.quotes.insert(data.symbol.clone(), data);
        self
    }
}

impl MarketDataProvider for StaticMarketData {
    fn lookup(&self, symbol: &str) -> Option<MarketData> {
        self.quotes.get(symbol).cloned()
    }
}
