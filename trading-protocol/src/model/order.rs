use crate::model::price::Price;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum OrderType {
    Market = 1,
    Limit = 2,
    Stop = 3,
    StopLimit = 4,
}

impl OrderType {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Market),
            2 => Some(Self::Limit),
            3 => Some(Self::Stop),
            4 => Some(Self::StopLimit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum OrderSide {
    Buy = 1,
    Sell = 2,
}

impl OrderSide {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Buy),
            2 => Some(Self::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum OrderStatus {
    New = 1,
    Partial = 2,
    Filled = 3,
    Cancelled = 4,
    Rejected = 5,
}

impl OrderStatus {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::New),
            2 => Some(Self::Partial),
            3 => Some(Self::Filled),
            4 => Some(Self::Cancelled),
            5 => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum TimeInForce {
    Day = 1,
    /// Immediate or Cancel.
    Ioc = 2,
    /// Fill or Kill.
    Fok = 3,
    /// Good Till Cancel.
    Gtc = 4,
}

impl TimeInForce {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Day),
            2 => Some(Self::Ioc),
            3 => Some(Self::Fok),
            4 => Some(Self::Gtc),
            _ => None,
        }
    }
}

/// A trading order.
///
/// Invariant: `filled_quantity + remaining_quantity == quantity`. The
/// constructor establishes it and [`Order::apply_fill`] preserves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: u64,
    pub symbol: String,
    pub client_id: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    pub price: Price,
    pub quantity: u32,
    pub filled_quantity: u32,
    pub remaining_quantity: u32,
    /// Unix timestamps, seconds.
    pub created_at: i64,
    pub modified_at: i64,
    pub expires_at: i64,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: u64,
        symbol: impl Into<String>,
        client_id: impl Into<String>,
        order_type: OrderType,
        side: OrderSide,
        time_in_force: TimeInForce,
        price: Price,
        quantity: u32,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            order_id,
            symbol: symbol.into(),
            client_id: client_id.into(),
            order_type,
            side,
            status: OrderStatus::New,
            time_in_force,
            price,
            quantity,
            filled_quantity: 0,
            remaining_quantity: quantity,
            created_at: now,
            modified_at: now,
            expires_at: 0,
        }
    }

    /// Builds the skeleton order carried by a cancel request.
    pub fn cancel_request(order_id: u64, client_id: impl Into<String>) -> Self {
        let mut order = Self::new(
            order_id,
            "",
            client_id,
            OrderType::Market,
            OrderSide::Buy,
            TimeInForce::Day,
            Price::default(),
            0,
        );
        order.status = OrderStatus::Cancelled;
        order
    }

    /// Records a fill of `quantity` units, clamped to what is still open,
    /// and advances the status to Partial or Filled.
    pub fn apply_fill(&mut self, quantity: u32) {
        let fill = quantity.min(self.remaining_quantity);
        self.filled_quantity += fill;
        self.remaining_quantity -= fill;
        self.status = if self.remaining_quantity == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.modified_at = Utc::now().timestamp();
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::New | OrderStatus::Partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order::new(
            7,
            "MSFT",
            "client-1",
            OrderType::Limit,
            OrderSide::Buy,
            TimeInForce::Day,
            Price::from_decimal(412.25),
            300,
        )
    }

    #[test]
    fn new_order_satisfies_quantity_invariant() {
        let order = sample_order();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.filled_quantity + order.remaining_quantity, order.quantity);
    }

    #[test]
    fn apply_fill_preserves_invariant_and_status() {
        let mut order = sample_order();

        order.apply_fill(100);
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.filled_quantity, 100);
        assert_eq!(order.filled_quantity + order.remaining_quantity, order.quantity);

        // Overfill is clamped to what is still open.
        order.apply_fill(500);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, order.quantity);
        assert_eq!(order.remaining_quantity, 0);
        assert!(!order.is_open());
    }

    #[test]
    fn wire_values_round_trip() {
        for tif in [
            TimeInForce::Day,
            TimeInForce::Ioc,
            TimeInForce::Fok,
            TimeInForce::Gtc,
        ] {
            assert_eq!(TimeInForce::from_wire(tif as u32), Some(tif));
        }
        assert_eq!(OrderType::from_wire(0), None);
        assert_eq!(OrderSide::from_wire(3), None);
        assert_eq!(OrderStatus::from_wire(6), None);
    }
}
