//! Per-symbol market snapshots.

use crate::model::price::Price;
use crate::model::{ValidationError, MAX_SYMBOL_LEN};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A market data snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub last_price: Price,
    pub bid: Price,
    pub ask: Price,
    pub last_size: u32,
    pub bid_size: u32,
    pub ask_size: u32,
    /// Cumulative traded volume.
    pub volume: u64,
    pub num_trades: u32,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
}

impl MarketData {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        last_price: Price,
        bid: Price,
        ask: Price,
        last_size: u32,
        bid_size: u32,
        ask_size: u32,
        volume: u64,
        num_trades: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            last_price,
            bid,
            ask,
            last_size,
            bid_size,
            ask_size,
            volume,
            num_trades,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Builds the subscription request payload: only the symbol is
    /// meaningful, every other field is zeroed.
    pub fn request(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_price: Price::default(),
            bid: Price::default(),
            ask: Price::default(),
            last_size: 0,
            bid_size: 0,
            ask_size: 0,
            volume: 0,
            num_trades: 0,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Validates the snapshot: the symbol must be present and fit the wire
    /// field, and a quoted book must not be crossed (bid < ask).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if self.symbol.len() > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong(self.symbol.clone()));
        }
        if !self.bid.is_zero() || !self.ask.is_zero() {
            if self.bid.compare(self.ask) != std::cmp::Ordering::Less {
                return Err(ValidationError::CrossedBook {
                    bid: self.bid,
                    ask: self.ask,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bid: f64, ask: f64) -> MarketData {
        MarketData::new(
            "AAPL",
            Price::from_decimal((bid + ask) / 2.0),
            Price::from_decimal(bid),
            Price::from_decimal(ask),
            100,
            500,
            400,
            1_000_000,
            42,
        )
    }

    #[test]
    fn valid_book_passes() {
        assert!(snapshot(100.49, 100.51).validate().is_ok());
    }

    #[test]
    fn crossed_book_is_rejected() {
        let crossed = snapshot(100.51, 100.49);
        assert!(matches!(
            crossed.validate(),
            Err(ValidationError::CrossedBook { .. })
        ));

        let locked = snapshot(100.50, 100.50);
        assert!(locked.validate().is_err());
    }

    #[test]
    fn request_carries_only_the_symbol() {
        let request = MarketData::request("TSLA");
        assert_eq!(request.symbol, "TSLA");
        assert!(request.bid.is_zero() && request.ask.is_zero());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn empty_symbol_is_rejected() {
        assert_eq!(
            MarketData::request("").validate(),
            Err(ValidationError::EmptySymbol)
        );
    }
}
