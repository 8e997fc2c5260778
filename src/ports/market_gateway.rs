use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar open time, milliseconds since epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub contracts: Decimal,
    pub mark_price: Decimal,
    pub contract_size: Decimal,
}

impl ExchangePosition {
    pub fn notional(&self) -> Decimal {
        (self.contract_size * self.contracts * self.mark_price).abs()
    }
}

/// Market data and order routing used by the cycle orchestrator. Funding
/// rates are expressed in percent (0.01 == 0.01%).
#[async_trait]
pub trait MarketGateway: Send + Sync {
    async fn connect(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, GatewayError>;

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<f64>, GatewayError>;

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Option<f64>, GatewayError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError>;

    async fn fetch_equity(&self) -> Result<Decimal, GatewayError>;

    async fn fetch_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<(), GatewayError>;

    /// Reduces a held position; `side` is the side of the position being
    /// closed, the gateway sends the opposite order.
    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn notional_uses_contract_size_and_mark_price() {
        let pos = ExchangePosition {
            symbol: "SOL/USDT:USDT".to_string(),
            side: Side::Short,
            contracts: dec!(-3),
            mark_price: dec!(150),
            contract_size: dec!(1),
        };
        assert_eq!(pos.notional(), dec!(450));
    }

    #[test]
    fn opposite_side_flips() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }
}
