use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use crate::error::GatewayError;
use crate::ports::market_gateway::{ExchangePosition, MarketGateway, PriceBar, Side, Ticker};

// Data structures that mirror the JSONL snapshot file
#[derive(Debug, Clone, Deserialize)]
struct SymbolSnapshot {
    price: Decimal,
    /// Percent per funding interval.
    #[serde(default)]
    funding_rate: Option<f64>,
    #[serde(default)]
    open_interest: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct SnapshotEntry {
    timestamp: i64,
    prices: HashMap<String, SymbolSnapshot>,
}

/// Market gateway driven by recorded snapshots. Orders fill at the current
/// snapshot price and are netted into simulated positions.
#[derive(Debug)]
pub struct ReplayGateway {
    data: Vec<SnapshotEntry>,
    cursor: AtomicUsize,
    equity: Decimal,
    // Signed size per symbol, long positive
    positions: Mutex<HashMap<String, Decimal>>,
}

impl ReplayGateway {
    pub fn new(path: &str, equity: Decimal) -> Result<Self, GatewayError> {
        let file = File::open(path)
            .map_err(|e| GatewayError::Other(format!("failed to open replay file: {}", e)))?;
        Self::from_reader(BufReader::new(file), equity)
    }

    pub fn from_reader<R: BufRead>(reader: R, equity: Decimal) -> Result<Self, GatewayError> {
        let mut data = Vec::new();
        for line in reader.lines() {
            let line = line
                .map_err(|e| GatewayError::Other(format!("failed to read replay line: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SnapshotEntry = serde_json::from_str(&line).map_err(|e| {
                GatewayError::Other(format!("failed to parse replay entry '{}': {}", line, e))
            })?;
            data.push(entry);
        }

        if data.is_empty() {
            return Err(GatewayError::Other(
                "replay file is empty or invalid".to_string(),
            ));
        }

        Ok(Self {
            data,
            cursor: AtomicUsize::new(0),
            equity,
            positions: Mutex::new(HashMap::new()),
        })
    }

    // Advances the simulation by one step. Returns false if the end is reached.
    pub fn tick(&self) -> bool {
        let current_cursor = self.cursor.load(AtomicOrdering::SeqCst);
        if current_cursor + 1 < self.data.len() {
            self.cursor.fetch_add(1, AtomicOrdering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn current_timestamp_secs(&self) -> Option<i64> {
        let current_cursor = self.cursor.load(AtomicOrdering::SeqCst);
        self.data.get(current_cursor).map(|e| e.timestamp / 1000) // stored as ms
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn current(&self, symbol: &str) -> Result<&SymbolSnapshot, GatewayError> {
        let current_cursor = self.cursor.load(AtomicOrdering::SeqCst);
        let snapshot = self
            .data
            .get(current_cursor)
            .ok_or_else(|| GatewayError::Other("cursor out of bounds".to_string()))?;
        snapshot.prices.get(symbol).ok_or_else(|| {
            GatewayError::Rejected(format!(
                "symbol '{}' not found in snapshot at cursor {}",
                symbol, current_cursor
            ))
        })
    }

    fn fill(&self, symbol: &str, side: Side, amount: Decimal) -> Result<(), GatewayError> {
        if amount <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!(
                "non-positive order size {} for {}",
                amount, symbol
            )));
        }
        let fill_price = self.current(symbol)?.price;
        let signed = match side {
            Side::Long => amount,
            Side::Short => -amount,
        };
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| GatewayError::Other("replay position book poisoned".to_string()))?;
        let net = positions.entry(symbol.to_string()).or_insert(Decimal::ZERO);
        *net += signed;
        if net.is_zero() {
            positions.remove(symbol);
        }

        log::info!(
            "[REPLAY_FILL] symbol={}, side={}, size={}, price={}",
            symbol,
            side.as_str(),
            amount,
            fill_price
        );
        Ok(())
    }
}

#[async_trait]
impl MarketGateway for ReplayGateway {
    async fn fetch_candles(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, GatewayError> {
        let current_cursor = self.cursor.load(AtomicOrdering::SeqCst);
        let end = (current_cursor + 1).min(self.data.len());
        let mut bars: Vec<PriceBar> = self.data[..end]
            .iter()
            .filter_map(|entry| {
                let snapshot = entry.prices.get(symbol)?;
                let price = snapshot.price.to_f64()?;
                Some(PriceBar {
                    timestamp: entry.timestamp,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 0.0,
                })
            })
            .collect();
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        Ok(bars)
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<f64>, GatewayError> {
        Ok(self.current(symbol)?.open_interest)
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Option<f64>, GatewayError> {
        Ok(self.current(symbol)?.funding_rate)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: self.current(symbol)?.price,
        })
    }

    async fn fetch_equity(&self) -> Result<Decimal, GatewayError> {
        Ok(self.equity)
    }

    async fn fetch_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        let positions = self
            .positions
            .lock()
            .map_err(|_| GatewayError::Other("replay position book poisoned".to_string()))?;
        let mut out: Vec<ExchangePosition> = positions
            .iter()
            .map(|(symbol, net)| ExchangePosition {
                symbol: symbol.clone(),
                side: if net.is_sign_negative() {
                    Side::Short
                } else {
                    Side::Long
                },
                contracts: net.abs(),
                mark_price: self
                    .current(symbol)
                    .map(|s| s.price)
                    .unwrap_or(Decimal::ZERO),
                contract_size: Decimal::ONE,
            })
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        self.fill(symbol, side, amount)
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        self.fill(symbol, side.opposite(), amount)
    }
}
