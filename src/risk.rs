use std::collections::HashMap;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::config::{RiskConfig, TrailingAnchor};
use crate::ports::market_gateway::Side;

/// Hard leverage ceiling independent of configuration.
const MAX_LEVERAGE: u32 = 5;
/// Adverse move assumed when converting a risk budget into notional.
const SIZING_STOP_FRACTION: f64 = 0.05;
const LEG2_SUFFIX: &str = "_2";

#[derive(Debug, Clone, PartialEq)]
pub struct PositionState {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_zscore: f64,
    pub amount: f64,
    pub trailing_activated: bool,
    pub best_price: Option<f64>,
}

impl PositionState {
    fn ratchet(&mut self, price: f64) {
        let best = match (self.side, self.best_price) {
            (_, None) => price,
            (Side::Long, Some(best)) => best.max(price),
            (Side::Short, Some(best)) => best.min(price),
        };
        self.best_price = Some(best);
    }
}

pub type PositionRegistry = HashMap<String, PositionState>;

/// Registry keys for the two legs of one pair trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairLegIds {
    pub leg1: String,
    pub leg2: String,
}

pub fn pair_leg_ids(sector: &str, symbol1: &str, symbol2: &str) -> PairLegIds {
    let leg1 = format!("{}_{}_{}", sector, symbol1, symbol2);
    let leg2 = format!("{}{}", leg1, LEG2_SUFFIX);
    PairLegIds { leg1, leg2 }
}

/// Base-currency size for one leg: half the per-trade risk budget, spread
/// over a fixed 5% adverse move.
pub fn position_size(equity: f64, price: f64, risk_pct: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    let risk_per_leg = equity * (risk_pct / 100.0) / 2.0;
    let position_value = risk_per_leg / SIZING_STOP_FRACTION;
    (position_value / price).max(0.0)
}

/// Rounds `size` down to a multiple of `step`. Returns zero when the size is
/// below one step.
pub fn quantize_size_by_step(size: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return size;
    }
    let multiples = (size / step).trunc();
    if multiples < Decimal::ONE {
        return Decimal::ZERO;
    }
    multiples * step
}

/// Holds the position registry and the risk limits. All registry mutation
/// goes through `&mut self`, so the owner is the single writer.
#[derive(Debug)]
pub struct RiskManager {
    cfg: RiskConfig,
    positions: PositionRegistry,
}

impl RiskManager {
    pub fn new(cfg: RiskConfig) -> Self {
        Self {
            cfg,
            positions: HashMap::new(),
        }
    }

    pub fn leverage_ok(&self, leverage: u32) -> bool {
        (1..=MAX_LEVERAGE.min(self.cfg.leverage)).contains(&leverage)
    }

    pub fn position_size(&self, equity: f64, price: f64) -> f64 {
        position_size(equity, price, self.cfg.risk_per_trade_pct)
    }

    /// Converts a raw size into an order amount with `size_decimals` places.
    /// `None` if the amount rounds to zero or is not representable.
    pub fn quantize_size(&self, size: f64) -> Option<Decimal> {
        let raw = Decimal::from_f64(size)?;
        let step = Decimal::try_new(1, self.cfg.size_decimals).ok()?;
        let amount = quantize_size_by_step(raw, step);
        (amount > Decimal::ZERO).then_some(amount)
    }

    /// Non-positive equity reads as zero exposure and never blocks.
    pub fn basket_risk_ok(&self, equity: f64, open_value: f64, new_trade_value: f64) -> bool {
        let exposure_pct = if equity > 0.0 {
            (open_value + new_trade_value) / equity * 100.0
        } else {
            0.0
        };
        exposure_pct <= self.cfg.max_basket_risk_pct
    }

    /// Rejects entries that would pay funding above the cap. Unknown funding
    /// passes.
    pub fn funding_rate_ok(&self, funding_pct: Option<f64>, side: Side) -> bool {
        let Some(rate) = funding_pct else {
            return true;
        };
        match side {
            Side::Long => rate <= self.cfg.max_funding_rate_pct,
            Side::Short => rate >= -self.cfg.max_funding_rate_pct,
        }
    }

    pub fn register(
        &mut self,
        id: &str,
        symbol: &str,
        side: Side,
        entry_price: f64,
        entry_zscore: f64,
        amount: f64,
    ) {
        self.positions.insert(
            id.to_string(),
            PositionState {
                symbol: symbol.to_string(),
                side,
                entry_price,
                entry_zscore,
                amount,
                trailing_activated: false,
                best_price: None,
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> Option<PositionState> {
        self.positions.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&PositionState> {
        self.positions.get(id)
    }

    pub fn is_pair_open(&self, ids: &PairLegIds) -> bool {
        self.positions.contains_key(&ids.leg1) || self.positions.contains_key(&ids.leg2)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Advances the trailing stop for one leg. `None` if the id is not
    /// registered, `Some(true)` when the stop is hit.
    ///
    /// Inside the activation band the stop arms and `best_price` ratchets in
    /// the position's favour; outside it `best_price` stays frozen.
    pub fn update_trailing(&mut self, id: &str, price: f64, zscore: f64) -> Option<bool> {
        let activation_z = self.cfg.trailing_activation_z;
        let pct = self.cfg.trailing_stop_pct;
        let anchor = self.cfg.trailing_anchor;
        let pos = self.positions.get_mut(id)?;

        if zscore.abs() <= activation_z {
            if !pos.trailing_activated {
                log::info!(
                    "[TRAILING] {} armed at price {} (z={:.3})",
                    pos.symbol,
                    price,
                    zscore
                );
            }
            pos.trailing_activated = true;
            pos.ratchet(price);
        }
        if !pos.trailing_activated {
            return Some(false);
        }

        let best = pos.best_price.unwrap_or(pos.entry_price);
        let reference = match anchor {
            TrailingAnchor::Entry => pos.entry_price,
            TrailingAnchor::Best => best,
        };
        let stop_distance = reference * pct / 100.0;
        let hit = match pos.side {
            Side::Long => price <= best - stop_distance,
            Side::Short => price >= best + stop_distance,
        };
        Some(hit)
    }
}
