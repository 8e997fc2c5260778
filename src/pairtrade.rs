//! Cycle orchestrator: fetches market data for every configured pair,
//! runs the signal engine, then manages exits, trailing stops and entries
//! against the position registry.
//!
//! Market-data fetches fan out one task per pair; everything that touches
//! the registry runs afterwards on the single control flow in configured
//! sector/pair order.

use anyhow::{anyhow, Context, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{PairBotConfig, PairSpec};
use crate::error::{GatewayError, PairTradeError};
use crate::ports::market_gateway::{MarketGateway, PriceBar};
use crate::ports::replay_gateway::ReplayGateway;
use crate::retry::retry_with;
use crate::risk::{pair_leg_ids, PairLegIds, PositionState, RiskManager};
use crate::signal::{LegData, OpenInterest, PairAnalysis, PairSignal, SignalEngine};
use crate::trade::execution::gateway_box::GatewayBox;
use crate::trade::trade_log::{TradeAction, TradeLog, TradeRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub analyzed: usize,
    pub skipped: usize,
    pub opened: usize,
    pub closed: usize,
}

struct PairJob {
    sector: String,
    pair: PairSpec,
    oi_prev: (Option<f64>, Option<f64>),
}

struct PairOutcome {
    analysis: PairAnalysis,
    oi_now: (Option<f64>, Option<f64>),
}

pub struct PairTradeEngine {
    cfg: Arc<PairBotConfig>,
    gateway: Arc<dyn MarketGateway>,
    replay: Option<Arc<ReplayGateway>>,
    signals: Arc<SignalEngine>,
    risk: RiskManager,
    // Last observed open interest per symbol, carried across cycles
    oi_cache: HashMap<String, f64>,
    trade_log: Option<TradeLog>,
}

impl PairTradeEngine {
    /// Builds the engine on top of the replay gateway named by
    /// `replay_file`. Exchange connectivity is supplied by embedding
    /// applications through [`PairTradeEngine::with_gateway`].
    pub fn new(cfg: PairBotConfig) -> Result<Self> {
        let path = cfg
            .replay_file
            .clone()
            .ok_or_else(|| anyhow!("no market gateway configured: set REPLAY_FILE"))?;
        let equity = Decimal::from_f64(cfg.dry_run_equity)
            .ok_or_else(|| anyhow!("invalid DRY_RUN_EQUITY: {}", cfg.dry_run_equity))?;
        let replay = Arc::new(
            ReplayGateway::new(&path, equity)
                .with_context(|| format!("failed to load replay file {}", path))?,
        );
        log::info!(
            "[REPLAY] loaded {} snapshots from {}",
            replay.len(),
            path
        );
        let gateway: Arc<dyn MarketGateway> = Arc::new(GatewayBox::new(replay.clone(), &cfg));
        Ok(Self::build(cfg, gateway, Some(replay)))
    }

    pub fn with_gateway(cfg: PairBotConfig, gateway: Arc<dyn MarketGateway>) -> Self {
        Self::build(cfg, gateway, None)
    }

    fn build(
        cfg: PairBotConfig,
        gateway: Arc<dyn MarketGateway>,
        replay: Option<Arc<ReplayGateway>>,
    ) -> Self {
        let signals = Arc::new(SignalEngine::new(cfg.strategy.clone()));
        let risk = RiskManager::new(cfg.risk.clone());
        let trade_log = cfg.trade_log_path.as_ref().map(TradeLog::new);
        Self {
            cfg: Arc::new(cfg),
            gateway,
            replay,
            signals,
            risk,
            oi_cache: HashMap::new(),
            trade_log,
        }
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Connects, cycles until `shutdown` resolves (or replay data runs out),
    /// then closes the gateway. The gateway is closed on every exit path.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        log::info!(
            "[CONFIG] pairs={} timeframe={} interval={}s dry_run={} leverage={}",
            self.cfg.pair_count(),
            self.cfg.timeframe,
            self.cfg.interval_secs,
            self.cfg.dry_run,
            self.cfg.risk.leverage
        );

        let result = match self.gateway.connect().await {
            Ok(()) => {
                self.drive(shutdown).await;
                Ok(())
            }
            Err(err) => Err(anyhow!("failed to connect market gateway: {}", err)),
        };

        if let Err(err) = self.gateway.close().await {
            log::warn!("failed to close market gateway: {}", err);
        }
        result
    }

    async fn drive<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if let Some(replay) = self.replay.clone() {
            // --- Replay Mode ---
            log::info!("[REPLAY] Running in replay mode.");
            loop {
                let outcome = self.run_cycle().await;
                self.log_cycle(outcome);
                if !replay.tick() {
                    log::info!("[REPLAY] End of data file reached.");
                    break;
                }
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        log::info!("[REPLAY] Shutdown requested.");
                        break;
                    }
                    _ = tokio::task::yield_now() => {}
                }
            }
        } else {
            // --- Live Mode ---
            log::info!("[LIVE] Running in live mode.");
            let interval = Duration::from_secs(self.cfg.interval_secs);
            loop {
                let outcome = self.run_cycle().await;
                self.log_cycle(outcome);
                tokio::select! {
                    _ = &mut shutdown => {
                        log::info!("[LIVE] Shutdown requested.");
                        break;
                    }
                    _ = sleep(interval) => {}
                }
            }
        }
    }

    fn remember_oi(&mut self, symbol: &str, oi: Option<f64>) {
        match oi {
            Some(oi) => {
                self.oi_cache.insert(symbol.to_string(), oi);
            }
            None => {
                self.oi_cache.remove(symbol);
            }
        }
    }

    fn log_cycle(&self, outcome: Result<CycleSummary, PairTradeError>) {
        match outcome {
            Ok(summary) => log::info!(
                "[CYCLE] analyzed={} skipped={} opened={} closed={} open_legs={}",
                summary.analyzed,
                summary.skipped,
                summary.opened,
                summary.closed,
                self.risk.open_count()
            ),
            Err(err) => log::error!("[CYCLE] aborted: {}", err),
        }
    }

    /// One full pass over every configured pair. Fails only when account
    /// state (equity, open positions) cannot be read.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, PairTradeError> {
        let equity = self
            .gateway
            .fetch_equity()
            .await
            .map_err(PairTradeError::Precondition)?;
        let positions = self
            .gateway
            .fetch_open_positions()
            .await
            .map_err(PairTradeError::Precondition)?;
        let equity = equity.to_f64().unwrap_or(0.0);
        let mut open_value = positions
            .iter()
            .map(|p| p.notional())
            .sum::<Decimal>()
            .to_f64()
            .unwrap_or(0.0);
        log::debug!(
            "[CYCLE] equity={:.2} open_value={:.2} positions={}",
            equity,
            open_value,
            positions.len()
        );

        let mut handles = Vec::with_capacity(self.cfg.pair_count());
        for sector in &self.cfg.sectors {
            for pair in &sector.pairs {
                let job = PairJob {
                    sector: sector.sector.clone(),
                    pair: pair.clone(),
                    oi_prev: (
                        self.oi_cache.get(&pair.symbol1).copied(),
                        self.oi_cache.get(&pair.symbol2).copied(),
                    ),
                };
                let label = format!("{}/{}", pair.symbol1, pair.symbol2);
                let task = tokio::spawn(analyze_pair(
                    Arc::clone(&self.gateway),
                    Arc::clone(&self.cfg),
                    Arc::clone(&self.signals),
                    job,
                ));
                handles.push((label, task));
            }
        }

        let mut summary = CycleSummary::default();
        let mut outcomes = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            match handle.await {
                Ok(Ok(Some(outcome))) => outcomes.push(outcome),
                Ok(Ok(None)) => summary.skipped += 1,
                Ok(Err(err)) => {
                    log::warn!("[FETCH] {} skipped: {}", label, err);
                    summary.skipped += 1;
                }
                Err(err) => {
                    log::error!("[CYCLE] analysis task for {} failed: {}", label, err);
                    summary.skipped += 1;
                }
            }
        }

        // A missing sample clears the symbol's history, so the next reading
        // is never compared against a stale one.
        for outcome in &outcomes {
            let analysis = &outcome.analysis;
            self.remember_oi(&analysis.symbol1, outcome.oi_now.0);
            self.remember_oi(&analysis.symbol2, outcome.oi_now.1);
        }

        for outcome in outcomes {
            let analysis = outcome.analysis;
            summary.analyzed += 1;
            let ids = pair_leg_ids(&analysis.sector, &analysis.symbol1, &analysis.symbol2);

            if self.risk.is_pair_open(&ids) {
                match self.manage_open_pair(&analysis, &ids).await {
                    Ok(true) => summary.closed += 1,
                    Ok(false) => {}
                    Err(err) => log::warn!(
                        "[EXIT] {}/{} not managed this cycle: {}",
                        analysis.symbol1,
                        analysis.symbol2,
                        err
                    ),
                }
                continue;
            }

            let Some(signal) = analysis.entry_signal() else {
                continue;
            };
            match self
                .open_pair(&analysis, signal, &ids, equity, open_value)
                .await
            {
                Ok(Some(notional)) => {
                    summary.opened += 1;
                    open_value += notional;
                }
                Ok(None) => {}
                Err(err) => log::error!(
                    "[ENTRY] {}/{} failed: {}",
                    analysis.symbol1,
                    analysis.symbol2,
                    err
                ),
            }
        }

        Ok(summary)
    }

    /// Exit rules take precedence over the trailing stop. Returns whether
    /// the pair was closed.
    async fn manage_open_pair(
        &mut self,
        analysis: &PairAnalysis,
        ids: &PairLegIds,
    ) -> Result<bool, PairTradeError> {
        if let Some(reason) = analysis.exit {
            log::info!(
                "[EXIT] {}/{} {} at z={:.3}",
                analysis.symbol1,
                analysis.symbol2,
                reason.as_str(),
                analysis.zscore
            );
            self.close_pair(analysis, ids, reason.as_str(), None).await?;
            return Ok(true);
        }

        let price1 = self.ticker_price(&analysis.symbol1).await?;
        let price2 = self.ticker_price(&analysis.symbol2).await?;
        // Both legs are evaluated so each ratchets its own best price.
        let hit1 = self
            .risk
            .update_trailing(&ids.leg1, price1, analysis.zscore);
        let hit2 = self
            .risk
            .update_trailing(&ids.leg2, price2, analysis.zscore);
        if hit1 != Some(true) && hit2 != Some(true) {
            return Ok(false);
        }

        log::info!(
            "[TRAILING] {}/{} stop hit at {} / {}",
            analysis.symbol1,
            analysis.symbol2,
            price1,
            price2
        );
        self.close_pair(analysis, ids, "trailing_stop", Some((price1, price2)))
            .await?;
        Ok(true)
    }

    /// Closes whatever the exchange holds in the pair's two symbols. Registry
    /// entries survive unless every close succeeds.
    async fn close_pair(
        &mut self,
        analysis: &PairAnalysis,
        ids: &PairLegIds,
        reason: &str,
        prices: Option<(f64, f64)>,
    ) -> Result<(), PairTradeError> {
        let positions = retry_with(&self.cfg.retry, "open positions", || {
            self.gateway.fetch_open_positions()
        })
        .await
        .map_err(|err| PairTradeError::data(&analysis.symbol1, err))?;

        let mut failure: Option<PairTradeError> = None;
        for pos in positions.iter().filter(|p| {
            (p.symbol == analysis.symbol1 || p.symbol == analysis.symbol2) && !p.contracts.is_zero()
        }) {
            let amount = pos.contracts.abs();
            match self
                .gateway
                .close_position(&pos.symbol, pos.side, amount)
                .await
            {
                Ok(()) => log::info!(
                    "[EXIT] closed {} {} {}",
                    pos.side.as_str(),
                    amount,
                    pos.symbol
                ),
                Err(err) => {
                    log::error!("[EXIT] close {} failed: {}", pos.symbol, err);
                    failure = Some(PairTradeError::execution(&pos.symbol, err));
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let leg1 = self.risk.remove(&ids.leg1);
        let leg2 = self.risk.remove(&ids.leg2);
        let (price1, price2) = prices.unwrap_or((0.0, 0.0));
        let record = TradeRecord {
            zscore: analysis.zscore,
            reason: reason.to_string(),
            price1,
            price2,
            ..closed_legs_record(analysis, leg1.as_ref(), leg2.as_ref())
        };
        self.record_trade(&record);
        Ok(())
    }

    /// Runs the pre-trade checks and, if they pass, opens both legs. Returns
    /// the notional opened, or `None` when a risk check rejects the entry.
    async fn open_pair(
        &mut self,
        analysis: &PairAnalysis,
        signal: PairSignal,
        ids: &PairLegIds,
        equity: f64,
        open_value: f64,
    ) -> Result<Option<f64>, PairTradeError> {
        let (symbol1, symbol2) = (analysis.symbol1.as_str(), analysis.symbol2.as_str());
        let (side1, side2) = signal.sides();

        let funding1 = self.funding_rate(symbol1).await?;
        let funding2 = self.funding_rate(symbol2).await?;
        if !self.risk.funding_rate_ok(funding1, side1) || !self.risk.funding_rate_ok(funding2, side2)
        {
            log::info!(
                "[RISK] {}/{} funding rejects entry ({:?}, {:?})",
                symbol1,
                symbol2,
                funding1,
                funding2
            );
            return Ok(None);
        }

        let price1 = self.ticker_price(symbol1).await?;
        let price2 = self.ticker_price(symbol2).await?;
        if price1 <= 0.0 || price2 <= 0.0 {
            log::warn!(
                "[RISK] {}/{} non-positive price ({}, {})",
                symbol1,
                symbol2,
                price1,
                price2
            );
            return Ok(None);
        }

        let amounts = (
            self.risk
                .quantize_size(self.risk.position_size(equity, price1)),
            self.risk
                .quantize_size(self.risk.position_size(equity, price2)),
        );
        let (Some(amount1), Some(amount2)) = amounts else {
            log::info!(
                "[RISK] {}/{} order size rounds to zero (equity={:.2})",
                symbol1,
                symbol2,
                equity
            );
            return Ok(None);
        };
        let size1 = amount1.to_f64().unwrap_or(0.0);
        let size2 = amount2.to_f64().unwrap_or(0.0);
        let notional = size1 * price1 + size2 * price2;
        if !self.risk.basket_risk_ok(equity, open_value, notional) {
            log::info!(
                "[RISK] {}/{} basket cap rejects entry (open={:.2} new={:.2} equity={:.2})",
                symbol1,
                symbol2,
                open_value,
                notional,
                equity
            );
            return Ok(None);
        }

        let leverage = self.cfg.risk.leverage;
        if !self.risk.leverage_ok(leverage) {
            log::warn!("[RISK] leverage {} outside allowed range", leverage);
            return Ok(None);
        }
        for symbol in [symbol1, symbol2] {
            self.gateway
                .set_leverage(symbol, leverage)
                .await
                .map_err(|err| PairTradeError::execution(symbol, err))?;
        }

        self.gateway
            .place_market_order(symbol1, side1, amount1)
            .await
            .map_err(|err| PairTradeError::execution(symbol1, err))?;
        if let Err(err) = self
            .gateway
            .place_market_order(symbol2, side2, amount2)
            .await
        {
            log::error!(
                "[ENTRY] {} leg failed, unwinding {} {} {}",
                symbol2,
                side1.as_str(),
                amount1,
                symbol1
            );
            if let Err(unwind) = self.gateway.close_position(symbol1, side1, amount1).await {
                log::error!(
                    "[ENTRY] unwind of {} failed, exchange position left open: {}",
                    symbol1,
                    unwind
                );
            }
            return Err(PairTradeError::execution(symbol2, err));
        }

        self.risk
            .register(&ids.leg1, symbol1, side1, price1, analysis.zscore, size1);
        self.risk
            .register(&ids.leg2, symbol2, side2, price2, analysis.zscore, size2);
        log::info!(
            "[ENTRY] {} {}: {} {} {} @ {} / {} {} {} @ {} (z={:.3})",
            analysis.sector,
            signal.as_str(),
            side1.as_str(),
            amount1,
            symbol1,
            price1,
            side2.as_str(),
            amount2,
            symbol2,
            price2,
            analysis.zscore
        );

        let record = TradeRecord {
            side1: side1.as_str().to_string(),
            side2: side2.as_str().to_string(),
            amount1: size1,
            amount2: size2,
            price1,
            price2,
            zscore: analysis.zscore,
            reason: "entry".to_string(),
            ..TradeRecord::now(TradeAction::Open, &analysis.sector, symbol1, symbol2)
        };
        self.record_trade(&record);
        Ok(Some(notional))
    }

    async fn ticker_price(&self, symbol: &str) -> Result<f64, PairTradeError> {
        let label = format!("ticker {}", symbol);
        let ticker = retry_with(&self.cfg.retry, &label, || self.gateway.fetch_ticker(symbol))
            .await
            .map_err(|err| PairTradeError::data(symbol, err))?;
        Ok(ticker.last_price.to_f64().unwrap_or(0.0))
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Option<f64>, PairTradeError> {
        let label = format!("funding {}", symbol);
        retry_with(&self.cfg.retry, &label, || {
            self.gateway.fetch_funding_rate(symbol)
        })
        .await
        .map_err(|err| PairTradeError::data(symbol, err))
    }

    fn record_trade(&self, record: &TradeRecord) {
        if let Some(trade_log) = &self.trade_log {
            if let Err(err) = trade_log.append(record) {
                log::warn!("[TRADE_LOG] failed to write trade log: {:?}", err);
            }
        }
    }
}

fn closed_legs_record(
    analysis: &PairAnalysis,
    leg1: Option<&PositionState>,
    leg2: Option<&PositionState>,
) -> TradeRecord {
    let side = |leg: Option<&PositionState>| leg.map(|p| p.side.as_str().to_string());
    TradeRecord {
        side1: side(leg1).unwrap_or_default(),
        side2: side(leg2).unwrap_or_default(),
        amount1: leg1.map(|p| p.amount).unwrap_or(0.0),
        amount2: leg2.map(|p| p.amount).unwrap_or(0.0),
        ..TradeRecord::now(
            TradeAction::Close,
            &analysis.sector,
            &analysis.symbol1,
            &analysis.symbol2,
        )
    }
}

async fn fetch_bars(
    gateway: &Arc<dyn MarketGateway>,
    cfg: &PairBotConfig,
    symbol: &str,
) -> Result<Vec<PriceBar>, PairTradeError> {
    let label = format!("candles {}", symbol);
    let limit = cfg.candle_limit();
    retry_with(&cfg.retry, &label, || {
        gateway.fetch_candles(symbol, &cfg.timeframe, limit)
    })
    .await
    .map_err(|err| PairTradeError::data(symbol, err))
}

async fn fetch_oi(gateway: &Arc<dyn MarketGateway>, cfg: &PairBotConfig, symbol: &str) -> Option<f64> {
    let label = format!("open interest {}", symbol);
    let result: Result<Option<f64>, GatewayError> =
        retry_with(&cfg.retry, &label, || gateway.fetch_open_interest(symbol)).await;
    result.unwrap_or_else(|err| {
        log::warn!("[FETCH] {} unavailable: {}", label, err);
        None
    })
}

/// Fetch-and-analyze task for one pair. Touches no engine state; `Ok(None)`
/// means the pair lacks enough history this cycle.
async fn analyze_pair(
    gateway: Arc<dyn MarketGateway>,
    cfg: Arc<PairBotConfig>,
    signals: Arc<SignalEngine>,
    job: PairJob,
) -> Result<Option<PairOutcome>, PairTradeError> {
    let PairSpec { symbol1, symbol2 } = &job.pair;
    let bars1 = fetch_bars(&gateway, &cfg, symbol1).await?;
    let bars2 = fetch_bars(&gateway, &cfg, symbol2).await?;

    let window = cfg.strategy.zscore_window;
    if bars1.len() < window || bars2.len() < window {
        log::debug!(
            "[SIGNAL] {}/{} has {}/{} bars, need {}",
            symbol1,
            symbol2,
            bars1.len(),
            bars2.len(),
            window
        );
        return Ok(None);
    }

    let oi_now = if cfg.strategy.use_oi_filter {
        (
            fetch_oi(&gateway, &cfg, symbol1).await,
            fetch_oi(&gateway, &cfg, symbol2).await,
        )
    } else {
        (None, None)
    };

    let analysis = signals.analyze(
        &job.sector,
        LegData {
            symbol: symbol1,
            bars: &bars1,
            open_interest: OpenInterest {
                current: oi_now.0,
                previous: job.oi_prev.0,
            },
        },
        LegData {
            symbol: symbol2,
            bars: &bars2,
            open_interest: OpenInterest {
                current: oi_now.1,
                previous: job.oi_prev.1,
            },
        },
    );
    log::debug!(
        "[SIGNAL] {} {}/{} z={:.3} signal={:?} exit={:?} filters=({},{},{})",
        analysis.sector,
        symbol1,
        symbol2,
        analysis.zscore,
        analysis.signal,
        analysis.exit,
        analysis.ema_ok,
        analysis.rsi_ok,
        analysis.oi_ok
    );
    Ok(Some(PairOutcome { analysis, oi_now }))
}
