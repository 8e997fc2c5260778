//! Pair signal engine: spread, rolling z-score, entry/exit rules and the
//! optional EMA / RSI-divergence / open-interest confirmation filters.
//!
//! Everything here is a pure function of the bars handed in plus the
//! immutable [`StrategyConfig`]; short or degenerate series never error,
//! they collapse to a neutral z-score of 0.

use std::collections::HashMap;

use crate::config::StrategyConfig;
use crate::indicators::{ema, local_maxima, local_minima, rsi};
use crate::ports::market_gateway::{PriceBar, Side};

/// Half-width of the take-profit band around the target z-score.
const TP_BAND: f64 = 0.1;
const DIVERGENCE_LOOKBACK: usize = 10;
const EXTREMA_ORDER: usize = 3;
const NEUTRAL_RSI: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSignal {
    /// First instrument oversold: long it, short the second.
    LongShort,
    /// First instrument overbought: short it, long the second.
    ShortLong,
}

impl PairSignal {
    /// Order sides for (leg 1, leg 2).
    pub fn sides(self) -> (Side, Side) {
        match self {
            PairSignal::LongShort => (Side::Long, Side::Short),
            PairSignal::ShortLong => (Side::Short, Side::Long),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PairSignal::LongShort => "long_short",
            PairSignal::ShortLong => "short_long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "tp",
            ExitReason::StopLoss => "sl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    /// Price lower low, RSI higher low.
    Bullish,
    /// Price higher high, RSI lower high.
    Bearish,
    /// Enough data, no qualifying pattern.
    Absent,
}

/// Outcome of the RSI-divergence filter for a pair signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsiConfirmation {
    Confirmed,
    Contradicted,
    InsufficientData,
}

impl RsiConfirmation {
    /// Only an explicit confirmation opens the gate.
    pub fn passes(self) -> bool {
        matches!(self, RsiConfirmation::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpenInterest {
    pub current: Option<f64>,
    pub previous: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct LegData<'a> {
    pub symbol: &'a str,
    pub bars: &'a [PriceBar],
    pub open_interest: OpenInterest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairAnalysis {
    pub sector: String,
    pub symbol1: String,
    pub symbol2: String,
    pub signal: Option<PairSignal>,
    pub zscore: f64,
    pub ema_ok: bool,
    pub rsi_ok: bool,
    pub oi_ok: bool,
    pub exit: Option<ExitReason>,
    pub spread: Option<f64>,
}

impl PairAnalysis {
    /// The signal, if it is fresh, unexited and confirmed by every filter.
    pub fn entry_signal(&self) -> Option<PairSignal> {
        if self.exit.is_some() || !(self.ema_ok && self.rsi_ok && self.oi_ok) {
            return None;
        }
        self.signal
    }
}

/// Ratio of leg-1 closes to leg-2 closes on leg 2's timestamps. Leg-1 closes
/// missing at a timestamp are forward-filled, then back-filled.
pub fn spread_series(bars1: &[PriceBar], bars2: &[PriceBar]) -> Vec<Option<f64>> {
    let by_ts: HashMap<i64, f64> = bars1.iter().map(|b| (b.timestamp, b.close)).collect();
    let mut aligned: Vec<Option<f64>> = bars2
        .iter()
        .map(|b| by_ts.get(&b.timestamp).copied())
        .collect();

    let mut last = None;
    for slot in aligned.iter_mut() {
        match slot {
            Some(v) => last = Some(*v),
            None => *slot = last,
        }
    }
    let mut next = None;
    for slot in aligned.iter_mut().rev() {
        match slot {
            Some(v) => next = Some(*v),
            None => *slot = next,
        }
    }

    aligned
        .into_iter()
        .zip(bars2)
        .map(|(close1, bar2)| close1.map(|c| c / bar2.close).filter(|v| v.is_finite()))
        .collect()
}

/// Rolling z-score with sample standard deviation. Positions without a full
/// window, or whose result is not finite (flat window), are `None`.
pub fn zscore_series(spread: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; spread.len()];
    if window < 2 {
        return out;
    }
    for end in (window - 1)..spread.len() {
        let slice = &spread[end + 1 - window..=end];
        let values: Option<Vec<f64>> = slice.iter().copied().collect();
        let Some(values) = values else {
            continue;
        };
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let z = (values[values.len() - 1] - mean) / var.sqrt();
        out[end] = Some(z).filter(|z| z.is_finite());
    }
    out
}

fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

#[derive(Debug, Clone)]
pub struct SignalEngine {
    cfg: StrategyConfig,
}

impl SignalEngine {
    pub fn new(cfg: StrategyConfig) -> Self {
        Self { cfg }
    }

    /// Entry thresholds are exclusive: `|z| == entry_z` is no signal.
    pub fn zscore_signal(&self, zscore: f64) -> Option<PairSignal> {
        if zscore > self.cfg.entry_z {
            Some(PairSignal::ShortLong)
        } else if zscore < -self.cfg.entry_z {
            Some(PairSignal::LongShort)
        } else {
            None
        }
    }

    /// Take-profit is checked before stop-loss.
    pub fn check_exit(&self, zscore: f64) -> Option<ExitReason> {
        if (zscore - self.cfg.exit_tp_z).abs() < TP_BAND {
            Some(ExitReason::TakeProfit)
        } else if zscore.abs() >= self.cfg.exit_sl_z {
            Some(ExitReason::StopLoss)
        } else {
            None
        }
    }

    /// Long legs need the last close above the EMA, short legs below it. An
    /// undefined EMA (too few bars) fails the leg.
    pub fn ema_filter(&self, bars: &[PriceBar], side: Side) -> bool {
        let closes = closes(bars);
        let trend = ema(&closes, self.cfg.ema_period);
        let (Some(close), Some(Some(average))) = (closes.last(), trend.last()) else {
            return false;
        };
        match side {
            Side::Long => close > average,
            Side::Short => close < average,
        }
    }

    /// Compares the last two local price extrema with the last two RSI
    /// extrema. `None` when the series is too short to judge.
    pub fn detect_rsi_divergence(&self, bars: &[PriceBar]) -> Option<Divergence> {
        if bars.len() < DIVERGENCE_LOOKBACK * 2 {
            return None;
        }
        let price = closes(bars);
        let rsi_raw = rsi(&price, self.cfg.rsi_period);
        if rsi_raw.iter().all(Option::is_none) {
            return None;
        }
        let rsi: Vec<f64> = rsi_raw.iter().map(|v| v.unwrap_or(NEUTRAL_RSI)).collect();

        let lows_p = local_minima(&price, EXTREMA_ORDER);
        let lows_r = local_minima(&rsi, EXTREMA_ORDER);
        if let (Some(&[p_prev, p_last]), Some(&[r_prev, r_last])) =
            (last_two(&lows_p), last_two(&lows_r))
        {
            if price[p_last] < price[p_prev] && rsi[r_last] > rsi[r_prev] {
                return Some(Divergence::Bullish);
            }
        }

        let highs_p = local_maxima(&price, EXTREMA_ORDER);
        let highs_r = local_maxima(&rsi, EXTREMA_ORDER);
        if let (Some(&[p_prev, p_last]), Some(&[r_prev, r_last])) =
            (last_two(&highs_p), last_two(&highs_r))
        {
            if price[p_last] > price[p_prev] && rsi[r_last] < rsi[r_prev] {
                return Some(Divergence::Bearish);
            }
        }
        Some(Divergence::Absent)
    }

    /// A long-short entry wants bullish divergence on leg 1 or bearish on
    /// leg 2; short-long is the mirror image.
    pub fn rsi_confirmation(
        &self,
        bars1: &[PriceBar],
        bars2: &[PriceBar],
        signal: PairSignal,
    ) -> RsiConfirmation {
        let div1 = self.detect_rsi_divergence(bars1);
        let div2 = self.detect_rsi_divergence(bars2);
        if div1.is_none() && div2.is_none() {
            return RsiConfirmation::InsufficientData;
        }
        let (want1, want2) = match signal {
            PairSignal::LongShort => (Divergence::Bullish, Divergence::Bearish),
            PairSignal::ShortLong => (Divergence::Bearish, Divergence::Bullish),
        };
        if div1 == Some(want1) || div2 == Some(want2) {
            RsiConfirmation::Confirmed
        } else {
            RsiConfirmation::Contradicted
        }
    }

    /// Open interest has to be growing. Fresh longs with price up and fresh
    /// shorts with price down both show up as rising OI, so price direction
    /// does not change the outcome. Without a usable previous sample the
    /// filter cannot be evaluated and passes.
    pub fn oi_filter(&self, oi: OpenInterest) -> bool {
        match (oi.current, oi.previous) {
            (Some(current), Some(previous)) if previous != 0.0 => current > previous,
            _ => true,
        }
    }

    fn leg_oi_ok(&self, leg: &LegData<'_>, side: Side) -> bool {
        let ok = self.oi_filter(leg.open_interest);
        if !ok {
            log::debug!(
                "[SIGNAL] {} OI not rising for {} leg",
                leg.symbol,
                side.as_str()
            );
        }
        ok
    }

    pub fn analyze(&self, sector: &str, leg1: LegData<'_>, leg2: LegData<'_>) -> PairAnalysis {
        let spread = spread_series(leg1.bars, leg2.bars);
        let zscores = zscore_series(&spread, self.cfg.zscore_window);
        let zscore = zscores.last().copied().flatten().unwrap_or(0.0);

        let signal = self.zscore_signal(zscore);
        let exit = self.check_exit(zscore);

        let mut ema_ok = true;
        let mut rsi_ok = true;
        let mut oi_ok = true;
        if let Some(signal) = signal {
            let (side1, side2) = signal.sides();
            if self.cfg.use_ema_filter {
                ema_ok = self.ema_filter(leg1.bars, side1) && self.ema_filter(leg2.bars, side2);
            }
            if self.cfg.use_rsi_filter {
                let confirmation = self.rsi_confirmation(leg1.bars, leg2.bars, signal);
                log::debug!(
                    "[SIGNAL] {}/{} rsi divergence {:?}",
                    leg1.symbol,
                    leg2.symbol,
                    confirmation
                );
                rsi_ok = confirmation.passes();
            }
            // Only the first leg's open interest gates entry.
            if self.cfg.use_oi_filter {
                oi_ok = self.leg_oi_ok(&leg1, side1);
            }
        }

        PairAnalysis {
            sector: sector.to_string(),
            symbol1: leg1.symbol.to_string(),
            symbol2: leg2.symbol.to_string(),
            signal,
            zscore,
            ema_ok,
            rsi_ok,
            oi_ok,
            exit,
            spread: spread.last().copied().flatten(),
        }
    }
}

fn last_two(indices: &[usize]) -> Option<&[usize; 2]> {
    if indices.len() < 2 {
        return None;
    }
    indices[indices.len() - 2..].try_into().ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: i as i64 * 3_600_000,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    /// 25 bars whose leg-1/leg-2 ratio ends with a z-score of about -1.47.
    pub(crate) fn oversold_pair() -> (Vec<PriceBar>, Vec<PriceBar>) {
        let mut closes1: Vec<f64> = (0..24)
            .map(|i| if i % 2 == 0 { 101.0 } else { 99.0 })
            .collect();
        closes1.push(98.3);
        let closes2 = vec![100.0; 25];
        (bars_from_closes(&closes1), bars_from_closes(&closes2))
    }

    fn bullish_divergence_closes() -> Vec<f64> {
        let mut p: Vec<f64> = (0..16)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.5 })
            .collect();
        p.extend([96.0, 92.0, 88.0, 85.0]);
        p.extend([88.0, 91.0, 93.0, 94.0]);
        p.extend([93.5, 92.5, 91.0, 89.0, 87.0, 86.0, 84.5]);
        p.extend([86.0, 88.0, 90.0, 92.0]);
        p
    }

    fn engine() -> SignalEngine {
        SignalEngine::new(StrategyConfig::default())
    }

    fn leg<'a>(symbol: &'a str, bars: &'a [PriceBar]) -> LegData<'a> {
        LegData {
            symbol,
            bars,
            open_interest: OpenInterest::default(),
        }
    }

    #[test]
    fn entry_threshold_is_exclusive_on_both_sides() {
        let engine = engine();
        assert_eq!(engine.zscore_signal(1.2), None);
        assert_eq!(engine.zscore_signal(-1.2), None);
        assert_eq!(engine.zscore_signal(0.5), None);
        assert_eq!(engine.zscore_signal(1.2001), Some(PairSignal::ShortLong));
        assert_eq!(engine.zscore_signal(-1.2001), Some(PairSignal::LongShort));
        assert_eq!(engine.zscore_signal(-5.0), Some(PairSignal::LongShort));
    }

    #[test]
    fn exit_rules_fire_at_target_and_stop_bounds() {
        let engine = engine();
        assert_eq!(engine.check_exit(0.0), Some(ExitReason::TakeProfit));
        assert_eq!(engine.check_exit(0.09), Some(ExitReason::TakeProfit));
        assert_eq!(engine.check_exit(0.1), None);
        assert_eq!(engine.check_exit(3.0), Some(ExitReason::StopLoss));
        assert_eq!(engine.check_exit(-3.0), Some(ExitReason::StopLoss));
        assert_eq!(engine.check_exit(2.99), None);
    }

    #[test]
    fn take_profit_wins_when_both_exit_rules_match() {
        let engine = SignalEngine::new(StrategyConfig {
            exit_tp_z: 2.95,
            ..StrategyConfig::default()
        });
        assert_eq!(engine.check_exit(3.0), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn spread_aligns_to_second_leg_with_forward_then_back_fill() {
        let bars2 = bars_from_closes(&[10.0, 10.0, 10.0, 10.0]);
        // leg 1 is missing the first and third timestamps
        let bars1: Vec<PriceBar> = bars_from_closes(&[0.0, 20.0, 0.0, 30.0])
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, b)| b)
            .collect();
        let spread = spread_series(&bars1, &bars2);
        assert_eq!(spread, vec![Some(2.0), Some(2.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn zscore_is_undefined_until_window_is_full() {
        let spread: Vec<Option<f64>> = (0..5).map(|i| Some(i as f64)).collect();
        let z = zscore_series(&spread, 3);
        assert_eq!(z[0], None);
        assert_eq!(z[1], None);
        // window [0,1,2]: mean 1, sample std 1
        assert!((z[2].unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn oversold_spread_produces_long_short_without_exit() {
        let (bars1, bars2) = oversold_pair();
        let analysis = engine().analyze("L1", leg("AAA", &bars1), leg("BBB", &bars2));
        assert_eq!(analysis.signal, Some(PairSignal::LongShort));
        assert_eq!(analysis.exit, None);
        assert!(analysis.zscore < -1.2 && analysis.zscore > -1.6);
        assert!(analysis.ema_ok && analysis.rsi_ok && analysis.oi_ok);
        assert_eq!(analysis.entry_signal(), Some(PairSignal::LongShort));
        assert!((analysis.spread.unwrap() - 0.983).abs() < 1e-12);
        assert_eq!(analysis.sector, "L1");
    }

    #[test]
    fn flat_spread_collapses_to_zero_and_reads_as_take_profit() {
        // Known false take-profit source: std == 0 gives an undefined z-score.
        let bars = bars_from_closes(&[100.0; 25]);
        let analysis = engine().analyze("L1", leg("AAA", &bars), leg("BBB", &bars));
        assert_eq!(analysis.zscore, 0.0);
        assert_eq!(analysis.signal, None);
        assert_eq!(analysis.exit, Some(ExitReason::TakeProfit));
    }

    #[test]
    fn short_series_degrades_to_neutral() {
        let bars1 = bars_from_closes(&[100.0, 90.0, 80.0]);
        let bars2 = bars_from_closes(&[100.0, 100.0, 100.0]);
        let analysis = engine().analyze("L1", leg("AAA", &bars1), leg("BBB", &bars2));
        assert_eq!(analysis.zscore, 0.0);
        assert_eq!(analysis.signal, None);
        assert_eq!(analysis.spread, Some(0.8));
    }

    #[test]
    fn ema_filter_checks_side_against_trend() {
        let engine = SignalEngine::new(StrategyConfig {
            ema_period: 5,
            ..StrategyConfig::default()
        });
        let rising = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(engine.ema_filter(&rising, Side::Long));
        assert!(!engine.ema_filter(&rising, Side::Short));
        let short = bars_from_closes(&[1.0, 2.0]);
        assert!(!engine.ema_filter(&short, Side::Long));
        assert!(!engine.ema_filter(&short, Side::Short));
    }

    #[test]
    fn divergence_detection_finds_bullish_and_bearish_patterns() {
        let engine = engine();
        let closes = bullish_divergence_closes();
        let bullish = bars_from_closes(&closes);
        assert_eq!(
            engine.detect_rsi_divergence(&bullish),
            Some(Divergence::Bullish)
        );
        let mirrored: Vec<f64> = closes.iter().map(|c| 200.0 - c).collect();
        assert_eq!(
            engine.detect_rsi_divergence(&bars_from_closes(&mirrored)),
            Some(Divergence::Bearish)
        );
        let trend: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(
            engine.detect_rsi_divergence(&bars_from_closes(&trend)),
            Some(Divergence::Absent)
        );
        assert_eq!(
            engine.detect_rsi_divergence(&bars_from_closes(&closes[..19])),
            None
        );
    }

    #[test]
    fn rsi_confirmation_is_three_state() {
        let engine = engine();
        let bullish = bars_from_closes(&bullish_divergence_closes());
        let trend = bars_from_closes(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let short = bars_from_closes(&[100.0; 5]);

        assert_eq!(
            engine.rsi_confirmation(&bullish, &trend, PairSignal::LongShort),
            RsiConfirmation::Confirmed
        );
        assert_eq!(
            engine.rsi_confirmation(&bullish, &trend, PairSignal::ShortLong),
            RsiConfirmation::Contradicted
        );
        assert_eq!(
            engine.rsi_confirmation(&trend, &bullish, PairSignal::ShortLong),
            RsiConfirmation::Confirmed
        );
        assert_eq!(
            engine.rsi_confirmation(&short, &short, PairSignal::LongShort),
            RsiConfirmation::InsufficientData
        );
        assert!(!RsiConfirmation::InsufficientData.passes());
    }

    #[test]
    fn enabled_rsi_filter_without_divergence_blocks_entry() {
        let engine = SignalEngine::new(StrategyConfig {
            use_rsi_filter: true,
            ..StrategyConfig::default()
        });
        let (bars1, bars2) = oversold_pair();
        let analysis = engine.analyze("L1", leg("AAA", &bars1), leg("BBB", &bars2));
        assert_eq!(analysis.signal, Some(PairSignal::LongShort));
        assert!(!analysis.rsi_ok);
        assert_eq!(analysis.entry_signal(), None);
    }

    #[test]
    fn oi_filter_requires_rising_interest_when_history_exists() {
        let engine = engine();
        assert!(engine.oi_filter(OpenInterest {
            current: Some(10.0),
            previous: None
        }));
        assert!(engine.oi_filter(OpenInterest {
            current: Some(10.0),
            previous: Some(0.0)
        }));
        assert!(engine.oi_filter(OpenInterest {
            current: Some(11.0),
            previous: Some(10.0)
        }));
        assert!(!engine.oi_filter(OpenInterest {
            current: Some(9.0),
            previous: Some(10.0)
        }));
    }

    #[test]
    fn disabled_filters_report_true_regardless_of_data() {
        let (bars1, bars2) = oversold_pair();
        let falling_oi = OpenInterest {
            current: Some(1.0),
            previous: Some(2.0),
        };
        let leg1 = LegData {
            symbol: "AAA",
            bars: &bars1,
            open_interest: falling_oi,
        };
        let leg2 = LegData {
            symbol: "BBB",
            bars: &bars2,
            open_interest: falling_oi,
        };
        let analysis = engine().analyze("L1", leg1, leg2);
        assert!(analysis.oi_ok && analysis.ema_ok && analysis.rsi_ok);

        let with_oi = SignalEngine::new(StrategyConfig {
            use_oi_filter: true,
            ..StrategyConfig::default()
        });
        assert!(!with_oi.analyze("L1", leg1, leg2).oi_ok);
    }

    #[test]
    fn oi_filter_only_gates_on_first_leg() {
        let (bars1, bars2) = oversold_pair();
        let engine = SignalEngine::new(StrategyConfig {
            use_oi_filter: true,
            ..StrategyConfig::default()
        });
        let rising = OpenInterest {
            current: Some(110.0),
            previous: Some(100.0),
        };
        let falling = OpenInterest {
            current: Some(90.0),
            previous: Some(100.0),
        };
        let analysis = engine.analyze(
            "L1",
            LegData {
                symbol: "AAA",
                bars: &bars1,
                open_interest: rising,
            },
            LegData {
                symbol: "BBB",
                bars: &bars2,
                open_interest: falling,
            },
        );
        assert_eq!(analysis.signal, Some(PairSignal::LongShort));
        assert!(analysis.oi_ok);

        let analysis = engine.analyze(
            "L1",
            LegData {
                symbol: "AAA",
                bars: &bars1,
                open_interest: falling,
            },
            LegData {
                symbol: "BBB",
                bars: &bars2,
                open_interest: rising,
            },
        );
        assert!(!analysis.oi_ok);
    }
}
