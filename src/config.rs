use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DRY_RUN_EQUITY: f64 = 10_000.0;
const DEFAULT_TIMEFRAME: &str = "1h";
const DEFAULT_INTERVAL_SECS: u64 = 180;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_TRADE_LOG_PATH: &str = "trade_log.csv";
const DEFAULT_LEVERAGE: u32 = 5;
const MAX_LEVERAGE: u32 = 5;
const DEFAULT_RISK_PER_TRADE_PCT: f64 = 1.0;
const DEFAULT_MAX_BASKET_RISK_PCT: f64 = 40.0;
const DEFAULT_MAX_FUNDING_RATE_PCT: f64 = 0.06;
const DEFAULT_TRAILING_STOP_PCT: f64 = 1.5;
const DEFAULT_TRAILING_ACTIVATION_Z: f64 = 0.5;
const DEFAULT_SIZE_DECIMALS: u32 = 6;
/// Largest scale a `Decimal` can carry.
const MAX_SIZE_DECIMALS: u32 = 28;
const DEFAULT_ZSCORE_WINDOW: usize = 20;
const DEFAULT_ENTRY_Z: f64 = 1.2;
const DEFAULT_EXIT_TP_Z: f64 = 0.0;
const DEFAULT_EXIT_SL_Z: f64 = 3.0;
const DEFAULT_EMA_PERIOD: usize = 50;
const DEFAULT_RSI_PERIOD: usize = 14;
const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_FETCH_RETRY_DELAY_MS: u64 = 1_000;
/// Extra bars fetched beyond the z-score window so the EMA has history.
const CANDLE_HISTORY_PADDING: usize = 50;

const DEFAULT_SECTORS_JSON: &str = r#"{
    "L1": ["SOL/USDT:USDT", "AVAX/USDT:USDT", "NEAR/USDT:USDT", "ATOM/USDT:USDT", "INJ/USDT:USDT", "SUI/USDT:USDT"],
    "L2": ["ARB/USDT:USDT", "OP/USDT:USDT", "IMX/USDT:USDT", "STRK/USDT:USDT", "LINK/USDT:USDT", "DOT/USDT:USDT"],
    "L3": ["POL/USDT:USDT", "UNI/USDT:USDT", "AAVE/USDT:USDT", "LDO/USDT:USDT", "CRV/USDT:USDT", "COMP/USDT:USDT"],
    "L4": ["APT/USDT:USDT", "FIL/USDT:USDT", "1INCH/USDT:USDT", "SAND/USDT:USDT", "1000PEPE/USDT:USDT", "WIF/USDT:USDT"]
}"#;

/// A sector entry is either explicit pairs or a flat symbol list.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum SectorSymbols {
    Pairs(Vec<Vec<String>>),
    Symbols(Vec<String>),
}

impl SectorSymbols {
    fn into_pairs(self, sector: &str) -> Result<Vec<PairSpec>> {
        match self {
            SectorSymbols::Pairs(pairs) => pairs
                .into_iter()
                .map(|pair| match pair.as_slice() {
                    [a, b] => Ok(PairSpec::new(a, b)),
                    other => Err(anyhow!(
                        "sector {} has a pair with {} symbols, expected 2",
                        sector,
                        other.len()
                    )),
                })
                .collect(),
            SectorSymbols::Symbols(symbols) => {
                let symbols: Vec<String> = symbols
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                let mut pairs = Vec::new();
                for i in 0..symbols.len() {
                    for j in (i + 1)..symbols.len() {
                        pairs.push(PairSpec::new(&symbols[i], &symbols[j]));
                    }
                }
                Ok(pairs)
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct PairBotYaml {
    dry_run: Option<bool>,
    dry_run_equity: Option<f64>,
    timeframe: Option<String>,
    interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    trade_log_path: Option<String>,
    replay_file: Option<String>,
    leverage: Option<u32>,
    risk_per_trade_pct: Option<f64>,
    max_basket_risk_pct: Option<f64>,
    max_funding_rate_pct: Option<f64>,
    trailing_stop_pct: Option<f64>,
    trailing_activation_z: Option<f64>,
    trailing_anchor: Option<String>,
    order_size_decimals: Option<u32>,
    zscore_window: Option<usize>,
    zscore_entry: Option<f64>,
    zscore_exit_tp: Option<f64>,
    zscore_exit_sl: Option<f64>,
    ema_period: Option<usize>,
    rsi_period: Option<usize>,
    use_ema_filter: Option<bool>,
    use_rsi_filter: Option<bool>,
    use_oi_filter: Option<bool>,
    fetch_max_attempts: Option<u32>,
    fetch_retry_delay_ms: Option<u64>,
    sectors: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSpec {
    pub symbol1: String,
    pub symbol2: String,
}

impl PairSpec {
    pub fn new(symbol1: &str, symbol2: &str) -> Self {
        Self {
            symbol1: symbol1.trim().to_string(),
            symbol2: symbol2.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectorPairs {
    pub sector: String,
    pub pairs: Vec<PairSpec>,
}

/// Which price the trailing-stop distance is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingAnchor {
    Entry,
    Best,
}

impl FromStr for TrailingAnchor {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "entry" => Ok(TrailingAnchor::Entry),
            "best" => Ok(TrailingAnchor::Best),
            other => Err(anyhow!("unknown trailing anchor: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub leverage: u32,
    pub risk_per_trade_pct: f64,
    pub max_basket_risk_pct: f64,
    pub max_funding_rate_pct: f64,
    pub trailing_stop_pct: f64,
    pub trailing_activation_z: f64,
    pub trailing_anchor: TrailingAnchor,
    pub size_decimals: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            leverage: DEFAULT_LEVERAGE,
            risk_per_trade_pct: DEFAULT_RISK_PER_TRADE_PCT,
            max_basket_risk_pct: DEFAULT_MAX_BASKET_RISK_PCT,
            max_funding_rate_pct: DEFAULT_MAX_FUNDING_RATE_PCT,
            trailing_stop_pct: DEFAULT_TRAILING_STOP_PCT,
            trailing_activation_z: DEFAULT_TRAILING_ACTIVATION_Z,
            trailing_anchor: TrailingAnchor::Entry,
            size_decimals: DEFAULT_SIZE_DECIMALS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub zscore_window: usize,
    pub entry_z: f64,
    pub exit_tp_z: f64,
    pub exit_sl_z: f64,
    pub ema_period: usize,
    pub rsi_period: usize,
    pub use_ema_filter: bool,
    pub use_rsi_filter: bool,
    pub use_oi_filter: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            zscore_window: DEFAULT_ZSCORE_WINDOW,
            entry_z: DEFAULT_ENTRY_Z,
            exit_tp_z: DEFAULT_EXIT_TP_Z,
            exit_sl_z: DEFAULT_EXIT_SL_Z,
            ema_period: DEFAULT_EMA_PERIOD,
            rsi_period: DEFAULT_RSI_PERIOD,
            use_ema_filter: false,
            use_rsi_filter: false,
            use_oi_filter: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_FETCH_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairBotConfig {
    pub dry_run: bool,
    pub dry_run_equity: f64,
    pub timeframe: String,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub trade_log_path: Option<String>,
    // Drives the bot from a recorded snapshot file instead of an exchange
    pub replay_file: Option<String>,
    pub risk: RiskConfig,
    pub strategy: StrategyConfig,
    pub retry: RetryPolicy,
    pub sectors: Vec<SectorPairs>,
}

impl Default for PairBotConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            dry_run_equity: DEFAULT_DRY_RUN_EQUITY,
            timeframe: DEFAULT_TIMEFRAME.to_string(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            trade_log_path: Some(DEFAULT_TRADE_LOG_PATH.to_string()),
            replay_file: None,
            risk: RiskConfig::default(),
            strategy: StrategyConfig::default(),
            retry: RetryPolicy::default(),
            sectors: parse_sectors_json(DEFAULT_SECTORS_JSON).unwrap_or_default(),
        }
    }
}

impl PairBotConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRBOT_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let mut cfg = match config_path {
            Some(path) => Self::from_yaml_path(path)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open pairbot config {}", path_ref.display()))?;
        let yaml: PairBotYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse pairbot config {}", path_ref.display()))?;
        Self::from_yaml(yaml)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let yaml: PairBotYaml = if raw.trim().is_empty() {
            PairBotYaml::default()
        } else {
            serde_yaml::from_str(raw).context("failed to parse pairbot config")?
        };
        Self::from_yaml(yaml)
    }

    fn from_yaml(yaml: PairBotYaml) -> Result<Self> {
        let defaults = Self::default();
        let risk_defaults = RiskConfig::default();
        let strategy_defaults = StrategyConfig::default();
        let retry_defaults = RetryPolicy::default();

        let sectors = match yaml.sectors {
            Some(mapping) => sectors_from_yaml(mapping)?,
            None => defaults.sectors,
        };
        let trailing_anchor = match yaml.trailing_anchor {
            Some(raw) => raw.parse()?,
            None => risk_defaults.trailing_anchor,
        };

        let cfg = PairBotConfig {
            dry_run: yaml.dry_run.unwrap_or(defaults.dry_run),
            dry_run_equity: yaml.dry_run_equity.unwrap_or(defaults.dry_run_equity),
            timeframe: yaml.timeframe.unwrap_or(defaults.timeframe),
            interval_secs: yaml.interval_secs.unwrap_or(defaults.interval_secs),
            request_timeout_secs: yaml
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            trade_log_path: yaml.trade_log_path.or(defaults.trade_log_path),
            replay_file: yaml.replay_file,
            risk: RiskConfig {
                leverage: yaml.leverage.unwrap_or(risk_defaults.leverage),
                risk_per_trade_pct: yaml
                    .risk_per_trade_pct
                    .unwrap_or(risk_defaults.risk_per_trade_pct),
                max_basket_risk_pct: yaml
                    .max_basket_risk_pct
                    .unwrap_or(risk_defaults.max_basket_risk_pct),
                max_funding_rate_pct: yaml
                    .max_funding_rate_pct
                    .unwrap_or(risk_defaults.max_funding_rate_pct),
                trailing_stop_pct: yaml
                    .trailing_stop_pct
                    .unwrap_or(risk_defaults.trailing_stop_pct),
                trailing_activation_z: yaml
                    .trailing_activation_z
                    .unwrap_or(risk_defaults.trailing_activation_z),
                trailing_anchor,
                size_decimals: yaml
                    .order_size_decimals
                    .unwrap_or(risk_defaults.size_decimals),
            },
            strategy: StrategyConfig {
                zscore_window: yaml
                    .zscore_window
                    .unwrap_or(strategy_defaults.zscore_window),
                entry_z: yaml.zscore_entry.unwrap_or(strategy_defaults.entry_z),
                exit_tp_z: yaml.zscore_exit_tp.unwrap_or(strategy_defaults.exit_tp_z),
                exit_sl_z: yaml.zscore_exit_sl.unwrap_or(strategy_defaults.exit_sl_z),
                ema_period: yaml.ema_period.unwrap_or(strategy_defaults.ema_period),
                rsi_period: yaml.rsi_period.unwrap_or(strategy_defaults.rsi_period),
                use_ema_filter: yaml.use_ema_filter.unwrap_or(false),
                use_rsi_filter: yaml.use_rsi_filter.unwrap_or(false),
                use_oi_filter: yaml.use_oi_filter.unwrap_or(false),
            },
            retry: RetryPolicy {
                max_attempts: yaml
                    .fetch_max_attempts
                    .unwrap_or(retry_defaults.max_attempts),
                delay: yaml
                    .fetch_retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.delay),
            },
            sectors,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_flag("DRY_RUN") {
            self.dry_run = value;
        }
        if let Some(value) = env_parse("DRY_RUN_EQUITY") {
            self.dry_run_equity = value;
        }
        if let Ok(value) = env::var("TIMEFRAME") {
            if !value.trim().is_empty() {
                self.timeframe = value.trim().to_string();
            }
        }
        if let Some(value) = env_parse("RUN_INTERVAL_SEC") {
            self.interval_secs = value;
        }
        if let Some(value) = env_parse("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = value;
        }
        if let Ok(value) = env::var("TRADE_LOG_PATH") {
            // An empty value disables the trade log
            self.trade_log_path = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Ok(value) = env::var("REPLAY_FILE") {
            if !value.trim().is_empty() {
                self.replay_file = Some(value);
            }
        }

        if let Some(value) = env_parse("LEVERAGE") {
            self.risk.leverage = value;
        }
        if let Some(value) = env_parse("RISK_PER_TRADE_PCT") {
            self.risk.risk_per_trade_pct = value;
        }
        if let Some(value) = env_parse("MAX_BASKET_RISK_PCT") {
            self.risk.max_basket_risk_pct = value;
        }
        if let Some(value) = env_parse("MAX_FUNDING_RATE_PCT") {
            self.risk.max_funding_rate_pct = value;
        }
        if let Some(value) = env_parse("TRAILING_STOP_PCT") {
            self.risk.trailing_stop_pct = value;
        }
        if let Some(value) = env_parse("ZSCORE_TRAILING_ACTIVATION") {
            self.risk.trailing_activation_z = value;
        }
        if let Ok(value) = env::var("TRAILING_ANCHOR") {
            if !value.trim().is_empty() {
                self.risk.trailing_anchor = value.parse()?;
            }
        }
        if let Some(value) = env_parse("ORDER_SIZE_DECIMALS") {
            self.risk.size_decimals = value;
        }

        if let Some(value) = env_parse("ZSCORE_WINDOW") {
            self.strategy.zscore_window = value;
        }
        if let Some(value) = env_parse("ZSCORE_ENTRY_THRESHOLD") {
            self.strategy.entry_z = value;
        }
        if let Some(value) = env_parse("ZSCORE_EXIT_TP") {
            self.strategy.exit_tp_z = value;
        }
        if let Some(value) = env_parse("ZSCORE_EXIT_SL") {
            self.strategy.exit_sl_z = value;
        }
        if let Some(value) = env_parse("EMA_PERIOD") {
            self.strategy.ema_period = value;
        }
        if let Some(value) = env_parse("RSI_PERIOD") {
            self.strategy.rsi_period = value;
        }
        if let Some(value) = env_flag("USE_EMA_FILTER") {
            self.strategy.use_ema_filter = value;
        }
        if let Some(value) = env_flag("USE_RSI_FILTER") {
            self.strategy.use_rsi_filter = value;
        }
        if let Some(value) = env_flag("USE_OI_FILTER") {
            self.strategy.use_oi_filter = value;
        }

        if let Some(value) = env_parse("FETCH_MAX_ATTEMPTS") {
            self.retry.max_attempts = value;
        }
        if let Some(value) = env_parse("FETCH_RETRY_DELAY_MS") {
            self.retry.delay = Duration::from_millis(value);
        }

        if let Ok(raw) = env::var("PAIRS_JSON") {
            if !raw.trim().is_empty() {
                self.sectors = parse_sectors_json(&raw).context("invalid PAIRS_JSON")?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.risk.leverage < 1 || self.risk.leverage > MAX_LEVERAGE {
            bail!(
                "leverage {} outside allowed range 1..={}",
                self.risk.leverage,
                MAX_LEVERAGE
            );
        }
        if self.strategy.zscore_window < 2 {
            bail!("zscore_window must be at least 2");
        }
        if self.strategy.entry_z <= 0.0 || self.strategy.exit_sl_z <= 0.0 {
            bail!("z-score thresholds must be positive");
        }
        if self.strategy.exit_sl_z <= self.strategy.entry_z {
            bail!(
                "stop-loss z {} must exceed entry z {}",
                self.strategy.exit_sl_z,
                self.strategy.entry_z
            );
        }
        if self.risk.risk_per_trade_pct <= 0.0 || self.risk.max_basket_risk_pct <= 0.0 {
            bail!("risk percentages must be positive");
        }
        if self.risk.size_decimals > MAX_SIZE_DECIMALS {
            bail!(
                "order_size_decimals {} exceeds {}",
                self.risk.size_decimals,
                MAX_SIZE_DECIMALS
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("fetch_max_attempts must be at least 1");
        }
        if self.interval_secs == 0 {
            bail!("interval_secs must be positive");
        }
        Ok(())
    }

    /// Bars requested per symbol each cycle.
    pub fn candle_limit(&self) -> usize {
        self.strategy.zscore_window + CANDLE_HISTORY_PADDING
    }

    pub fn pair_count(&self) -> usize {
        self.sectors.iter().map(|s| s.pairs.len()).sum()
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("[CONFIG] ignoring unparsable {}={}", name, value);
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn sectors_from_yaml(mapping: serde_yaml::Mapping) -> Result<Vec<SectorPairs>> {
    let mut sectors = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let sector = key
            .as_str()
            .ok_or_else(|| anyhow!("sector names must be strings"))?
            .to_string();
        let symbols: SectorSymbols = serde_yaml::from_value(value)
            .with_context(|| format!("invalid symbol list for sector {}", sector))?;
        let pairs = symbols.into_pairs(&sector)?;
        sectors.push(SectorPairs { sector, pairs });
    }
    Ok(sectors)
}

/// Parses `{"SECTOR": [...]}` keeping the sectors in the order written.
pub fn parse_sectors_json(raw: &str) -> Result<Vec<SectorPairs>> {
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(raw).context("sector universe must be a JSON object")?;
    let mut sectors = Vec::with_capacity(map.len());
    for (sector, value) in map {
        let symbols: SectorSymbols = serde_json::from_value(value)
            .with_context(|| format!("invalid symbol list for sector {}", sector))?;
        let pairs = symbols.into_pairs(&sector)?;
        sectors.push(SectorPairs { sector, pairs });
    }
    Ok(sectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_universe_expands_every_combination() {
        let cfg = PairBotConfig::default();
        let names: Vec<&str> = cfg.sectors.iter().map(|s| s.sector.as_str()).collect();
        assert_eq!(names, vec!["L1", "L2", "L3", "L4"]);
        // six symbols per sector -> C(6, 2) pairs
        assert!(cfg.sectors.iter().all(|s| s.pairs.len() == 15));
        assert_eq!(cfg.pair_count(), 60);
    }

    #[test]
    fn sectors_json_supports_all_three_shapes_in_order() {
        let raw = r#"{
            "ZED": ["A", "B"],
            "ALPHA": [["C", "D"], ["E", "F"]],
            "MID": ["G", "H", "I"],
            "SOLO": ["J"]
        }"#;
        let sectors = parse_sectors_json(raw).unwrap();
        let names: Vec<&str> = sectors.iter().map(|s| s.sector.as_str()).collect();
        assert_eq!(names, vec!["ZED", "ALPHA", "MID", "SOLO"]);
        assert_eq!(sectors[0].pairs, vec![PairSpec::new("A", "B")]);
        assert_eq!(
            sectors[1].pairs,
            vec![PairSpec::new("C", "D"), PairSpec::new("E", "F")]
        );
        assert_eq!(
            sectors[2].pairs,
            vec![
                PairSpec::new("G", "H"),
                PairSpec::new("G", "I"),
                PairSpec::new("H", "I")
            ]
        );
        assert!(sectors[3].pairs.is_empty());
    }

    #[test]
    fn explicit_pair_with_wrong_arity_is_rejected() {
        let err = parse_sectors_json(r#"{"L1": [["A", "B", "C"]]}"#).unwrap_err();
        assert!(err.to_string().contains("L1"));
    }

    #[test]
    fn yaml_overrides_defaults_and_keeps_sector_order() {
        let raw = r#"
dry_run: false
leverage: 3
zscore_entry: 1.5
zscore_window: 30
use_rsi_filter: true
trailing_anchor: best
fetch_retry_delay_ms: 250
sectors:
  DEFI: ["UNI", "AAVE"]
  AI: [["FET", "AGIX"]]
"#;
        let cfg = PairBotConfig::from_yaml_str(raw).unwrap();
        assert!(!cfg.dry_run);
        assert_eq!(cfg.risk.leverage, 3);
        assert_eq!(cfg.risk.trailing_anchor, TrailingAnchor::Best);
        assert_eq!(cfg.strategy.entry_z, 1.5);
        assert_eq!(cfg.strategy.zscore_window, 30);
        assert!(cfg.strategy.use_rsi_filter);
        assert!(!cfg.strategy.use_ema_filter);
        assert_eq!(cfg.retry.delay, Duration::from_millis(250));
        assert_eq!(cfg.candle_limit(), 80);
        assert_eq!(cfg.sectors[0].sector, "DEFI");
        assert_eq!(cfg.sectors[1].pairs, vec![PairSpec::new("FET", "AGIX")]);
    }

    #[test]
    fn yaml_file_is_loaded_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "interval_secs: 60\nmax_basket_risk_pct: 25.0").unwrap();
        let cfg = PairBotConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(cfg.interval_secs, 60);
        assert_eq!(cfg.risk.max_basket_risk_pct, 25.0);
        assert_eq!(cfg.strategy.entry_z, 1.2);
    }

    #[test]
    fn leverage_above_cap_is_rejected() {
        let err = PairBotConfig::from_yaml_str("leverage: 10").unwrap_err();
        assert!(err.to_string().contains("leverage"));
    }

    #[test]
    fn stop_loss_must_exceed_entry() {
        assert!(PairBotConfig::from_yaml_str("zscore_entry: 3.5").is_err());
    }

    #[test]
    fn size_decimals_beyond_decimal_scale_are_rejected() {
        assert!(PairBotConfig::from_yaml_str("order_size_decimals: 28").is_ok());
        let err = PairBotConfig::from_yaml_str("order_size_decimals: 30").unwrap_err();
        assert!(err.to_string().contains("order_size_decimals"));
    }

    #[test]
    fn unknown_trailing_anchor_is_rejected() {
        assert!(PairBotConfig::from_yaml_str("trailing_anchor: peak").is_err());
    }
}
