use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Open,
    Close,
}

/// One row of the trade log. Column order follows field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: String,
    pub action: TradeAction,
    pub sector: String,
    pub symbol1: String,
    pub symbol2: String,
    pub side1: String,
    pub side2: String,
    pub amount1: f64,
    pub amount2: f64,
    pub price1: f64,
    pub price2: f64,
    pub zscore: f64,
    pub reason: String,
}

impl TradeRecord {
    pub fn now(action: TradeAction, sector: &str, symbol1: &str, symbol2: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            action,
            sector: sector.to_string(),
            symbol1: symbol1.to_string(),
            symbol2: symbol2.to_string(),
            side1: String::new(),
            side2: String::new(),
            amount1: 0.0,
            amount2: 0.0,
            price1: 0.0,
            price2: 0.0,
            zscore: 0.0,
            reason: String::new(),
        }
    }
}

/// Append-only CSV trade log; the header is written when the file is created.
#[derive(Debug, Clone)]
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        let file_exists = self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open trade log {}", self.path.display()))?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);
        wtr.serialize(record)
            .context("failed to serialize trade record")?;
        wtr.flush().context("failed to flush trade log")?;

        log::info!(
            "Trade logged: {:?} {} {}/{}",
            record.action,
            record.sector,
            record.symbol1,
            record.symbol2
        );
        Ok(())
    }
}
