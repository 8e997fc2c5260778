use anyhow::{anyhow, Context};
use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use pairbot::config::PairBotConfig;
use pairbot::pairtrade::PairTradeEngine;
use std::env;
use std::io::Write;
use std::str::FromStr;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "0".to_string())
        .parse::<i32>()
        .context("invalid TIMEZONE_OFFSET")?;
    let offset = FixedOffset::east_opt(offset_seconds)
        .ok_or_else(|| anyhow!("TIMEZONE_OFFSET out of range: {}", offset_seconds))?;
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    log::info!("Starting pairbot {}...", env!("CARGO_PKG_VERSION"));
    let cfg = PairBotConfig::from_env_or_yaml().context("invalid pairbot config")?;
    let mut engine = PairTradeEngine::new(cfg).context("failed to initialize pair trade engine")?;

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    };
    engine.run(shutdown).await?;
    log::info!("pairbot stopped");
    Ok(())
}
