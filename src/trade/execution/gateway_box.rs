use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PairBotConfig;
use crate::error::GatewayError;
use crate::ports::market_gateway::{ExchangePosition, MarketGateway, PriceBar, Side, Ticker};

/// Wraps a concrete gateway with request timeouts, rate-limit reporting and
/// dry-run order suppression. Calls made after `close` fail with
/// `NotConnected` until the next `connect`.
pub struct GatewayBox {
    inner: Arc<dyn MarketGateway>,
    timeout: Duration,
    dry_run: bool,
    dry_run_equity: Decimal,
    closed: AtomicBool,
}

impl GatewayBox {
    pub fn new(inner: Arc<dyn MarketGateway>, cfg: &PairBotConfig) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(cfg.request_timeout_secs),
            dry_run: cfg.dry_run,
            dry_run_equity: Decimal::from_f64(cfg.dry_run_equity).unwrap_or(Decimal::ZERO),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn report_rate_limit(&self, operation: &str, detail: &str, err: &GatewayError) {
        if err.is_rate_limited() {
            log::warn!(
                "[RATE_LIMIT] {} ({}) hit exchange rate limit: {}",
                operation,
                detail,
                err
            );
        }
    }

    async fn guarded<T, F>(&self, operation: &str, detail: &str, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>> + Send,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::NotConnected);
        }
        self.timed(operation, detail, fut).await
    }

    async fn timed<T, F>(&self, operation: &str, detail: &str, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>> + Send,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(format!(
                "{} ({}) exceeded {:?}",
                operation, detail, self.timeout
            ))),
        };
        if let Err(ref err) = result {
            self.report_rate_limit(operation, detail, err);
        }
        result
    }
}

#[async_trait]
impl MarketGateway for GatewayBox {
    async fn connect(&self) -> Result<(), GatewayError> {
        self.closed.store(false, Ordering::SeqCst);
        self.timed("connect", "gateway", self.inner.connect())
            .await
    }

    async fn close(&self) -> Result<(), GatewayError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.timed("close", "gateway", self.inner.close()).await
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<PriceBar>, GatewayError> {
        self.guarded(
            "fetch_candles",
            &format!("{} | {} x{}", symbol, timeframe, limit),
            self.inner.fetch_candles(symbol, timeframe, limit),
        )
        .await
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Option<f64>, GatewayError> {
        self.guarded(
            "fetch_open_interest",
            symbol,
            self.inner.fetch_open_interest(symbol),
        )
        .await
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Option<f64>, GatewayError> {
        self.guarded(
            "fetch_funding_rate",
            symbol,
            self.inner.fetch_funding_rate(symbol),
        )
        .await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        self.guarded("fetch_ticker", symbol, self.inner.fetch_ticker(symbol))
            .await
    }

    async fn fetch_equity(&self) -> Result<Decimal, GatewayError> {
        if self.dry_run {
            return Ok(self.dry_run_equity);
        }
        self.guarded("fetch_equity", "account", self.inner.fetch_equity())
            .await
    }

    async fn fetch_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        if self.dry_run {
            return Ok(Vec::new());
        }
        self.guarded(
            "fetch_open_positions",
            "account",
            self.inner.fetch_open_positions(),
        )
        .await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        if self.dry_run {
            log::info!("[DRY_RUN] set_leverage {} x{}", symbol, leverage);
            return Ok(());
        }
        self.guarded(
            "set_leverage",
            &format!("{} | leverage={}", symbol, leverage),
            self.inner.set_leverage(symbol, leverage),
        )
        .await
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        if self.dry_run {
            log::info!(
                "[DRY_RUN] market order {} {} {}",
                side.as_str(),
                amount,
                symbol
            );
            return Ok(());
        }
        self.guarded(
            "place_market_order",
            &format!("{} | {} {}", symbol, side.as_str(), amount),
            self.inner.place_market_order(symbol, side, amount),
        )
        .await
    }

    async fn close_position(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<(), GatewayError> {
        if self.dry_run {
            log::info!(
                "[DRY_RUN] close {} position {} {}",
                side.as_str(),
                amount,
                symbol
            );
            return Ok(());
        }
        self.guarded(
            "close_position",
            &format!("{} | {} {}", symbol, side.as_str(), amount),
            self.inner.close_position(symbol, side, amount),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct StubGateway {
        orders: AtomicUsize,
        closes: AtomicUsize,
        stall: bool,
    }

    #[async_trait]
    impl MarketGateway for StubGateway {
        async fn close(&self) -> Result<(), GatewayError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: &str,
            _limit: usize,
        ) -> Result<Vec<PriceBar>, GatewayError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(Vec::new())
        }

        async fn fetch_open_interest(&self, _symbol: &str) -> Result<Option<f64>, GatewayError> {
            Ok(None)
        }

        async fn fetch_funding_rate(&self, _symbol: &str) -> Result<Option<f64>, GatewayError> {
            Err(GatewayError::Transient("HTTP 429 Too Many Requests".into()))
        }

        async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
            Ok(Ticker {
                symbol: symbol.to_string(),
                last_price: dec!(1),
            })
        }

        async fn fetch_equity(&self) -> Result<Decimal, GatewayError> {
            Ok(dec!(123))
        }

        async fn fetch_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
            Ok(vec![ExchangePosition {
                symbol: "AAA".to_string(),
                side: Side::Long,
                contracts: dec!(1),
                mark_price: dec!(1),
                contract_size: dec!(1),
            }])
        }

        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn place_market_order(
            &self,
            _symbol: &str,
            _side: Side,
            _amount: Decimal,
        ) -> Result<(), GatewayError> {
            self.orders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close_position(
            &self,
            _symbol: &str,
            _side: Side,
            _amount: Decimal,
        ) -> Result<(), GatewayError> {
            self.orders.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn boxed(stub: Arc<StubGateway>, dry_run: bool) -> GatewayBox {
        let cfg = PairBotConfig {
            dry_run,
            dry_run_equity: 5_000.0,
            ..PairBotConfig::default()
        };
        GatewayBox::new(stub, &cfg)
    }

    #[tokio::test]
    async fn dry_run_suppresses_orders_and_fakes_account() {
        let stub = Arc::new(StubGateway::default());
        let gateway = boxed(stub.clone(), true);
        gateway
            .place_market_order("AAA", Side::Long, dec!(1))
            .await
            .unwrap();
        gateway
            .close_position("AAA", Side::Long, dec!(1))
            .await
            .unwrap();
        gateway.set_leverage("AAA", 5).await.unwrap();
        assert_eq!(stub.orders.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.fetch_equity().await.unwrap(), dec!(5000));
        assert!(gateway.fetch_open_positions().await.unwrap().is_empty());
        // market data still flows through
        assert_eq!(
            gateway.fetch_ticker("AAA").await.unwrap().last_price,
            dec!(1)
        );
    }

    #[tokio::test]
    async fn live_mode_forwards_everything() {
        let stub = Arc::new(StubGateway::default());
        let gateway = boxed(stub.clone(), false);
        gateway
            .place_market_order("AAA", Side::Short, dec!(2))
            .await
            .unwrap();
        assert_eq!(stub.orders.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.fetch_equity().await.unwrap(), dec!(123));
        assert_eq!(gateway.fetch_open_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slow_calls_become_timeouts() {
        let stub = Arc::new(StubGateway {
            stall: true,
            ..StubGateway::default()
        });
        let gateway = boxed(stub, false).with_timeout(Duration::from_millis(20));
        let err = gateway.fetch_candles("AAA", "1h", 70).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn inner_errors_pass_through_unchanged() {
        let gateway = boxed(Arc::new(StubGateway::default()), false);
        let err = gateway.fetch_funding_rate("AAA").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(matches!(err, GatewayError::Transient(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let stub = Arc::new(StubGateway::default());
        let gateway = boxed(stub.clone(), true);
        gateway.close().await.unwrap();
        gateway.close().await.unwrap();
        assert_eq!(stub.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn calls_after_close_fail_until_reconnect() {
        let stub = Arc::new(StubGateway::default());
        let gateway = boxed(stub.clone(), false);
        gateway.close().await.unwrap();
        let err = gateway.fetch_ticker("AAA").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected));
        assert!(gateway
            .place_market_order("AAA", Side::Long, dec!(1))
            .await
            .is_err());
        assert_eq!(stub.orders.load(Ordering::SeqCst), 0);

        gateway.connect().await.unwrap();
        assert!(gateway.fetch_ticker("AAA").await.is_ok());
    }
}
