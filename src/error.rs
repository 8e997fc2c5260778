use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transient gateway error: {0}")]
    Transient(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("gateway not connected")]
    NotConnected,
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Timeouts and transient failures are worth another attempt; everything
    /// else fails the call immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Transient(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        let text = self.to_string();
        text.contains("429") || text.contains("Too Many Requests")
    }
}

#[derive(Debug, Error)]
pub enum PairTradeError {
    /// Market data could not be obtained; the pair is skipped this cycle.
    #[error("data unavailable for {symbol}: {source}")]
    DataUnavailable {
        symbol: String,
        #[source]
        source: GatewayError,
    },
    /// An order or leverage call failed; registry state is left unchanged.
    #[error("execution failed for {symbol}: {source}")]
    Execution {
        symbol: String,
        #[source]
        source: GatewayError,
    },
    /// Account state needed by every risk check is missing; the cycle aborts.
    #[error("cycle precondition failed: {0}")]
    Precondition(#[source] GatewayError),
}

impl PairTradeError {
    pub fn data(symbol: &str, source: GatewayError) -> Self {
        PairTradeError::DataUnavailable {
            symbol: symbol.to_string(),
            source,
        }
    }

    pub fn execution(symbol: &str, source: GatewayError) -> Self {
        PairTradeError::Execution {
            symbol: symbol.to_string(),
            source,
        }
    }
}
