pub mod execution;
pub mod trade_log;
