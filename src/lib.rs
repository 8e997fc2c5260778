// src/lib.rs
pub mod ports {
    pub mod market_gateway;
    pub mod replay_gateway;
}
pub mod config;
pub mod error;
pub mod indicators;
pub mod pairtrade;
pub mod retry;
pub mod risk;
pub mod signal;
pub mod trade;
