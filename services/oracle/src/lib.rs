//! # JitFlow Oracles
//!
//! Capped gas-price reads and USD token quotes with feed-staleness handling,
//! plus the fixed per-phase JIT gas table. Both oracles cache behind short
//! TTLs so bursts of candidates in the same block share one RPC read.

pub mod gas;
pub mod jit_gas;
pub mod price;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("no price source for token {0}")]
    NoPriceSource(String),

    #[error("feed rejected: {0}")]
    FeedRejected(String),
}

pub use gas::{GasEstimate, GasOracle};
pub use jit_gas::{gas_cost_usd, JitGasEstimates, JIT_GAS};
pub use price::{PriceOracle, PriceQuote, PriceSource};
