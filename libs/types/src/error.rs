//! Error taxonomy and machine-stable drop reasons.
//!
//! Component boundaries convert their local errors into `JitError`; only the
//! fatal categories (`Config`, `Safety`, `Invariant`) propagate to the
//! top-level supervisor. Everything else becomes an observable reason code.

use thiserror::Error;

/// Machine-stable reason code attached to every dropped candidate and failed
/// stage. The string form is the metrics label and the structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    RawTxUnavailable,
    NotUniswapV3,
    UnsupportedMethod,
    PoolNotMonitored,
    AmountBelowThreshold,
    AlreadyIncluded,
    Replaced,
    TxNotFound,
    Duplicate,
    PoolDisabled,
    BelowProfitFloor,
    ZeroLiquidity,
    GasCapExceeded,
    ForkRevert,
    SlippageExceeded,
    DeadlineMiss,
    RpcUnavailable,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::RawTxUnavailable => "raw_tx_unavailable",
            DropReason::NotUniswapV3 => "not_uniswap_v3",
            DropReason::UnsupportedMethod => "unsupported_method",
            DropReason::PoolNotMonitored => "pool_not_monitored",
            DropReason::AmountBelowThreshold => "amount_below_threshold",
            DropReason::AlreadyIncluded => "already_included",
            DropReason::Replaced => "replaced",
            DropReason::TxNotFound => "tx_not_found",
            DropReason::Duplicate => "duplicate",
            DropReason::PoolDisabled => "pool_disabled",
            DropReason::BelowProfitFloor => "below_profit_floor",
            DropReason::ZeroLiquidity => "zero_liquidity",
            DropReason::GasCapExceeded => "gas_cap_exceeded",
            DropReason::ForkRevert => "fork_revert",
            DropReason::SlippageExceeded => "slippage_exceeded",
            DropReason::DeadlineMiss => "deadline_miss",
            DropReason::RpcUnavailable => "rpc_unavailable",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable short code plus free-text detail, carried on failed opportunities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reason {
    pub code: DropReason,
    pub detail: String,
}

impl Reason {
    pub fn new(code: DropReason, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// Top-level error taxonomy.
#[derive(Error, Debug)]
pub enum JitError {
    /// Fatal at startup: missing keys, malformed addresses, live mode
    /// without acknowledgment.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transient infrastructure failure; retried within bounds, then
    /// surfaced as a candidate drop.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Per-candidate decode failure; never retried.
    #[error("decode failure: {reason}")]
    Decode { reason: Reason },

    /// Per-candidate evaluation failure. `pool_isolable` marks causes that
    /// count against the pool's health.
    #[error("evaluation failure: {reason}")]
    Evaluation { reason: Reason, pool_isolable: bool },

    /// Per-relay submission failure, aggregated across relays.
    #[error("relay error: {0}")]
    Relay(String),

    /// Fatal: a safety gate would have been bypassed.
    #[error("safety violation: {0}")]
    Safety(String),

    /// Fatal and loud: indicates a bug, must abort.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl JitError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JitError::Config(_) | JitError::Safety(_) | JitError::Invariant(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(DropReason::RawTxUnavailable.as_str(), "raw_tx_unavailable");
        assert_eq!(DropReason::AmountBelowThreshold.as_str(), "amount_below_threshold");
        assert_eq!(DropReason::DeadlineMiss.as_str(), "deadline_miss");
    }

    #[test]
    fn only_config_safety_invariant_are_fatal() {
        assert!(JitError::Config("x".into()).is_fatal());
        assert!(JitError::Safety("x".into()).is_fatal());
        assert!(JitError::Invariant("x".into()).is_fatal());
        assert!(!JitError::Rpc("x".into()).is_fatal());
        assert!(!JitError::Relay("x".into()).is_fatal());
    }
}
