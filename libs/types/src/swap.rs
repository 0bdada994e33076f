//! Decoded pending swaps.

use ethers::types::{Address, Bytes, H256, I256, U256};
use ethers::utils::keccak256;
use rust_decimal::Decimal;

use crate::pool::{FeeTier, SwapDirection};

/// A router or pool call decoded down to the swap that matters.
///
/// One variant per supported entry point; the evaluator dispatches on this
/// in a single match site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedCall {
    ExactInputSingle {
        token_in: Address,
        token_out: Address,
        fee: u32,
        recipient: Address,
        amount_in: U256,
        amount_out_minimum: U256,
        sqrt_price_limit_x96: U256,
    },
    /// Path-encoded multi-hop swap; only the first hop is carried.
    ExactInput {
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
        amount_out_minimum: U256,
        hops: usize,
    },
    /// Router multicall wrapping a supported swap.
    Multicall { inner: Box<DecodedCall> },
    /// Direct pool `swap` call. Positive `amount_specified` is exact-input,
    /// negative is exact-output; the absolute value is scored as amount-in.
    DirectPoolSwap {
        pool: Address,
        recipient: Address,
        zero_for_one: bool,
        amount_specified: I256,
        sqrt_price_limit_x96: U256,
    },
}

impl DecodedCall {
    /// Human method tag, `multicall→<inner>` for wrapped calls.
    pub fn method(&self) -> String {
        match self {
            DecodedCall::ExactInputSingle { .. } => "exactInputSingle".to_string(),
            DecodedCall::ExactInput { .. } => "exactInput".to_string(),
            DecodedCall::Multicall { inner } => format!("multicall→{}", inner.method()),
            DecodedCall::DirectPoolSwap { .. } => "swap".to_string(),
        }
    }

    /// The innermost swap, unwrapping multicall layers.
    pub fn innermost(&self) -> &DecodedCall {
        match self {
            DecodedCall::Multicall { inner } => inner.innermost(),
            other => other,
        }
    }
}

/// A pending victim swap that decoded against a monitored pool.
#[derive(Debug, Clone)]
pub struct PendingSwap {
    /// Stable identity: keccak(tx hash ‖ seen-at nanos).
    pub candidate_id: H256,
    pub tx_hash: H256,
    /// Canonical signed encoding. Empty iff acquisition failed and
    /// reconstruction is disabled; the relay path refuses such candidates.
    pub raw_tx: Bytes,
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub min_amount_out: Option<U256>,
    pub fee_tier: FeeTier,
    pub direction: SwapDirection,
    pub estimated_usd: Decimal,
    /// Block height when the candidate was seen pending.
    pub seen_block: u64,
    pub decoded: DecodedCall,
}

impl PendingSwap {
    pub fn candidate_id_for(tx_hash: H256, seen_at_nanos: u128) -> H256 {
        let mut buf = [0u8; 48];
        buf[..32].copy_from_slice(tx_hash.as_bytes());
        buf[32..].copy_from_slice(&seen_at_nanos.to_be_bytes());
        H256::from(keccak256(buf))
    }

    /// First block this swap could land in, which is the JIT target block.
    pub fn target_block(&self) -> u64 {
        self.seen_block + 1
    }

    pub fn has_raw_tx(&self) -> bool {
        !self.raw_tx.is_empty()
    }

    /// Amount-in scaled to a decimal string with the token's full precision,
    /// e.g. 1_000_000_000 at 6 decimals renders as "1000.000000".
    pub fn amount_in_human(&self, decimals: u8) -> String {
        let raw = self.amount_in.to_string();
        let decimals = decimals as usize;
        if decimals == 0 {
            return raw;
        }
        if raw.len() <= decimals {
            format!("0.{:0>width$}", raw, width = decimals)
        } else {
            let (int_part, frac_part) = raw.split_at(raw.len() - decimals);
            format!("{int_part}.{frac_part}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_swap(amount_in: U256) -> PendingSwap {
        PendingSwap {
            candidate_id: H256::zero(),
            tx_hash: H256::repeat_byte(0xab),
            raw_tx: Bytes::new(),
            pool: Address::repeat_byte(0x11),
            token_in: Address::repeat_byte(0x01),
            token_out: Address::repeat_byte(0x02),
            amount_in,
            min_amount_out: None,
            fee_tier: FeeTier::Low,
            direction: SwapDirection::Token0ToToken1,
            estimated_usd: dec!(1000),
            seen_block: 100,
            decoded: DecodedCall::ExactInputSingle {
                token_in: Address::repeat_byte(0x01),
                token_out: Address::repeat_byte(0x02),
                fee: 500,
                recipient: Address::zero(),
                amount_in,
                amount_out_minimum: U256::zero(),
                sqrt_price_limit_x96: U256::zero(),
            },
        }
    }

    #[test]
    fn candidate_id_is_stable_and_distinct() {
        let hash = H256::repeat_byte(0xab);
        let a = PendingSwap::candidate_id_for(hash, 1);
        let b = PendingSwap::candidate_id_for(hash, 1);
        let c = PendingSwap::candidate_id_for(hash, 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn amount_in_human_renders_full_precision() {
        let swap = sample_swap(U256::from(1_000_000_000u64));
        assert_eq!(swap.amount_in_human(6), "1000.000000");

        let dust = sample_swap(U256::from(42u64));
        assert_eq!(dust.amount_in_human(6), "0.000042");

        let whole = sample_swap(U256::from(7u64));
        assert_eq!(whole.amount_in_human(0), "7");
    }

    #[test]
    fn multicall_method_tags_inner_call() {
        let inner = DecodedCall::ExactInput {
            token_in: Address::zero(),
            token_out: Address::zero(),
            fee: 500,
            amount_in: U256::one(),
            amount_out_minimum: U256::zero(),
            hops: 2,
        };
        let call = DecodedCall::Multicall {
            inner: Box::new(inner),
        };
        assert_eq!(call.method(), "multicall→exactInput");
        assert!(matches!(call.innermost(), DecodedCall::ExactInput { .. }));
    }

    #[test]
    fn target_block_is_next_block() {
        let swap = sample_swap(U256::one());
        assert_eq!(swap.target_block(), 101);
    }
}
