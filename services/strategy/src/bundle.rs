//! Bundle assembly: encode and sign the JIT position transactions around
//! the victim's raw bytes.
//!
//! The signer key lives here and nowhere else. Ordering is a
//! construction-time invariant: the only way to build an enhanced bundle
//! is `[mint, victim, burn/collect]` with the victim at index 1.

use std::sync::Arc;

use ethers::abi::{parse_abi, Abi, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Eip1559TransactionRequest, H256, I256, U256,
};
use ethers::utils::keccak256;
use jitflow_config::JitConfig;
use jitflow_types::{
    Bundle, BundleKind, BundleSlot, JitError, JitOpportunity, DEFAULT_BUNDLE_WINDOW,
};
use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::metrics as telemetry;

/// Fixed per-phase gas limits for the signer transactions.
pub const MINT_GAS_LIMIT: u64 = 800_000;
pub const BURN_GAS_LIMIT: u64 = 600_000;
const FAILSAFE_GAS_LIMIT: u64 = 21_000;

/// Base-fee headroom: `max_fee = 1.3·base + priority`.
const BASE_FEE_NUM: u64 = 13;
const BASE_FEE_DEN: u64 = 10;

static EXECUTOR_ABI: Lazy<Abi> = Lazy::new(|| {
    parse_abi(&[
        "function mintJitPosition(address pool, int24 tickLower, int24 tickUpper, uint128 liquidity, uint256 amount0Max, uint256 amount1Max, uint8 flashSource)",
        "function burnAndCollect(address pool, int24 tickLower, int24 tickUpper, uint128 liquidity)",
    ])
    .expect("executor abi parses")
});

pub struct BundleAssembler {
    provider: Arc<Provider<Http>>,
    signer: LocalWallet,
    executor: Address,
    /// Index into the configured flash-provider priority list; the
    /// executor resolves it on-chain.
    flash_source: u8,
    max_gas_wei: U256,
    max_priority_fee_wei: U256,
}

impl BundleAssembler {
    pub fn new(config: &JitConfig, provider: Arc<Provider<Http>>) -> Result<Self, JitError> {
        let chain_id = config.chain.chain_id();
        let signer = match config.signer_key.as_deref() {
            Some(key) => key
                .parse::<LocalWallet>()
                .map_err(|e| JitError::Config(format!("signer key: {e}")))?,
            None => {
                if !config.dry_run {
                    return Err(JitError::Safety(
                        "live mode reached the assembler without a signer key".to_string(),
                    ));
                }
                // Dry-run still assembles structurally real bundles; an
                // ephemeral key keeps the code path identical.
                debug!("dry-run: using ephemeral signer");
                LocalWallet::new(&mut rand::thread_rng())
            }
        }
        .with_chain_id(chain_id);

        Ok(Self {
            provider,
            signer,
            executor: config.executor_address,
            flash_source: flash_source_index(&config.flashloan_provider_priority),
            max_gas_wei: U256::from(config.max_gas_gwei) * U256::exp10(9),
            max_priority_fee_wei: U256::from(config.max_priority_fee_gwei) * U256::exp10(9),
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// Build the enhanced `[mint, victim, burn/collect]` bundle for a
    /// validated opportunity.
    pub async fn assemble(&self, opportunity: &JitOpportunity) -> Result<Bundle, JitError> {
        if opportunity.victim_raw_tx.is_empty() {
            return Err(JitError::Relay(
                "victim raw bytes missing, cannot bundle".to_string(),
            ));
        }

        let base_fee = self.current_base_fee().await?;
        let (max_fee, max_priority_fee) =
            compute_fees(base_fee, self.max_priority_fee_wei, self.max_gas_wei);

        let nonce = self
            .provider
            .get_transaction_count(self.signer.address(), Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| JitError::Rpc(format!("nonce: {e}")))?;

        let mint_data = encode_mint(opportunity, self.flash_source)?;
        let burn_data = encode_burn(opportunity)?;

        let mint_raw = self
            .sign(
                self.executor,
                mint_data,
                MINT_GAS_LIMIT,
                nonce,
                max_fee,
                max_priority_fee,
            )
            .await?;
        let burn_raw = self
            .sign(
                self.executor,
                burn_data,
                BURN_GAS_LIMIT,
                nonce + 1,
                max_fee,
                max_priority_fee,
            )
            .await?;

        let mut id_material = Vec::with_capacity(72);
        id_material.extend_from_slice(&opportunity.target_block.to_be_bytes());
        id_material.extend_from_slice(opportunity.victim_tx_hash.as_bytes());
        id_material.extend_from_slice(&nonce.low_u64().to_be_bytes());

        let bundle = Bundle {
            id: H256::from(keccak256(id_material)),
            kind: BundleKind::Enhanced,
            target_block: opportunity.target_block,
            max_block: opportunity.target_block + DEFAULT_BUNDLE_WINDOW,
            slots: vec![
                BundleSlot::Signed {
                    raw: mint_raw,
                    gas_limit: U256::from(MINT_GAS_LIMIT),
                },
                BundleSlot::Victim {
                    raw: opportunity.victim_raw_tx.clone(),
                    hash: opportunity.victim_tx_hash,
                },
                BundleSlot::Signed {
                    raw: burn_raw,
                    gas_limit: U256::from(BURN_GAS_LIMIT),
                },
            ],
        };
        bundle.validate()?;

        telemetry::set_last_bundle_block(bundle.target_block);
        info!(
            bundle = ?bundle.id,
            target_block = bundle.target_block,
            pool = ?opportunity.pool,
            "bundle assembled"
        );
        Ok(bundle)
    }

    /// Nonce-burning self-transfer used when an assembled bundle must be
    /// abandoned, so no stale signed transaction stays outstanding.
    pub async fn assemble_failsafe(&self, target_block: u64) -> Result<Bundle, JitError> {
        let base_fee = self.current_base_fee().await?;
        let (max_fee, max_priority_fee) =
            compute_fees(base_fee, self.max_priority_fee_wei, self.max_gas_wei);

        let nonce = self
            .provider
            .get_transaction_count(self.signer.address(), Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| JitError::Rpc(format!("nonce: {e}")))?;

        let raw = self
            .sign(
                self.signer.address(),
                Bytes::new(),
                FAILSAFE_GAS_LIMIT,
                nonce,
                max_fee,
                max_priority_fee,
            )
            .await?;

        let bundle = Bundle {
            id: H256::from(keccak256(nonce.low_u64().to_be_bytes())),
            kind: BundleKind::Failsafe,
            target_block,
            max_block: target_block + DEFAULT_BUNDLE_WINDOW,
            slots: vec![BundleSlot::Signed {
                raw,
                gas_limit: U256::from(FAILSAFE_GAS_LIMIT),
            }],
        };
        bundle.validate()?;
        warn!(bundle = ?bundle.id, target_block, "failsafe bundle assembled");
        Ok(bundle)
    }

    async fn current_base_fee(&self) -> Result<U256, JitError> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| JitError::Rpc(format!("latest block: {e}")))?
            .ok_or_else(|| JitError::Rpc("latest block missing".to_string()))?;
        Ok(block.base_fee_per_gas.unwrap_or_default())
    }

    async fn sign(
        &self,
        to: Address,
        data: Bytes,
        gas_limit: u64,
        nonce: U256,
        max_fee: U256,
        max_priority_fee: U256,
    ) -> Result<Bytes, JitError> {
        let request = Eip1559TransactionRequest::new()
            .chain_id(self.signer.chain_id())
            .to(to)
            .data(data)
            .gas(gas_limit)
            .nonce(nonce)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(max_priority_fee);

        let typed: TypedTransaction = request.into();
        let signature = self
            .signer
            .sign_transaction(&typed)
            .await
            .map_err(|e| JitError::Safety(format!("signing failed: {e}")))?;
        Ok(typed.rlp_signed(&signature))
    }
}

/// Liquidity sources the executor contract can draw from, in its own
/// enum order.
const FLASH_PROVIDERS: [&str; 3] = ["balancer", "aave", "uniswap"];

/// Map the operator's first-choice provider onto the executor's enum.
fn flash_source_index(priority: &[String]) -> u8 {
    let Some(first) = priority.first() else {
        return 0;
    };
    match FLASH_PROVIDERS
        .iter()
        .position(|name| name.eq_ignore_ascii_case(first))
    {
        Some(index) => index as u8,
        None => {
            warn!(provider = %first, "unknown flash provider, defaulting to {}", FLASH_PROVIDERS[0]);
            0
        }
    }
}

/// `max_fee = 1.3·base + priority`, both legs clamped to the gas cap.
fn compute_fees(base_fee: U256, priority_wei: U256, cap_wei: U256) -> (U256, U256) {
    let priority = priority_wei.min(cap_wei);
    let max_fee = (base_fee * BASE_FEE_NUM / BASE_FEE_DEN + priority).min(cap_wei);
    (max_fee, priority)
}

fn encode_mint(opportunity: &JitOpportunity, flash_source: u8) -> Result<Bytes, JitError> {
    let function = EXECUTOR_ABI
        .function("mintJitPosition")
        .map_err(|e| JitError::Invariant(format!("executor abi: {e}")))?;
    let data = function
        .encode_input(&[
            Token::Address(opportunity.pool),
            Token::Int(I256::from(opportunity.tick_lower).into_raw()),
            Token::Int(I256::from(opportunity.tick_upper).into_raw()),
            Token::Uint(U256::from(opportunity.liquidity)),
            Token::Uint(opportunity.amount0),
            Token::Uint(opportunity.amount1),
            Token::Uint(U256::from(flash_source)),
        ])
        .map_err(|e| JitError::Invariant(format!("mint encoding: {e}")))?;
    Ok(Bytes::from(data))
}

fn encode_burn(opportunity: &JitOpportunity) -> Result<Bytes, JitError> {
    let function = EXECUTOR_ABI
        .function("burnAndCollect")
        .map_err(|e| JitError::Invariant(format!("executor abi: {e}")))?;
    let data = function
        .encode_input(&[
            Token::Address(opportunity.pool),
            Token::Int(I256::from(opportunity.tick_lower).into_raw()),
            Token::Int(I256::from(opportunity.tick_upper).into_raw()),
            Token::Uint(U256::from(opportunity.liquidity)),
        ])
        .map_err(|e| JitError::Invariant(format!("burn encoding: {e}")))?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitflow_types::{Confidence, OpportunityStage};
    use rust_decimal_macros::dec;

    fn gwei(value: u64) -> U256 {
        U256::from(value) * U256::exp10(9)
    }

    #[test]
    fn fee_formula_adds_headroom_over_base() {
        let (max_fee, priority) = compute_fees(gwei(20), gwei(3), gwei(300));
        assert_eq!(priority, gwei(3));
        assert_eq!(max_fee, gwei(29)); // 1.3 * 20 + 3
    }

    #[test]
    fn fees_never_exceed_the_cap() {
        let (max_fee, priority) = compute_fees(gwei(400), gwei(3), gwei(100));
        assert_eq!(max_fee, gwei(100));
        assert_eq!(priority, gwei(3));

        let (max_fee, priority) = compute_fees(gwei(10), gwei(500), gwei(100));
        assert!(max_fee <= gwei(100));
        assert_eq!(priority, gwei(100));
    }

    fn opportunity() -> JitOpportunity {
        JitOpportunity {
            trace_id: H256::repeat_byte(1),
            candidate_id: H256::repeat_byte(2),
            victim_tx_hash: H256::repeat_byte(3),
            victim_raw_tx: Bytes::from(vec![0x02, 0xaa]),
            pool: Address::repeat_byte(0x11),
            target_block: 100,
            estimated_profit_usd: dec!(50),
            gross_fees_usd: dec!(60),
            gas_cost_usd: dec!(10),
            tick_lower: -887_220,
            tick_upper: 887_220,
            liquidity: 1_000_000,
            amount0: U256::from(1u64),
            amount1: U256::from(2u64),
            gas_price_wei: gwei(30),
            stage: OpportunityStage::Validated,
            profitable: true,
            confidence: Confidence::High,
            reason: None,
        }
    }

    #[test]
    fn mint_and_burn_calldata_carry_their_selectors() {
        let opportunity = opportunity();
        let mint = encode_mint(&opportunity, 1).unwrap();
        let burn = encode_burn(&opportunity).unwrap();

        let mint_selector = &EXECUTOR_ABI.function("mintJitPosition").unwrap().short_signature();
        let burn_selector = &EXECUTOR_ABI.function("burnAndCollect").unwrap().short_signature();

        assert_eq!(&mint[..4], mint_selector);
        assert_eq!(&burn[..4], burn_selector);
        assert_ne!(mint_selector, burn_selector);
    }

    #[test]
    fn flash_source_follows_configured_priority() {
        assert_eq!(flash_source_index(&["aave".to_string()]), 1);
        assert_eq!(flash_source_index(&["Balancer".to_string()]), 0);
        assert_eq!(flash_source_index(&["unknown".to_string()]), 0);
        assert_eq!(flash_source_index(&[]), 0);
    }

    #[test]
    fn negative_ticks_encode_sign_extended() {
        let opportunity = opportunity();
        let mint = encode_mint(&opportunity, 0).unwrap();
        // tickLower occupies the second 32-byte word; a negative int24 is
        // sign-extended to 0xff..
        assert_eq!(mint[4 + 32], 0xff);
    }
}
