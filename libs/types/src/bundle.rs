//! Relay bundles and submission results.

use ethers::types::{Bytes, H256, U256};

use crate::error::JitError;

/// Block gas ceiling the gas-sum rule is measured against.
pub const BLOCK_GAS_CEILING: u64 = 30_000_000;

/// Fraction of the ceiling a bundle's signer transactions may consume.
pub const BUNDLE_GAS_FRACTION_NUM: u64 = 80;
pub const BUNDLE_GAS_FRACTION_DEN: u64 = 100;

/// Default inclusion window length beyond the target block.
pub const DEFAULT_BUNDLE_WINDOW: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    /// `[mint, victim, burn/collect]`: two signer transactions wrapping one
    /// external victim.
    Enhanced,
    /// Single signer transaction (nonce-burning self-transfer).
    Failsafe,
}

/// One slot of an ordered bundle.
#[derive(Debug, Clone)]
pub enum BundleSlot {
    /// Raw signed transaction owned by our signer.
    Signed { raw: Bytes, gas_limit: U256 },
    /// The victim's raw signed bytes, inserted verbatim.
    Victim { raw: Bytes, hash: H256 },
}

impl BundleSlot {
    pub fn raw(&self) -> &Bytes {
        match self {
            BundleSlot::Signed { raw, .. } => raw,
            BundleSlot::Victim { raw, .. } => raw,
        }
    }
}

/// An ordered private-relay bundle.
///
/// Construction-time invariants (checked by `validate`):
/// - enhanced bundles hold exactly `[mint, victim, burn/collect]` with the
///   victim at index 1 and non-empty victim bytes;
/// - failsafe bundles hold exactly one signer transaction;
/// - signer gas limits sum to at most 80% of the block gas ceiling;
/// - the target block is positive and `max_block` does not precede it.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub id: H256,
    pub kind: BundleKind,
    pub target_block: u64,
    pub max_block: u64,
    pub slots: Vec<BundleSlot>,
}

/// Fixed insertion index of the victim transaction in an enhanced bundle.
pub const VICTIM_INDEX: usize = 1;

impl Bundle {
    pub fn signer_gas_total(&self) -> U256 {
        self.slots
            .iter()
            .map(|slot| match slot {
                BundleSlot::Signed { gas_limit, .. } => *gas_limit,
                BundleSlot::Victim { .. } => U256::zero(),
            })
            .fold(U256::zero(), |acc, gas| acc + gas)
    }

    pub fn raw_txs(&self) -> Vec<Bytes> {
        self.slots.iter().map(|slot| slot.raw().clone()).collect()
    }

    pub fn validate(&self) -> Result<(), JitError> {
        if self.target_block == 0 {
            return Err(JitError::Invariant("bundle target block is zero".into()));
        }
        if self.max_block < self.target_block {
            return Err(JitError::Invariant(format!(
                "bundle window ends at {} before target {}",
                self.max_block, self.target_block
            )));
        }
        if self.slots.is_empty() {
            return Err(JitError::Invariant("bundle has no transactions".into()));
        }

        match self.kind {
            BundleKind::Enhanced => {
                if self.slots.len() != 3 {
                    return Err(JitError::Invariant(format!(
                        "enhanced bundle has {} slots, expected 3",
                        self.slots.len()
                    )));
                }
                let ordering_ok = matches!(self.slots[0], BundleSlot::Signed { .. })
                    && matches!(self.slots[VICTIM_INDEX], BundleSlot::Victim { .. })
                    && matches!(self.slots[2], BundleSlot::Signed { .. });
                if !ordering_ok {
                    return Err(JitError::Invariant(
                        "enhanced bundle ordering is not [mint, victim, burn/collect]".into(),
                    ));
                }
                if let BundleSlot::Victim { raw, .. } = &self.slots[VICTIM_INDEX] {
                    if raw.is_empty() {
                        return Err(JitError::Invariant(
                            "enhanced bundle victim has empty raw bytes".into(),
                        ));
                    }
                }
            }
            BundleKind::Failsafe => {
                if self.slots.len() != 1 {
                    return Err(JitError::Invariant(format!(
                        "failsafe bundle has {} slots, expected 1",
                        self.slots.len()
                    )));
                }
                if !matches!(self.slots[0], BundleSlot::Signed { .. }) {
                    return Err(JitError::Invariant(
                        "failsafe bundle slot is not signer-owned".into(),
                    ));
                }
            }
        }

        let gas_cap = U256::from(BLOCK_GAS_CEILING) * BUNDLE_GAS_FRACTION_NUM / BUNDLE_GAS_FRACTION_DEN;
        let gas_total = self.signer_gas_total();
        if gas_total > gas_cap {
            return Err(JitError::Invariant(format!(
                "bundle signer gas {gas_total} exceeds cap {gas_cap}"
            )));
        }

        Ok(())
    }
}

/// Per-relay submission outcome.
#[derive(Debug, Clone)]
pub enum RelayOutcome {
    Accepted { relay: String, bundle_hash: H256 },
    Failed { relay: String, reason: String },
    Skipped { relay: String },
}

impl RelayOutcome {
    pub fn relay(&self) -> &str {
        match self {
            RelayOutcome::Accepted { relay, .. }
            | RelayOutcome::Failed { relay, .. }
            | RelayOutcome::Skipped { relay } => relay,
        }
    }

    pub fn accepted_hash(&self) -> Option<H256> {
        match self {
            RelayOutcome::Accepted { bundle_hash, .. } => Some(*bundle_hash),
            _ => None,
        }
    }
}

/// Per-transaction outcome of a replay simulation.
#[derive(Debug, Clone)]
pub struct TxSimOutcome {
    pub tx_hash: H256,
    pub success: bool,
    pub gas_used: u64,
    pub error: Option<String>,
}

/// Result of replaying a bundle against forked state.
#[derive(Debug, Clone)]
pub struct BundleSimulation {
    pub success: bool,
    pub gas_used: u64,
    pub tx_outcomes: Vec<TxSimOutcome>,
}

/// Final record of a bundle submission round, retained for observability.
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub bundle_id: H256,
    pub target_block: u64,
    pub dry_run: bool,
    pub relay_outcomes: Vec<RelayOutcome>,
    /// First accepted bundle hash; later acceptances stay in
    /// `relay_outcomes` without changing this.
    pub primary: Option<H256>,
    pub simulation: Option<BundleSimulation>,
}

impl SubmissionResult {
    pub fn succeeded(&self) -> bool {
        self.dry_run || self.primary.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(gas: u64) -> BundleSlot {
        BundleSlot::Signed {
            raw: Bytes::from(vec![0x02, 0x01]),
            gas_limit: U256::from(gas),
        }
    }

    fn victim() -> BundleSlot {
        BundleSlot::Victim {
            raw: Bytes::from(vec![0x02, 0xaa]),
            hash: H256::repeat_byte(0xab),
        }
    }

    fn enhanced() -> Bundle {
        Bundle {
            id: H256::repeat_byte(0x01),
            kind: BundleKind::Enhanced,
            target_block: 100,
            max_block: 103,
            slots: vec![signed(800_000), victim(), signed(600_000)],
        }
    }

    #[test]
    fn enhanced_bundle_validates() {
        assert!(enhanced().validate().is_ok());
    }

    #[test]
    fn enhanced_bundle_requires_exact_ordering() {
        let mut bundle = enhanced();
        bundle.slots.swap(0, 1);
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn enhanced_bundle_requires_three_slots() {
        let mut bundle = enhanced();
        bundle.slots.pop();
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn gas_sum_capped_at_80_percent_of_ceiling() {
        let mut bundle = enhanced();
        bundle.slots[0] = signed(23_500_000);
        bundle.slots[2] = signed(600_000);
        assert!(bundle.validate().is_err());

        let at_cap = U256::from(BLOCK_GAS_CEILING) * 80 / 100;
        assert!(bundle.signer_gas_total() > at_cap);
    }

    #[test]
    fn failsafe_bundle_is_single_signed_slot() {
        let bundle = Bundle {
            id: H256::repeat_byte(0x02),
            kind: BundleKind::Failsafe,
            target_block: 100,
            max_block: 100,
            slots: vec![signed(21_000)],
        };
        assert!(bundle.validate().is_ok());

        let bad = Bundle {
            slots: vec![signed(21_000), signed(21_000)],
            ..bundle
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn zero_target_block_rejected() {
        let mut bundle = enhanced();
        bundle.target_block = 0;
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn empty_victim_bytes_rejected() {
        let mut bundle = enhanced();
        bundle.slots[VICTIM_INDEX] = BundleSlot::Victim {
            raw: Bytes::new(),
            hash: H256::zero(),
        };
        assert!(bundle.validate().is_err());
    }
}
