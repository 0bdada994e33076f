//! # JitFlow Core Types
//!
//! Shared domain types for the JIT liquidity pipeline: pool descriptors and
//! snapshots, decoded pending swaps, evaluated opportunities, relay bundles,
//! and the error taxonomy every component converts into at its boundary.
//!
//! Ownership conventions:
//! - `PoolDescriptor` is loaded once by configuration and shared by `Arc`.
//! - `PendingSwap` is created by the watcher and consumed by the evaluator.
//! - `JitOpportunity` is created by the evaluator and owned by the
//!   coordinator until its target block passes.
//! - `Bundle` and `SubmissionResult` are owned by the submitter.

pub mod bundle;
pub mod error;
pub mod opportunity;
pub mod pool;
pub mod swap;

pub use bundle::{
    Bundle, BundleKind, BundleSimulation, BundleSlot, RelayOutcome, SubmissionResult,
    TxSimOutcome, BLOCK_GAS_CEILING, DEFAULT_BUNDLE_WINDOW, VICTIM_INDEX,
};
pub use error::{DropReason, JitError, Reason};
pub use opportunity::{Confidence, JitOpportunity, OpportunityStage, PoolHealth};
pub use pool::{FeeTier, PoolDescriptor, PoolState, SwapDirection};
pub use swap::{DecodedCall, PendingSwap};
