//! # twap-venue
//!
//! Contracts for the two external collaborators the engine calls out to, and
//! in-process implementations of each.
//!
//! | Contract            | Role                                   | In-process impl     |
//! |---------------------|----------------------------------------|---------------------|
//! | [`SwapVenue`]       | converts one slice of input to output  | [`MockSwapRouter`]  |
//! | [`CustodyTransfer`] | moves funds in and out of engine custody | [`InMemoryCustody`] |
//!
//! The engine supplies `min_amount_out = 0` on every swap; slippage is not
//! enforced at this boundary.

pub mod custody;
pub mod router;

use async_trait::async_trait;
use thiserror::Error;
use twap_core::{AccountId, AssetId};

pub use custody::InMemoryCustody;
pub use router::MockSwapRouter;

// ---------------------------------------------------------------------------
// Swap venue
// ---------------------------------------------------------------------------

/// One exchange request, built by the engine per slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub input_asset: AssetId,
    pub output_asset: AssetId,
    pub fee_tier: u32,
    pub amount_in: u128,
    pub min_amount_out: u128,
    /// Account that receives the output (the engine's custody account).
    pub recipient: AccountId,
    /// Unix seconds after which the venue should refuse the request.
    pub deadline: u64,
}

/// Why a venue did not complete a swap. No funds moved in any case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VenueError {
    #[error("deadline {deadline} passed (venue time {now})")]
    DeadlineExpired { deadline: u64, now: u64 },

    #[error("no route for {input}->{output}")]
    UnsupportedPair { input: AssetId, output: AssetId },

    #[error("insufficient {asset} liquidity: need {needed}, have {available}")]
    InsufficientLiquidity {
        asset: AssetId,
        needed: u128,
        available: u128,
    },

    #[error("output {amount_out} below minimum {min_amount_out}")]
    BelowMinimum { amount_out: u128, min_amount_out: u128 },

    #[error("quote rounds to zero output")]
    ZeroOutput,

    #[error("{0}")]
    Rejected(String),
}

/// Exchange venue: fully completes a swap and returns `amount_out`, or fails
/// cleanly with no partial transfer.
#[async_trait]
pub trait SwapVenue: Send + Sync {
    /// Human-readable venue name.
    fn name(&self) -> &str;

    /// Exchange `request.amount_in` of the input asset for the output asset.
    async fn swap(&self, request: &SwapRequest) -> Result<u128, VenueError>;
}

// ---------------------------------------------------------------------------
// Custody transfer
// ---------------------------------------------------------------------------

/// Why a custody transfer failed. Nothing moved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("insufficient {asset} balance for {owner}: need {needed}, have {available}")]
    InsufficientBalance {
        owner: AccountId,
        asset: AssetId,
        needed: u128,
        available: u128,
    },

    #[error("insufficient {asset} allowance from {owner}: need {needed}, approved {approved}")]
    InsufficientAllowance {
        owner: AccountId,
        asset: AssetId,
        needed: u128,
        approved: u128,
    },

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Moves funds between external wallets and engine custody.
///
/// Both calls are atomic: on error no balance has changed.
#[async_trait]
pub trait CustodyTransfer: Send + Sync {
    /// Move `amount` from `owner`'s wallet into engine custody.
    async fn pull_from(
        &self,
        owner: &AccountId,
        asset: &AssetId,
        amount: u128,
    ) -> Result<(), CustodyError>;

    /// Move `amount` out of engine custody to `recipient`'s wallet.
    async fn push_to(
        &self,
        recipient: &AccountId,
        asset: &AssetId,
        amount: u128,
    ) -> Result<(), CustodyError>;
}
