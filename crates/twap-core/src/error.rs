//! Typed error definitions for the TWAP engine.
//!
//! Every engine operation returns [`TwapError`] so callers can tell "retry
//! later" from "stop retrying" without parsing strings. Each variant maps to a
//! [`Disposition`] via [`TwapError::disposition`].

use thiserror::Error;

use crate::types::{AccountId, AssetId, Disposition, OrderId};

/// Result alias for engine operations.
pub type TwapResult<T> = Result<T, TwapError>;

/// Which order-creation check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("creator is the null account")]
    NullCreator,
    #[error("input or output asset is the null asset")]
    NullAsset,
    #[error("input and output asset are the same")]
    SameAsset,
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("duration must be greater than zero")]
    ZeroDuration,
    #[error("interval must be greater than zero")]
    ZeroInterval,
    #[error("interval exceeds duration")]
    IntervalExceedsDuration,
    #[error("max slippage {bps} bps exceeds cap of {cap} bps")]
    SlippageTooHigh { bps: u32, cap: u32 },
    #[error("fee tier {0} is not supported")]
    UnsupportedFeeTier(u32),
    #[error("slice count {slices} outside 1..={max}")]
    SliceCount { slices: u64, max: u64 },
    #[error("slice size rounds to zero")]
    ZeroSliceSize,
    #[error("null account cannot own the engine")]
    NullOwner,
    #[error("account is the null account")]
    NullAccount,
}

/// Domain-specific errors returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TwapError {
    /// Bad creation parameters. Caller must resubmit corrected values.
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ParamError),

    /// Ledger or external wallet balance too small.
    #[error("insufficient balance of {asset} for {owner}: need {needed}, have {available}")]
    InsufficientBalance {
        owner: AccountId,
        asset: AssetId,
        needed: u128,
        available: u128,
    },

    /// Owner has not authorized the engine to pull enough.
    #[error("insufficient allowance of {asset} from {owner}: need {needed}, approved {approved}")]
    InsufficientAllowance {
        owner: AccountId,
        asset: AssetId,
        needed: u128,
        approved: u128,
    },

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("caller {caller} is not the creator of order {order}")]
    NotOrderCreator { order: OrderId, caller: AccountId },

    #[error("order {0} is cancelled")]
    OrderCancelled(OrderId),

    #[error("order {order} not eligible until {next_execution_time} (now {now})")]
    TooEarly {
        order: OrderId,
        next_execution_time: u64,
        now: u64,
    },

    #[error("order {order} expired at {end_time} (now {now})")]
    OrderExpired { order: OrderId, end_time: u64, now: u64 },

    #[error("all slices of order {0} already executed")]
    AllSlicesExecuted(OrderId),

    /// The computed slice amount is zero.
    #[error("slice amount for order {0} is zero")]
    ZeroAmount(OrderId),

    /// The venue rejected or failed the exchange.
    #[error("swap failed: {0}")]
    SwapFailed(String),

    #[error("no proceeds of {asset} to withdraw for {owner}")]
    NoProceeds { owner: AccountId, asset: AssetId },

    #[error("engine is paused")]
    Paused,

    #[error("caller {0} is not the engine owner")]
    NotOwner(AccountId),

    /// An engine call arrived while another engine call was in progress on
    /// the same task (e.g. from inside a venue callback).
    #[error("reentrant call to {attempted} during {active}")]
    Reentrant {
        active: &'static str,
        attempted: &'static str,
    },

    /// Moving funds out of custody failed; nothing was changed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    /// Engine-held funds do not cover a movement the books expect.
    #[error("custody invariant violated: {0}")]
    Custody(&'static str),
}

impl TwapError {
    /// Classify the error for automated callers.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::TooEarly { .. } => Disposition::RetryLater,
            Self::SwapFailed(_) | Self::Reentrant { .. } | Self::TransferFailed(_) => {
                Disposition::RetryNow
            }
            Self::OrderNotFound(_)
            | Self::OrderCancelled(_)
            | Self::OrderExpired { .. }
            | Self::AllSlicesExecuted(_)
            | Self::ZeroAmount(_) => Disposition::Terminal,
            Self::InvalidParameter(_)
            | Self::InsufficientBalance { .. }
            | Self::InsufficientAllowance { .. }
            | Self::NotOrderCreator { .. }
            | Self::NoProceeds { .. }
            | Self::Paused
            | Self::NotOwner(_)
            | Self::Overflow(_)
            | Self::Custody(_) => Disposition::Rejected,
        }
    }
}
