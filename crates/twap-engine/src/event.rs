//! Notifications emitted by the engine after each successful operation.
//!
//! Every event is sent exactly once, after all state changes of its operation
//! have been applied, and never for a failed operation. Consumers (the keeper,
//! indexers, UIs) poll a [`TwapEventReceiver`].

use serde::Serialize;
use twap_core::{AccountId, AssetId, OrderId};

/// A typed event emitted by the [`TwapEngine`](crate::TwapEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TwapEvent {
    /// Funds pulled into custody and credited to the owner's ledger entry.
    Deposited {
        owner: AccountId,
        asset: AssetId,
        amount: u128,
    },

    /// A new order reserved its funds.
    OrderCreated {
        order_id: OrderId,
        creator: AccountId,
        input_asset: AssetId,
        output_asset: AssetId,
        total_amount: u128,
        duration: u64,
        interval: u64,
        slice_size: u128,
    },

    /// One slice converted.
    SliceExecuted {
        order_id: OrderId,
        /// 1-based index of the slice just executed.
        slice_number: u64,
        amount_in: u128,
        amount_out: u128,
        timestamp: u64,
    },

    /// Order cancelled; `refund_amount` went back to the creator's ledger.
    OrderCancelled {
        order_id: OrderId,
        refund_amount: u128,
    },

    /// Ledger proceeds pushed out to the creator's wallet.
    ProceedsWithdrawn {
        order_id: OrderId,
        recipient: AccountId,
        amount: u128,
    },
}

impl TwapEvent {
    /// The order this event concerns, if any.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::Deposited { .. } => None,
            Self::OrderCreated { order_id, .. }
            | Self::SliceExecuted { order_id, .. }
            | Self::OrderCancelled { order_id, .. }
            | Self::ProceedsWithdrawn { order_id, .. } => Some(*order_id),
        }
    }
}

/// Sender half of the engine event channel.
pub type TwapEventSender = tokio::sync::mpsc::UnboundedSender<TwapEvent>;

/// Receiver half of the engine event channel.
pub type TwapEventReceiver = tokio::sync::mpsc::UnboundedReceiver<TwapEvent>;
