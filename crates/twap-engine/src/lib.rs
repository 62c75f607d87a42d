//! # twap-engine
//!
//! The custodial TWAP engine and the keeper that drives it.
//!
//! ## Architecture
//!
//! [`TwapEngine`] serializes every operation on one state lock and calls out
//! to a [`SwapVenue`](twap_venue::SwapVenue) and a
//! [`CustodyTransfer`](twap_venue::CustodyTransfer). It emits a
//! [`TwapEvent`] after each successful operation. The [`Keeper`] consumes
//! those events and calls `execute_slice` when slices come due.
//!
//! ## Modules
//!
//! - [`engine`]: `TwapEngine` with funding, order lifecycle, admin and queries
//! - [`registry`]: order validation and the order arena
//! - [`vault`]: custody holdings and the in-flight venue allowance
//! - [`event`]: `TwapEvent` and channel aliases
//! - [`keeper`]: polling executor

pub mod engine;
pub mod event;
pub mod keeper;
pub mod registry;
pub mod vault;

pub use engine::{Imbalance, TwapEngine};
pub use event::{TwapEvent, TwapEventReceiver, TwapEventSender};
pub use keeper::{DropReason, Keeper, KeeperSummary, TickReport};
