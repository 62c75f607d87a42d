//! # twap-core
//!
//! Core crate for the TWAP order engine, providing:
//!
//! - **Types** (`types`): ids, lifecycle enums, the `Order` record
//! - **Error types** (`error`): `TwapError` taxonomy via thiserror
//! - **Ledger** (`ledger`): custodial `(owner, asset)` balances
//! - **Scheduler** (`scheduler`): pure slice sizing and eligibility
//! - **Configuration** (`config`): JSON config deserialization
//! - **Time utilities** (`time_util`): wall-clock seconds for callers
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod scheduler;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use error::{ParamError, TwapError, TwapResult};
pub use types::*;
