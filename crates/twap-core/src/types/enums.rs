//! Enumerations used throughout the TWAP engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a TWAP order.
///
/// ```text
/// Active(0) ──► Active(k) ──► … ──► Completed(total_slices)
///    │             │
///    └─────────────┴──────────────► Cancelled
/// ```
///
/// `Completed` and `Cancelled` are terminal. Both stay queryable forever and
/// still allow proceeds withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Returns `true` for states no slice can ever be executed from.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// How an automated caller should react to a failed engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    /// Not yet eligible; call again once time has passed.
    RetryLater,
    /// Transient failure; may be retried right away (with backoff).
    RetryNow,
    /// The order can never make progress again; stop retrying.
    Terminal,
    /// The request itself was wrong (parameters, permissions, paused).
    Rejected,
}
