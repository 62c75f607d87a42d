//! The TWAP order record.
//!
//! An [`Order`] splits into a static half fixed at creation and a dynamic half
//! that only the execution engine mutates (slice fills and cancellation).
//! Orders are never deleted.

use serde::{Deserialize, Serialize};

use super::enums::OrderStatus;
use super::ids::{AccountId, AssetId, OrderId};

// ---------------------------------------------------------------------------
// Creation request (caller → registry)
// ---------------------------------------------------------------------------

/// Parameters supplied by the creator of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    /// Asset sold slice by slice.
    pub input_asset: AssetId,
    /// Asset received.
    pub output_asset: AssetId,
    /// Total input amount to convert (> 0).
    pub total_amount: u128,
    /// Execution window in seconds (> 0).
    pub duration: u64,
    /// Spacing between slices in seconds (> 0, <= `duration`).
    pub interval: u64,
    /// Slippage tolerance in basis points. Stored but not enforced.
    pub max_slippage_bps: u32,
    /// Venue fee tier (hundredths of a basis point, e.g. 3000 = 0.30%).
    pub fee_tier: u32,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// One TWAP commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub creator: AccountId,
    pub input_asset: AssetId,
    pub output_asset: AssetId,
    pub total_amount: u128,
    pub duration: u64,
    pub interval: u64,
    /// `total_amount / total_slices`, floored. The last slice absorbs the
    /// remainder.
    pub slice_size: u128,
    pub max_slippage_bps: u32,
    pub fee_tier: u32,
    pub start_time: u64,

    // -- dynamic --
    pub slices_executed: u64,
    pub next_execution_time: u64,
    /// Cumulative output received across all executed slices.
    pub total_out: u128,
    pub cancelled: bool,
}

impl Order {
    /// Build a fresh order. The first slice is eligible at `start_time`.
    pub fn new(
        id: OrderId,
        creator: AccountId,
        params: CreateOrder,
        slice_size: u128,
        start_time: u64,
    ) -> Self {
        Self {
            id,
            creator,
            input_asset: params.input_asset,
            output_asset: params.output_asset,
            total_amount: params.total_amount,
            duration: params.duration,
            interval: params.interval,
            slice_size,
            max_slippage_bps: params.max_slippage_bps,
            fee_tier: params.fee_tier,
            start_time,
            slices_executed: 0,
            next_execution_time: start_time,
            total_out: 0,
            cancelled: false,
        }
    }

    /// Number of slices the order is split into (`duration / interval`).
    #[inline]
    pub fn total_slices(&self) -> u64 {
        self.duration.checked_div(self.interval).unwrap_or(0)
    }

    /// Last instant at which a slice may still execute.
    #[inline]
    pub fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.duration)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> OrderStatus {
        if self.cancelled {
            OrderStatus::Cancelled
        } else if self.slices_executed >= self.total_slices() {
            OrderStatus::Completed
        } else {
            OrderStatus::Active
        }
    }

    /// Record one successful slice.
    ///
    /// `total_out` must already be the checked sum of the previous value and
    /// this slice's output.
    pub fn record_fill(&mut self, now: u64, total_out: u128) {
        self.slices_executed += 1;
        self.next_execution_time = now.saturating_add(self.interval);
        self.total_out = total_out;
    }

    /// Mark the order cancelled. Never reverts.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Order {
        let params = CreateOrder {
            input_asset: "USDC".into(),
            output_asset: "WETH".into(),
            total_amount: 1_000,
            duration: 60,
            interval: 10,
            max_slippage_bps: 50,
            fee_tier: 3000,
        };
        Order::new(OrderId(0), "alice".into(), params, 166, 1_000)
    }

    #[test]
    fn new_order_is_immediately_eligible() {
        let o = sample();
        assert_eq!(o.next_execution_time, o.start_time);
        assert_eq!(o.slices_executed, 0);
        assert_eq!(o.total_out, 0);
        assert_eq!(o.total_slices(), 6);
        assert_eq!(o.end_time(), 1_060);
        assert_eq!(o.status(), OrderStatus::Active);
    }

    #[test]
    fn status_transitions() {
        let mut o = sample();
        for i in 0..6 {
            o.record_fill(1_000 + i * 10, 0);
        }
        assert_eq!(o.status(), OrderStatus::Completed);
        assert!(o.status().is_terminal());

        let mut o = sample();
        o.record_fill(1_000, 5);
        o.mark_cancelled();
        assert_eq!(o.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn record_fill_advances_schedule() {
        let mut o = sample();
        o.record_fill(1_003, 42);
        assert_eq!(o.slices_executed, 1);
        assert_eq!(o.next_execution_time, 1_013);
        assert_eq!(o.total_out, 42);
    }
}
