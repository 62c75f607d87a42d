//! Slice scheduling.
//!
//! Pure functions over an [`Order`] snapshot: how many slices, how big the
//! next one is, how much is left, and whether a slice may run at `now`.
//!
//! `total_amount` is partitioned exactly: every slice is `slice_size` except
//! the last, which takes `total_amount - (total_slices - 1) * slice_size`.

use crate::error::{TwapError, TwapResult};
use crate::types::Order;

/// `duration / interval`, floored.
#[inline]
pub fn total_slices(order: &Order) -> u64 {
    order.total_slices()
}

/// Input amount for the next slice.
///
/// The final slice absorbs the floor-division remainder.
pub fn slice_amount(order: &Order) -> u128 {
    let total = total_slices(order);
    if total > 0 && order.slices_executed == total - 1 {
        order
            .total_amount
            .saturating_sub(u128::from(order.slices_executed) * order.slice_size)
    } else {
        order.slice_size
    }
}

/// Input amount not yet converted. Zero once cancelled or fully executed.
pub fn remaining(order: &Order) -> u128 {
    if order.cancelled || order.slices_executed >= total_slices(order) {
        return 0;
    }
    order
        .total_amount
        .saturating_sub(u128::from(order.slices_executed) * order.slice_size)
}

/// Whether a slice may execute at `now`.
pub fn is_eligible(order: &Order, now: u64) -> bool {
    check_eligible(order, now).is_ok()
}

/// Like [`is_eligible`] but names the violated condition.
///
/// Checked in order: cancelled, fully executed, too early, expired.
pub fn check_eligible(order: &Order, now: u64) -> TwapResult<()> {
    if order.cancelled {
        return Err(TwapError::OrderCancelled(order.id));
    }
    if order.slices_executed >= total_slices(order) {
        return Err(TwapError::AllSlicesExecuted(order.id));
    }
    if now < order.next_execution_time {
        return Err(TwapError::TooEarly {
            order: order.id,
            next_execution_time: order.next_execution_time,
            now,
        });
    }
    if now > order.end_time() {
        return Err(TwapError::OrderExpired {
            order: order.id,
            end_time: order.end_time(),
            now,
        });
    }
    Ok(())
}
