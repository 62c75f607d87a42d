//! Keeper: decides when to call [`TwapEngine::execute_slice`].
//!
//! The engine never executes on its own. The keeper tracks order ids it
//! learns from `OrderCreated` events, sweeps them on a fixed poll interval,
//! and calls `execute_slice` for every order whose next slice is due. It uses
//! only the engine's public surface.
//!
//! Per tracked order, each sweep:
//!
//! 1. drops it if cancelled or fully executed
//! 2. leaves it alone if `next_execution_time` has not arrived
//! 3. drops it if past `start_time + duration`
//! 4. otherwise executes a slice, classifying any failure by
//!    [`TwapError::disposition`]: terminal errors drop the order, anything
//!    else keeps it for the next sweep

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use twap_core::config::KeeperConfig;
use twap_core::{Disposition, OrderId, OrderStatus, TwapError, time_util};

use crate::engine::TwapEngine;
use crate::event::{TwapEvent, TwapEventReceiver};

/// Why the keeper stopped tracking an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Cancelled,
    Completed,
    Expired,
    NotFound,
    /// The engine reported a terminal error with no lifecycle meaning, e.g.
    /// a zero slice amount.
    Unexecutable,
}

impl DropReason {
    fn from_error(e: &TwapError) -> Self {
        match e {
            TwapError::OrderCancelled(_) => Self::Cancelled,
            TwapError::AllSlicesExecuted(_) => Self::Completed,
            TwapError::OrderExpired { .. } => Self::Expired,
            TwapError::OrderNotFound(_) => Self::NotFound,
            _ => Self::Unexecutable,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Orders that executed a slice, with the venue's output.
    pub executed: Vec<(OrderId, u128)>,
    /// Orders not yet due.
    pub waiting: Vec<OrderId>,
    pub dropped: Vec<(OrderId, DropReason)>,
    /// Retryable failures; the order stays tracked.
    pub failed: Vec<(OrderId, TwapError)>,
}

/// Totals over a whole [`Keeper::run`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeeperSummary {
    pub ticks: u64,
    pub slices_executed: u64,
    pub failures: u64,
    pub dropped: Vec<(OrderId, DropReason)>,
}

impl KeeperSummary {
    fn absorb(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.slices_executed += report.executed.len() as u64;
        self.failures += report.failed.len() as u64;
        self.dropped.extend_from_slice(&report.dropped);
    }
}

pub struct Keeper {
    engine: Arc<TwapEngine>,
    active: BTreeSet<OrderId>,
    clock: fn() -> u64,
}

impl Keeper {
    pub fn new(engine: Arc<TwapEngine>) -> Self {
        Self {
            engine,
            active: BTreeSet::new(),
            clock: time_util::now_secs,
        }
    }

    /// Replace the clock that supplies `now` to each sweep in [`run`](Self::run).
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Start tracking `id`.
    pub fn track(&mut self, id: OrderId) {
        if self.active.insert(id) {
            info!("[keeper] tracking order {id}");
        }
    }

    pub fn tracked(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.active.iter().copied()
    }

    /// No tracked order left.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn handle_event(&mut self, event: &TwapEvent) {
        if let TwapEvent::OrderCreated { order_id, .. } = event {
            self.track(*order_id);
        }
    }

    fn drop_order(&mut self, id: OrderId, reason: DropReason, report: &mut TickReport) {
        self.active.remove(&id);
        info!("[keeper] dropped order {id}: {reason:?}");
        report.dropped.push((id, reason));
    }

    /// Sweep every tracked order once at `now`.
    pub async fn tick(&mut self, now: u64) -> TickReport {
        let mut report = TickReport::default();
        let ids: Vec<OrderId> = self.active.iter().copied().collect();

        for id in ids {
            let order = match self.engine.get_order(id).await {
                Ok(order) => order,
                Err(TwapError::OrderNotFound(_)) => {
                    self.drop_order(id, DropReason::NotFound, &mut report);
                    continue;
                }
                Err(e) => {
                    error!("[keeper] error checking order {id}: {e}");
                    report.failed.push((id, e));
                    continue;
                }
            };

            match order.status() {
                OrderStatus::Cancelled => {
                    self.drop_order(id, DropReason::Cancelled, &mut report);
                    continue;
                }
                OrderStatus::Completed => {
                    self.drop_order(id, DropReason::Completed, &mut report);
                    continue;
                }
                OrderStatus::Active => {}
            }

            if now < order.next_execution_time {
                debug!(
                    "[keeper] order {id} due in {}s",
                    time_util::secs_until(order.next_execution_time, now)
                );
                report.waiting.push(id);
                continue;
            }
            if now > order.end_time() {
                self.drop_order(id, DropReason::Expired, &mut report);
                continue;
            }

            match self.engine.execute_slice(id, now).await {
                Ok(amount_out) => {
                    info!(
                        "[keeper] executed slice {}/{} of order {id}: out={amount_out}",
                        order.slices_executed + 1,
                        order.total_slices()
                    );
                    report.executed.push((id, amount_out));
                    if order.slices_executed + 1 >= order.total_slices() {
                        self.drop_order(id, DropReason::Completed, &mut report);
                    }
                }
                Err(e) => match e.disposition() {
                    Disposition::Terminal => {
                        self.drop_order(id, DropReason::from_error(&e), &mut report);
                    }
                    Disposition::RetryLater => report.waiting.push(id),
                    Disposition::RetryNow | Disposition::Rejected => {
                        warn!("[keeper] failed to execute slice for order {id}: {e}");
                        report.failed.push((id, e));
                    }
                },
            }
        }
        report
    }

    /// Sweep every `poll_interval_secs` until `shutdown` resolves or, with
    /// `exit_when_idle`, until nothing is tracked after a sweep.
    ///
    /// Events are drained before each sweep so orders created since the last
    /// one are included.
    pub async fn run<S>(
        mut self,
        mut events: TwapEventReceiver,
        config: &KeeperConfig,
        shutdown: S,
    ) -> KeeperSummary
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let period = Duration::from_secs(config.poll_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;
        let mut summary = KeeperSummary::default();

        info!(
            "[keeper] started: poll={}s exit_when_idle={}",
            period.as_secs(),
            config.exit_when_idle
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("[keeper] shutdown requested");
                    break;
                }

                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(&event),
                    None => {
                        debug!("[keeper] event channel closed");
                        events_open = false;
                    }
                },

                _ = ticker.tick() => {
                    while let Ok(event) = events.try_recv() {
                        self.handle_event(&event);
                    }
                    let report = self.tick((self.clock)()).await;
                    summary.absorb(&report);
                    if config.exit_when_idle && self.is_idle() {
                        info!("[keeper] no tracked orders left");
                        break;
                    }
                }
            }
        }

        info!(
            "[keeper] stopped after {} ticks: {} slices executed, {} failures",
            summary.ticks, summary.slices_executed, summary.failures
        );
        summary
    }
}
