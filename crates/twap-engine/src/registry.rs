//! Order registry: validates, creates, and stores orders.
//!
//! Orders live in a dense arena indexed by their sequential id, so lookup is
//! O(1) and nothing is ever removed. Creation is all-or-nothing: every check
//! runs before the single ledger reservation, and the order is stored only if
//! that reservation succeeds.

use twap_core::config::{EngineConfig, MAX_SLICES, MAX_SLIPPAGE_BPS};
use twap_core::ledger::Ledger;
use twap_core::{AccountId, CreateOrder, Order, OrderId, ParamError, TwapError, TwapResult};

/// Arena of every order ever created.
#[derive(Debug, Default)]
pub struct OrderRegistry {
    orders: Vec<Order>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next created order will receive.
    #[inline]
    pub fn next_order_id(&self) -> OrderId {
        OrderId(u64::try_from(self.orders.len()).unwrap_or(u64::MAX))
    }

    /// Number of orders ever created.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Validate `params`, reserve `total_amount` from the creator's ledger
    /// entry, and store the new order.
    ///
    /// Checks run in a fixed order, each failing with its own
    /// [`ParamError`]; the balance check comes last and fails with
    /// [`TwapError::InsufficientBalance`].
    pub fn create(
        &mut self,
        ledger: &mut Ledger,
        config: &EngineConfig,
        creator: &AccountId,
        params: CreateOrder,
        now: u64,
    ) -> TwapResult<&Order> {
        let slice_size = validate(config, creator, &params)?;
        ledger.reserve(creator, &params.input_asset, params.total_amount)?;

        let id = self.next_order_id();
        self.orders
            .push(Order::new(id, creator.clone(), params, slice_size, now));
        Ok(&self.orders[self.orders.len() - 1])
    }

    pub fn get(&self, id: OrderId) -> TwapResult<&Order> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.orders.get(idx))
            .ok_or(TwapError::OrderNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: OrderId) -> TwapResult<&mut Order> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.orders.get_mut(idx))
            .ok_or(TwapError::OrderNotFound(id))
    }

    /// All orders in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }
}

/// Fail with [`TwapError::NotOrderCreator`] unless `caller` created `order`.
pub fn ensure_creator(order: &Order, caller: &AccountId) -> TwapResult<()> {
    if order.creator != *caller {
        return Err(TwapError::NotOrderCreator {
            order: order.id,
            caller: caller.clone(),
        });
    }
    Ok(())
}

/// Run every parameter check and return the slice size.
///
/// The slippage and slice-count limits are the tighter of `config` and the
/// fixed ceilings, so an unvalidated config cannot lift them.
pub fn validate(config: &EngineConfig, creator: &AccountId, p: &CreateOrder) -> TwapResult<u128> {
    let slippage_cap = config.max_slippage_bps.min(MAX_SLIPPAGE_BPS);
    let max_slices = config.max_slices.min(MAX_SLICES);

    if creator.is_null() {
        return Err(ParamError::NullCreator.into());
    }
    if p.input_asset.is_null() || p.output_asset.is_null() {
        return Err(ParamError::NullAsset.into());
    }
    if p.input_asset == p.output_asset {
        return Err(ParamError::SameAsset.into());
    }
    if p.total_amount == 0 {
        return Err(ParamError::ZeroAmount.into());
    }
    if p.duration == 0 {
        return Err(ParamError::ZeroDuration.into());
    }
    if p.interval == 0 {
        return Err(ParamError::ZeroInterval.into());
    }
    if p.interval > p.duration {
        return Err(ParamError::IntervalExceedsDuration.into());
    }
    if p.max_slippage_bps > slippage_cap {
        return Err(ParamError::SlippageTooHigh {
            bps: p.max_slippage_bps,
            cap: slippage_cap,
        }
        .into());
    }
    if !config.is_fee_tier_allowed(p.fee_tier) {
        return Err(ParamError::UnsupportedFeeTier(p.fee_tier).into());
    }

    let slices = p.duration / p.interval;
    if slices == 0 || slices > max_slices {
        return Err(ParamError::SliceCount {
            slices,
            max: max_slices,
        }
        .into());
    }
    let slice_size = p.total_amount / u128::from(slices);
    if slice_size == 0 {
        return Err(ParamError::ZeroSliceSize.into());
    }
    Ok(slice_size)
}
