//! The TWAP execution engine.
//!
//! [`TwapEngine`] owns the ledger, the order registry, and the custody vault
//! behind a single [`tokio::sync::Mutex`]. Every public operation holds that
//! lock for its full duration, including the one awaited call to the swap
//! venue or custody transfer, so operations never interleave.
//!
//! ```text
//! TwapEngine
//! ├── EngineState (Mutex)
//! │   ├── Ledger          (owner, asset) → balance
//! │   ├── OrderRegistry   dense arena of orders
//! │   ├── Vault           holdings + in-flight venue allowance
//! │   └── owner / paused  admin switch
//! ├── Arc<dyn SwapVenue>
//! ├── Arc<dyn CustodyTransfer>
//! └── TwapEventSender     → TwapEventReceiver (keeper, indexers)
//! ```
//!
//! A task-local marker is set while an operation runs, and an engine-wide
//! marker is set while that operation awaits the venue or custody. A call
//! made back into the engine from inside such a callback, on the same task or
//! a spawned one, sees a marker and fails with [`TwapError::Reentrant`]
//! instead of waiting on the lock.
//!
//! State is only touched after the external call returns `Ok`, and every
//! addition that follows it is checked beforehand, so an operation either
//! applies all of its changes and emits its event, or applies nothing.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use ahash::AHashSet;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use twap_core::config::EngineConfig;
use twap_core::ledger::Ledger;
use twap_core::scheduler;
use twap_core::{
    AccountId, AssetId, CreateOrder, Order, OrderId, OrderStatus, ParamError, TwapError,
    TwapResult,
};
use twap_venue::{CustodyError, CustodyTransfer, SwapRequest, SwapVenue};

use crate::event::{TwapEvent, TwapEventReceiver, TwapEventSender};
use crate::registry::{OrderRegistry, ensure_creator};
use crate::vault::Vault;

tokio::task_local! {
    static ACTIVE_CALL: &'static str;
}

type InFlight = StdMutex<Option<&'static str>>;

fn lock_in_flight(slot: &InFlight) -> MutexGuard<'_, Option<&'static str>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the engine as awaiting a collaborator for operation `op`. Cleared
/// on drop, including when the operation's future is abandoned.
struct ExternalCall<'a> {
    slot: &'a InFlight,
}

impl<'a> ExternalCall<'a> {
    fn enter(slot: &'a InFlight, op: &'static str) -> Self {
        *lock_in_flight(slot) = Some(op);
        Self { slot }
    }
}

impl Drop for ExternalCall<'_> {
    fn drop(&mut self) {
        *lock_in_flight(self.slot) = None;
    }
}

/// One asset whose custody holdings differ from what the books owe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imbalance {
    pub asset: AssetId,
    /// What the vault holds.
    pub held: u128,
    /// Ledger balances plus unexecuted order remainders.
    pub owed: u128,
}

#[derive(Debug)]
struct EngineState {
    ledger: Ledger,
    registry: OrderRegistry,
    vault: Vault,
    owner: AccountId,
    paused: bool,
}

impl EngineState {
    fn ensure_running(&self) -> TwapResult<()> {
        if self.paused {
            return Err(TwapError::Paused);
        }
        Ok(())
    }

    fn ensure_owner(&self, caller: &AccountId) -> TwapResult<()> {
        if self.owner != *caller {
            return Err(TwapError::NotOwner(caller.clone()));
        }
        Ok(())
    }
}

/// Custodial TWAP engine.
///
/// All methods take `&self` and are safe to call from multiple tasks; calls
/// are serialized on the internal state lock. A call that arrives while an
/// operation is awaiting the venue or custody fails with
/// [`TwapError::Reentrant`], which callers may retry.
pub struct TwapEngine {
    config: EngineConfig,
    /// Account the venue pays swap output into.
    custody_account: AccountId,
    state: Mutex<EngineState>,
    /// Operation currently awaiting the venue or custody, if any.
    in_flight: InFlight,
    venue: Arc<dyn SwapVenue>,
    custody: Arc<dyn CustodyTransfer>,
    event_tx: TwapEventSender,
}

impl TwapEngine {
    /// Build an engine and the receiving end of its event channel.
    ///
    /// The pause authority starts with `config.owner`.
    pub fn new(
        config: EngineConfig,
        custody_account: AccountId,
        venue: Arc<dyn SwapVenue>,
        custody: Arc<dyn CustodyTransfer>,
    ) -> TwapResult<(Self, TwapEventReceiver)> {
        if config.owner.is_null() {
            return Err(ParamError::NullOwner.into());
        }
        if custody_account.is_null() {
            return Err(ParamError::NullAccount.into());
        }
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = EngineState {
            ledger: Ledger::new(),
            registry: OrderRegistry::new(),
            vault: Vault::new(),
            owner: config.owner.clone(),
            paused: config.start_paused,
        };
        info!(
            "[engine] created: owner={} custody={} venue={} paused={}",
            state.owner,
            custody_account,
            venue.name(),
            state.paused
        );
        let engine = Self {
            config,
            custody_account,
            state: Mutex::new(state),
            in_flight: StdMutex::new(None),
            venue,
            custody,
            event_tx,
        };
        Ok((engine, event_rx))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn custody_account(&self) -> &AccountId {
        &self.custody_account
    }

    /// Run `fut` as engine operation `op`, refusing nested engine calls.
    async fn guarded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = TwapResult<T>>,
    ) -> TwapResult<T> {
        let active = ACTIVE_CALL
            .try_with(|active| *active)
            .ok()
            .or_else(|| *lock_in_flight(&self.in_flight));
        if let Some(active) = active {
            warn!("[engine] rejected reentrant {op} during {active}");
            return Err(TwapError::Reentrant {
                active,
                attempted: op,
            });
        }
        ACTIVE_CALL.scope(op, fut).await
    }

    fn emit(&self, event: TwapEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("[engine] event receiver dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Funding
    // -----------------------------------------------------------------------

    /// Pull `amount` of `asset` from `owner`'s wallet into custody and credit
    /// the owner's ledger entry.
    pub async fn deposit(&self, owner: &AccountId, asset: &AssetId, amount: u128) -> TwapResult<u128> {
        self.guarded("deposit", async {
            let mut st = self.state.lock().await;
            st.ensure_running()?;
            if owner.is_null() {
                return Err(ParamError::NullAccount.into());
            }
            if asset.is_null() {
                return Err(ParamError::NullAsset.into());
            }
            if amount == 0 {
                return Err(ParamError::ZeroAmount.into());
            }
            st.ledger
                .balance(owner, asset)
                .checked_add(amount)
                .ok_or(TwapError::Overflow("ledger deposit"))?;
            st.vault.check_receive(asset, amount)?;

            {
                let _call = ExternalCall::enter(&self.in_flight, "deposit");
                self.custody
                    .pull_from(owner, asset, amount)
                    .await
                    .map_err(custody_error)?;
            }

            let balance = st.ledger.deposit(owner, asset, amount)?;
            st.vault.receive(asset, amount)?;
            info!("[engine] deposit {amount} {asset} from {owner}, ledger balance {balance}");
            self.emit(TwapEvent::Deposited {
                owner: owner.clone(),
                asset: asset.clone(),
                amount,
            });
            Ok(balance)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Order lifecycle
    // -----------------------------------------------------------------------

    /// Validate and store a new order, reserving `total_amount` of the input
    /// asset from the creator's ledger entry.
    pub async fn create_order(
        &self,
        creator: &AccountId,
        params: CreateOrder,
        now: u64,
    ) -> TwapResult<OrderId> {
        self.guarded("create_order", async {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;
            st.ensure_running()?;

            let order = st
                .registry
                .create(&mut st.ledger, &self.config, creator, params, now)?;
            let event = TwapEvent::OrderCreated {
                order_id: order.id,
                creator: order.creator.clone(),
                input_asset: order.input_asset.clone(),
                output_asset: order.output_asset.clone(),
                total_amount: order.total_amount,
                duration: order.duration,
                interval: order.interval,
                slice_size: order.slice_size,
            };
            let id = order.id;
            info!(
                "[engine] order {id} created by {creator}: {} {} -> {}, {} slices of {}",
                order.total_amount,
                order.input_asset,
                order.output_asset,
                order.total_slices(),
                order.slice_size
            );
            self.emit(event);
            Ok(id)
        })
        .await
    }

    /// Swap the next slice of order `id` and book the proceeds to its
    /// creator. Returns the venue's `amount_out`.
    pub async fn execute_slice(&self, id: OrderId, now: u64) -> TwapResult<u128> {
        self.guarded("execute_slice", async {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;
            st.ensure_running()?;

            let order = st.registry.get(id)?;
            if let Err(e) = scheduler::check_eligible(order, now) {
                debug!("[engine] order {id} not executable: {e}");
                return Err(e);
            }
            let amount_in = scheduler::slice_amount(order);
            if amount_in == 0 {
                return Err(TwapError::ZeroAmount(id));
            }
            let creator = order.creator.clone();
            let slice_number = order.slices_executed + 1;
            let prior_out = order.total_out;
            let request = SwapRequest {
                input_asset: order.input_asset.clone(),
                output_asset: order.output_asset.clone(),
                fee_tier: order.fee_tier,
                amount_in,
                min_amount_out: 0,
                recipient: self.custody_account.clone(),
                deadline: now.saturating_add(self.config.swap_deadline_secs),
            };

            if let Some(stale) = st.vault.revoke() {
                warn!(
                    "[engine] revoked stale allowance of {} {} for {}",
                    stale.amount, stale.asset, stale.spender
                );
            }
            st.vault
                .grant(self.venue.name(), &request.input_asset, amount_in);

            let swapped = {
                let _call = ExternalCall::enter(&self.in_flight, "execute_slice");
                self.venue.swap(&request).await
            };
            let amount_out = match swapped {
                Ok(out) => out,
                Err(e) => {
                    st.vault.revoke();
                    warn!("[engine] order {id} slice {slice_number} swap failed: {e}");
                    return Err(TwapError::SwapFailed(e.to_string()));
                }
            };

            let settled = Self::check_fill(st, &creator, &request, prior_out, amount_out);
            let total_out = match settled {
                Ok(total) => total,
                Err(e) => {
                    st.vault.revoke();
                    warn!("[engine] order {id} slice {slice_number} cannot be booked: {e}");
                    return Err(e);
                }
            };

            st.vault.settle_swap(
                &request.input_asset,
                amount_in,
                &request.output_asset,
                amount_out,
            )?;
            if amount_out > 0 {
                st.ledger
                    .credit(&creator, &request.output_asset, amount_out)?;
            }
            st.registry.get_mut(id)?.record_fill(now, total_out);

            info!(
                "[engine] order {id} slice {slice_number}: {amount_in} {} -> {amount_out} {}",
                request.input_asset, request.output_asset
            );
            self.emit(TwapEvent::SliceExecuted {
                order_id: id,
                slice_number,
                amount_in,
                amount_out,
                timestamp: now,
            });
            Ok(amount_out)
        })
        .await
    }

    /// Verify every post-swap addition fits; returns the new `total_out`.
    fn check_fill(
        st: &EngineState,
        creator: &AccountId,
        request: &SwapRequest,
        prior_out: u128,
        amount_out: u128,
    ) -> TwapResult<u128> {
        let total_out = prior_out
            .checked_add(amount_out)
            .ok_or(TwapError::Overflow("order total_out"))?;
        st.ledger
            .balance(creator, &request.output_asset)
            .checked_add(amount_out)
            .ok_or(TwapError::Overflow("ledger credit"))?;
        st.vault.check_settle(
            &request.input_asset,
            request.amount_in,
            &request.output_asset,
            amount_out,
        )?;
        Ok(total_out)
    }

    /// Cancel order `id` and refund its unexecuted input to the creator's
    /// ledger entry. Returns the refund, which is zero for a fully executed
    /// order.
    pub async fn cancel_order(&self, id: OrderId, caller: &AccountId, now: u64) -> TwapResult<u128> {
        self.guarded("cancel_order", async {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;
            st.ensure_running()?;

            let order = st.registry.get(id)?;
            ensure_creator(order, caller)?;
            if order.cancelled {
                return Err(TwapError::OrderCancelled(id));
            }
            let refund = scheduler::remaining(order);
            let input_asset = order.input_asset.clone();
            if refund > 0 {
                st.ledger
                    .balance(caller, &input_asset)
                    .checked_add(refund)
                    .ok_or(TwapError::Overflow("ledger credit"))?;
            }

            st.registry.get_mut(id)?.mark_cancelled();
            if refund > 0 {
                st.ledger.credit(caller, &input_asset, refund)?;
            }

            info!("[engine] order {id} cancelled by {caller} at {now}, refunded {refund} {input_asset}");
            self.emit(TwapEvent::OrderCancelled {
                order_id: id,
                refund_amount: refund,
            });
            Ok(refund)
        })
        .await
    }

    /// Push the creator's whole ledger balance of the order's output asset to
    /// their wallet.
    ///
    /// The balance is per `(creator, asset)`, so proceeds of every order the
    /// creator has with the same output asset are withdrawn together.
    pub async fn withdraw_proceeds(
        &self,
        id: OrderId,
        caller: &AccountId,
        now: u64,
    ) -> TwapResult<u128> {
        self.guarded("withdraw_proceeds", async {
            let mut guard = self.state.lock().await;
            let st = &mut *guard;
            st.ensure_running()?;

            let order = st.registry.get(id)?;
            ensure_creator(order, caller)?;
            let asset = order.output_asset.clone();
            let amount = st.ledger.balance(caller, &asset);
            if amount == 0 {
                return Err(TwapError::NoProceeds {
                    owner: caller.clone(),
                    asset,
                });
            }
            st.vault.check_release(&asset, amount)?;

            let pushed = {
                let _call = ExternalCall::enter(&self.in_flight, "withdraw_proceeds");
                self.custody.push_to(caller, &asset, amount).await
            };
            if let Err(e) = pushed {
                warn!("[engine] withdrawal of {amount} {asset} to {caller} failed: {e}");
                return Err(TwapError::TransferFailed(e.to_string()));
            }

            let debited = st.ledger.debit_all(caller, &asset);
            debug_assert_eq!(debited, amount);
            st.vault.release(&asset, amount)?;

            info!("[engine] order {id}: withdrew {amount} {asset} to {caller} at {now}");
            self.emit(TwapEvent::ProceedsWithdrawn {
                order_id: id,
                recipient: caller.clone(),
                amount,
            });
            Ok(amount)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    /// Engage or release the pause switch. Owner only.
    pub async fn set_paused(&self, caller: &AccountId, paused: bool) -> TwapResult<()> {
        self.guarded("set_paused", async {
            let mut st = self.state.lock().await;
            st.ensure_owner(caller)?;
            if st.paused != paused {
                st.paused = paused;
                info!("[engine] paused={paused} by {caller}");
            }
            Ok(())
        })
        .await
    }

    /// Hand the pause authority to `new_owner`. Owner only.
    pub async fn transfer_ownership(&self, caller: &AccountId, new_owner: &AccountId) -> TwapResult<()> {
        self.guarded("transfer_ownership", async {
            let mut st = self.state.lock().await;
            st.ensure_owner(caller)?;
            if new_owner.is_null() {
                return Err(ParamError::NullOwner.into());
            }
            st.owner = new_owner.clone();
            info!("[engine] ownership transferred from {caller} to {new_owner}");
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_order(&self, id: OrderId) -> TwapResult<Order> {
        self.guarded("get_order", async {
            let st = self.state.lock().await;
            st.registry.get(id).cloned()
        })
        .await
    }

    pub async fn remaining_amount(&self, id: OrderId) -> TwapResult<u128> {
        self.guarded("remaining_amount", async {
            let st = self.state.lock().await;
            st.registry.get(id).map(scheduler::remaining)
        })
        .await
    }

    pub async fn ledger_balance(&self, owner: &AccountId, asset: &AssetId) -> TwapResult<u128> {
        self.guarded("ledger_balance", async {
            let st = self.state.lock().await;
            Ok(st.ledger.balance(owner, asset))
        })
        .await
    }

    pub async fn next_order_id(&self) -> TwapResult<OrderId> {
        self.guarded("next_order_id", async {
            let st = self.state.lock().await;
            Ok(st.registry.next_order_id())
        })
        .await
    }

    pub async fn is_paused(&self) -> TwapResult<bool> {
        self.guarded("is_paused", async { Ok(self.state.lock().await.paused) }).await
    }

    pub async fn owner(&self) -> TwapResult<AccountId> {
        self.guarded("owner", async { Ok(self.state.lock().await.owner.clone()) }).await
    }

    /// Ids of orders that are neither cancelled nor fully executed.
    pub async fn active_order_ids(&self) -> TwapResult<Vec<OrderId>> {
        self.guarded("active_order_ids", async {
            let st = self.state.lock().await;
            Ok(st
                .registry
                .iter()
                .filter(|o| o.status() == OrderStatus::Active)
                .map(|o| o.id)
                .collect())
        })
        .await
    }

    /// Compare custody holdings with what the books owe, per asset.
    ///
    /// Owed is every ledger balance plus the unexecuted remainder of every
    /// order with that input asset. An empty result means solvent.
    pub async fn check_solvency(&self) -> TwapResult<Vec<Imbalance>> {
        self.guarded("check_solvency", async {
            let st = self.state.lock().await;
            let mut assets: AHashSet<&AssetId> = st.vault.assets().collect();
            assets.extend(st.ledger.assets());
            assets.extend(st.registry.iter().map(|o| &o.input_asset));

            let mut out: Vec<Imbalance> = assets
                .into_iter()
                .filter_map(|asset| {
                    let reserved: u128 = st
                        .registry
                        .iter()
                        .filter(|o| o.input_asset == *asset)
                        .map(scheduler::remaining)
                        .fold(0u128, u128::saturating_add);
                    let owed = st.ledger.total_for_asset(asset).saturating_add(reserved);
                    let held = st.vault.holding(asset);
                    (held != owed).then(|| Imbalance {
                        asset: asset.clone(),
                        held,
                        owed,
                    })
                })
                .collect();
            out.sort_by(|a, b| a.asset.cmp(&b.asset));
            for imbalance in &out {
                warn!(
                    "[engine] solvency mismatch for {}: held {} owed {}",
                    imbalance.asset, imbalance.held, imbalance.owed
                );
            }
            Ok(out)
        })
        .await
    }
}

/// Map a failed pull into the engine's deposit errors.
fn custody_error(e: CustodyError) -> TwapError {
    match e {
        CustodyError::InsufficientBalance {
            owner,
            asset,
            needed,
            available,
        } => TwapError::InsufficientBalance {
            owner,
            asset,
            needed,
            available,
        },
        CustodyError::InsufficientAllowance {
            owner,
            asset,
            needed,
            approved,
        } => TwapError::InsufficientAllowance {
            owner,
            asset,
            needed,
            approved,
        },
        CustodyError::Rejected(reason) => TwapError::TransferFailed(reason),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex as StdMutex, OnceLock, Weak};
    use std::time::Duration;

    use async_trait::async_trait;
    use twap_venue::{InMemoryCustody, VenueError};

    use super::*;

    const T0: u64 = 1_000;

    fn alice() -> AccountId {
        "alice".into()
    }

    fn admin() -> AccountId {
        "admin".into()
    }

    fn usdc() -> AssetId {
        "USDC".into()
    }

    fn weth() -> AssetId {
        "WETH".into()
    }

    fn params(total_amount: u128) -> CreateOrder {
        CreateOrder {
            input_asset: usdc(),
            output_asset: weth(),
            total_amount,
            duration: 3_600,
            interval: 300,
            max_slippage_bps: 50,
            fee_tier: 3_000,
        }
    }

    /// Returns exactly `amount_in`.
    #[derive(Default)]
    struct ParityVenue {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SwapVenue for ParityVenue {
        fn name(&self) -> &str {
            "parity"
        }

        async fn swap(&self, request: &SwapRequest) -> Result<u128, VenueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.min_amount_out, 0);
            Ok(request.amount_in)
        }
    }

    struct FailingVenue;

    #[async_trait]
    impl SwapVenue for FailingVenue {
        fn name(&self) -> &str {
            "failing"
        }

        async fn swap(&self, _request: &SwapRequest) -> Result<u128, VenueError> {
            Err(VenueError::Rejected("pool paused".into()))
        }
    }

    /// Calls back into the engine mid-swap, then completes at parity.
    #[derive(Default)]
    struct ReentrantVenue {
        engine: OnceLock<Weak<TwapEngine>>,
        observed: StdMutex<Vec<TwapError>>,
    }

    #[async_trait]
    impl SwapVenue for ReentrantVenue {
        fn name(&self) -> &str {
            "reentrant"
        }

        async fn swap(&self, request: &SwapRequest) -> Result<u128, VenueError> {
            let engine = self
                .engine
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| VenueError::Rejected("engine gone".into()))?;
            if let Err(e) = engine.cancel_order(OrderId(0), &alice(), T0).await {
                self.observed.lock().unwrap().push(e);
            }
            if let Err(e) = engine.get_order(OrderId(0)).await {
                self.observed.lock().unwrap().push(e);
            }
            Ok(request.amount_in)
        }
    }

    /// Calls back into the engine from a spawned task and waits for it.
    #[derive(Default)]
    struct SpawningVenue {
        engine: OnceLock<Weak<TwapEngine>>,
        observed: StdMutex<Vec<TwapError>>,
    }

    #[async_trait]
    impl SwapVenue for SpawningVenue {
        fn name(&self) -> &str {
            "spawning"
        }

        async fn swap(&self, request: &SwapRequest) -> Result<u128, VenueError> {
            let engine = self
                .engine
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| VenueError::Rejected("engine gone".into()))?;
            let callback =
                tokio::spawn(async move { engine.cancel_order(OrderId(0), &alice(), T0).await });
            let result = callback
                .await
                .map_err(|e| VenueError::Rejected(e.to_string()))?;
            if let Err(e) = result {
                self.observed.lock().unwrap().push(e);
            }
            Ok(request.amount_in)
        }
    }

    /// Never answers.
    struct StalledVenue;

    #[async_trait]
    impl SwapVenue for StalledVenue {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn swap(&self, _request: &SwapRequest) -> Result<u128, VenueError> {
            std::future::pending().await
        }
    }

    /// Pulls like [`InMemoryCustody`] but refuses every push.
    struct NoPushCustody(InMemoryCustody);

    #[async_trait]
    impl CustodyTransfer for NoPushCustody {
        async fn pull_from(
            &self,
            owner: &AccountId,
            asset: &AssetId,
            amount: u128,
        ) -> Result<(), CustodyError> {
            self.0.pull_from(owner, asset, amount).await
        }

        async fn push_to(
            &self,
            _recipient: &AccountId,
            _asset: &AssetId,
            _amount: u128,
        ) -> Result<(), CustodyError> {
            Err(CustodyError::Rejected("wallet frozen".into()))
        }
    }

    async fn funded_custody(amount: u128) -> InMemoryCustody {
        let custody = InMemoryCustody::new();
        custody.mint(&alice(), &usdc(), amount).await;
        custody.approve(&alice(), &usdc(), amount).await;
        custody
    }

    fn build(
        venue: Arc<dyn SwapVenue>,
        custody: Arc<dyn CustodyTransfer>,
    ) -> (Arc<TwapEngine>, TwapEventReceiver) {
        let (engine, rx) = TwapEngine::new(
            EngineConfig::with_owner("admin"),
            "twap-vault".into(),
            venue,
            custody,
        )
        .unwrap();
        (Arc::new(engine), rx)
    }

    fn drain(rx: &mut TwapEventReceiver) -> Vec<TwapEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    async fn assert_solvent(engine: &TwapEngine) {
        assert_eq!(engine.check_solvency().await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn null_owner_is_refused() {
        let custody = Arc::new(InMemoryCustody::new());
        let result = TwapEngine::new(
            EngineConfig::with_owner(""),
            "twap-vault".into(),
            Arc::new(ParityVenue::default()),
            custody,
        );
        assert!(matches!(
            result,
            Err(TwapError::InvalidParameter(ParamError::NullOwner))
        ));
    }

    #[tokio::test]
    async fn deposit_maps_custody_failures() {
        let custody = InMemoryCustody::new();
        custody.mint(&alice(), &usdc(), 1_000).await;
        custody.approve(&alice(), &usdc(), 100).await;
        let (engine, mut rx) = build(Arc::new(ParityVenue::default()), Arc::new(custody));

        let err = engine.deposit(&alice(), &usdc(), 200).await.unwrap_err();
        assert!(matches!(
            err,
            TwapError::InsufficientAllowance { needed: 200, approved: 100, .. }
        ));
        assert_eq!(
            engine.deposit(&alice(), &usdc(), 0).await,
            Err(TwapError::InvalidParameter(ParamError::ZeroAmount))
        );
        assert!(drain(&mut rx).is_empty());

        assert_eq!(engine.deposit(&alice(), &usdc(), 100).await, Ok(100));
        assert_eq!(
            drain(&mut rx),
            vec![TwapEvent::Deposited {
                owner: alice(),
                asset: usdc(),
                amount: 100
            }]
        );
        assert_solvent(&engine).await;
    }

    #[tokio::test]
    async fn cancel_before_any_slice_refunds_everything() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(Arc::new(ParityVenue::default()), custody);

        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        assert_eq!(id, OrderId(0));
        assert_eq!(engine.ledger_balance(&alice(), &usdc()).await, Ok(0));
        assert_solvent(&engine).await;

        assert_eq!(engine.cancel_order(id, &alice(), T0).await, Ok(1_000));
        assert_eq!(engine.ledger_balance(&alice(), &usdc()).await, Ok(1_000));
        assert_eq!(engine.remaining_amount(id).await, Ok(0));
        assert_solvent(&engine).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[1],
            TwapEvent::OrderCreated { order_id: OrderId(0), slice_size: 83, .. }
        ));
        assert_eq!(
            events[2],
            TwapEvent::OrderCancelled {
                order_id: id,
                refund_amount: 1_000
            }
        );
    }

    #[tokio::test]
    async fn cancelled_order_rejects_cancel_and_execute() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();

        assert_eq!(
            engine.cancel_order(id, &"mallory".into(), T0).await,
            Err(TwapError::NotOrderCreator {
                order: id,
                caller: "mallory".into()
            })
        );
        engine.cancel_order(id, &alice(), T0).await.unwrap();
        drain(&mut rx);

        assert_eq!(
            engine.cancel_order(id, &alice(), T0).await,
            Err(TwapError::OrderCancelled(id))
        );
        assert_eq!(
            engine.execute_slice(id, T0).await,
            Err(TwapError::OrderCancelled(id))
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn five_slices_then_withdraw_everything_once() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(Arc::new(ParityVenue::default()), custody.clone());
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();

        let mut total = 0;
        for k in 0..5 {
            total += engine.execute_slice(id, T0 + k * 300).await.unwrap();
        }
        assert_eq!(total, 415);
        assert_eq!(engine.ledger_balance(&alice(), &weth()).await, Ok(415));
        assert_eq!(engine.remaining_amount(id).await, Ok(585));
        assert_solvent(&engine).await;

        assert_eq!(engine.withdraw_proceeds(id, &alice(), T0 + 1_500).await, Ok(415));
        assert_eq!(engine.ledger_balance(&alice(), &weth()).await, Ok(0));
        assert_eq!(custody.balance_of(&alice(), &weth()).await, 415);
        assert_eq!(
            engine.withdraw_proceeds(id, &alice(), T0 + 1_500).await,
            Err(TwapError::NoProceeds {
                owner: alice(),
                asset: weth()
            })
        );
        assert_solvent(&engine).await;

        let slices: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|ev| match ev {
                TwapEvent::SliceExecuted { slice_number, .. } => Some(slice_number),
                _ => None,
            })
            .collect();
        assert_eq!(slices, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn early_call_changes_nothing() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        engine.execute_slice(id, T0).await.unwrap();
        let before = engine.get_order(id).await.unwrap();
        drain(&mut rx);

        let err = engine.execute_slice(id, T0 + 299).await.unwrap_err();
        assert_eq!(
            err,
            TwapError::TooEarly {
                order: id,
                next_execution_time: T0 + 300,
                now: T0 + 299
            }
        );
        assert_eq!(engine.get_order(id).await.unwrap(), before);
        assert_eq!(before.slices_executed, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn full_run_converts_exact_total_then_stops() {
        let venue = Arc::new(ParityVenue::default());
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(venue.clone(), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();

        for k in 0..12 {
            engine.execute_slice(id, T0 + k * 300).await.unwrap();
        }
        let amounts: Vec<u128> = drain(&mut rx)
            .into_iter()
            .filter_map(|ev| match ev {
                TwapEvent::SliceExecuted { amount_in, .. } => Some(amount_in),
                _ => None,
            })
            .collect();
        assert_eq!(amounts.len(), 12);
        assert_eq!(amounts[11], 87);
        assert_eq!(amounts.iter().sum::<u128>(), 1_000);

        // still inside the duration window
        assert_eq!(
            engine.execute_slice(id, T0 + 3_400).await,
            Err(TwapError::AllSlicesExecuted(id))
        );
        assert_eq!(venue.calls.load(Ordering::SeqCst), 12);

        let order = engine.get_order(id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
        assert_eq!(order.total_out, 1_000);
        assert!(engine.active_order_ids().await.unwrap().is_empty());
        assert_eq!(engine.cancel_order(id, &alice(), T0 + 3_400).await, Ok(0));
        assert_solvent(&engine).await;
    }

    #[tokio::test]
    async fn expired_order_is_terminal() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, _rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();

        let err = engine.execute_slice(id, T0 + 3_601).await.unwrap_err();
        assert!(matches!(err, TwapError::OrderExpired { end_time, .. } if end_time == T0 + 3_600));
        assert_eq!(engine.remaining_amount(id).await, Ok(1_000));
        assert_eq!(engine.cancel_order(id, &alice(), T0 + 3_601).await, Ok(1_000));
    }

    #[tokio::test]
    async fn swap_failure_revokes_allowance_and_changes_nothing() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(Arc::new(FailingVenue), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        drain(&mut rx);

        let err = engine.execute_slice(id, T0).await.unwrap_err();
        assert_eq!(err, TwapError::SwapFailed("pool paused".into()));
        assert!(engine.state.lock().await.vault.allowance().is_none());

        let order = engine.get_order(id).await.unwrap();
        assert_eq!(order.slices_executed, 0);
        assert_eq!(order.next_execution_time, T0);
        assert_eq!(engine.ledger_balance(&alice(), &weth()).await, Ok(0));
        assert!(drain(&mut rx).is_empty());
        assert_solvent(&engine).await;
    }

    #[tokio::test]
    async fn callbacks_from_spawned_tasks_are_rejected() {
        let venue = Arc::new(SpawningVenue::default());
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, _rx) = build(venue.clone(), custody);
        venue.engine.set(Arc::downgrade(&engine)).ok();

        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        let executed = tokio::time::timeout(Duration::from_secs(2), engine.execute_slice(id, T0))
            .await
            .expect("execute_slice must not wait on its own callback");
        assert_eq!(executed, Ok(83));

        let observed = venue.observed.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![TwapError::Reentrant {
                active: "execute_slice",
                attempted: "cancel_order"
            }]
        );
        // marker is cleared once the swap returns
        assert_eq!(engine.cancel_order(id, &alice(), T0).await, Ok(917));
    }

    #[tokio::test]
    async fn abandoned_swap_clears_in_flight_marker() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(Arc::new(StalledVenue), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        drain(&mut rx);

        let stalled =
            tokio::time::timeout(Duration::from_millis(50), engine.execute_slice(id, T0)).await;
        assert!(stalled.is_err());

        let order = engine.get_order(id).await.unwrap();
        assert_eq!(order.slices_executed, 0);
        assert!(drain(&mut rx).is_empty());
        assert_solvent(&engine).await;
    }

    #[tokio::test]
    async fn lookups_fail_without_events() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, mut rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        engine.execute_slice(id, T0).await.unwrap();
        drain(&mut rx);

        assert_eq!(
            engine.execute_slice(OrderId(7), T0).await,
            Err(TwapError::OrderNotFound(OrderId(7)))
        );
        assert_eq!(
            engine.withdraw_proceeds(id, &"mallory".into(), T0).await,
            Err(TwapError::NotOrderCreator {
                order: id,
                caller: "mallory".into()
            })
        );
        assert_eq!(engine.ledger_balance(&alice(), &weth()).await, Ok(83));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn callbacks_into_the_engine_are_rejected() {
        let venue = Arc::new(ReentrantVenue::default());
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, _rx) = build(venue.clone(), custody);
        venue.engine.set(Arc::downgrade(&engine)).ok();

        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        assert_eq!(engine.execute_slice(id, T0).await, Ok(83));

        let observed = venue.observed.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![
                TwapError::Reentrant {
                    active: "execute_slice",
                    attempted: "cancel_order"
                },
                TwapError::Reentrant {
                    active: "execute_slice",
                    attempted: "get_order"
                },
            ]
        );
        let order = engine.get_order(id).await.unwrap();
        assert!(!order.cancelled);
        assert_eq!(order.slices_executed, 1);
    }

    #[tokio::test]
    async fn pause_blocks_mutations_but_not_queries() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, _rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();

        assert_eq!(
            engine.set_paused(&alice(), true).await,
            Err(TwapError::NotOwner(alice()))
        );
        engine.set_paused(&admin(), true).await.unwrap();
        assert_eq!(engine.is_paused().await, Ok(true));

        assert_eq!(engine.deposit(&alice(), &usdc(), 1).await, Err(TwapError::Paused));
        assert_eq!(
            engine.create_order(&alice(), params(1_000), T0).await,
            Err(TwapError::Paused)
        );
        assert_eq!(engine.execute_slice(id, T0).await, Err(TwapError::Paused));
        assert_eq!(engine.cancel_order(id, &alice(), T0).await, Err(TwapError::Paused));
        assert_eq!(
            engine.withdraw_proceeds(id, &alice(), T0).await,
            Err(TwapError::Paused)
        );
        assert_eq!(engine.remaining_amount(id).await, Ok(1_000));
        assert_eq!(engine.next_order_id().await, Ok(OrderId(1)));

        engine.transfer_ownership(&admin(), &"ops".into()).await.unwrap();
        assert_eq!(engine.owner().await, Ok("ops".into()));
        assert_eq!(
            engine.set_paused(&admin(), false).await,
            Err(TwapError::NotOwner(admin()))
        );
        engine.set_paused(&"ops".into(), false).await.unwrap();
        assert_eq!(engine.execute_slice(id, T0).await, Ok(83));
    }

    #[tokio::test]
    async fn withdraw_drains_proceeds_of_every_order_with_that_output() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, _rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let first = engine.create_order(&alice(), params(600), T0).await.unwrap();
        let second = engine.create_order(&alice(), params(400), T0).await.unwrap();

        assert_eq!(engine.execute_slice(first, T0).await, Ok(50));
        assert_eq!(engine.execute_slice(second, T0).await, Ok(33));

        assert_eq!(engine.withdraw_proceeds(first, &alice(), T0).await, Ok(83));
        assert!(matches!(
            engine.withdraw_proceeds(second, &alice(), T0).await,
            Err(TwapError::NoProceeds { .. })
        ));
        assert_eq!(
            engine.active_order_ids().await.unwrap(),
            vec![first, second]
        );
        assert_solvent(&engine).await;
    }

    #[tokio::test]
    async fn failed_push_leaves_proceeds_in_place() {
        let custody = Arc::new(NoPushCustody(funded_custody(1_000).await));
        let (engine, mut rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();
        engine.execute_slice(id, T0).await.unwrap();
        drain(&mut rx);

        assert_eq!(
            engine.withdraw_proceeds(id, &alice(), T0).await,
            Err(TwapError::TransferFailed("transfer rejected: wallet frozen".into()))
        );
        assert_eq!(engine.ledger_balance(&alice(), &weth()).await, Ok(83));
        assert!(drain(&mut rx).is_empty());
        assert_solvent(&engine).await;
    }

    #[tokio::test]
    async fn stale_allowance_is_revoked_before_next_grant() {
        let custody = Arc::new(funded_custody(1_000).await);
        let (engine, _rx) = build(Arc::new(ParityVenue::default()), custody);
        engine.deposit(&alice(), &usdc(), 1_000).await.unwrap();
        let id = engine.create_order(&alice(), params(1_000), T0).await.unwrap();

        engine.state.lock().await.vault.grant("parity", &usdc(), 999);
        assert_eq!(engine.execute_slice(id, T0).await, Ok(83));
        assert!(engine.state.lock().await.vault.allowance().is_none());
        assert_solvent(&engine).await;
    }
}
