//! Custodial balance ledger.
//!
//! Tracks funds the engine holds on behalf of each `(owner, asset)` pair,
//! separate from anything in the owner's external wallet. All mutation goes
//! through [`Ledger::deposit`], [`Ledger::reserve`], [`Ledger::credit`], and
//! [`Ledger::debit_all`]; each checks the pre-mutation value and leaves the
//! entry untouched on failure, so a balance can never go negative or wrap.
//!
//! The ledger knows nothing about orders.

use ahash::AHashMap;

use crate::error::{ParamError, TwapError, TwapResult};
use crate::types::{AccountId, AssetId};

/// Two-key balance map: `(owner, asset) → amount`.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    balances: AHashMap<(AccountId, AssetId), u128>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance, zero for entries never touched.
    #[inline]
    pub fn balance(&self, owner: &AccountId, asset: &AssetId) -> u128 {
        self.balances
            .get(&(owner.clone(), asset.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Add externally pulled funds.
    pub fn deposit(&mut self, owner: &AccountId, asset: &AssetId, amount: u128) -> TwapResult<u128> {
        self.increase(owner, asset, amount, "ledger deposit")
    }

    /// Add refunds or slice proceeds.
    pub fn credit(&mut self, owner: &AccountId, asset: &AssetId, amount: u128) -> TwapResult<u128> {
        self.increase(owner, asset, amount, "ledger credit")
    }

    /// Earmark `amount` for an order. Fails with
    /// [`TwapError::InsufficientBalance`] if the balance is too small.
    pub fn reserve(&mut self, owner: &AccountId, asset: &AssetId, amount: u128) -> TwapResult<u128> {
        if amount == 0 {
            return Err(ParamError::ZeroAmount.into());
        }
        let available = self.balance(owner, asset);
        let Some(updated) = available.checked_sub(amount) else {
            return Err(TwapError::InsufficientBalance {
                owner: owner.clone(),
                asset: asset.clone(),
                needed: amount,
                available,
            });
        };
        self.store(owner, asset, updated);
        Ok(updated)
    }

    /// Zero the entry and return what it held (possibly zero).
    pub fn debit_all(&mut self, owner: &AccountId, asset: &AssetId) -> u128 {
        self.balances
            .remove(&(owner.clone(), asset.clone()))
            .unwrap_or(0)
    }

    /// Assets with at least one non-zero entry. May repeat an asset.
    pub fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.balances.keys().map(|(_, asset)| asset)
    }

    /// Sum of every owner's balance in `asset`.
    pub fn total_for_asset(&self, asset: &AssetId) -> u128 {
        self.balances
            .iter()
            .filter(|((_, a), _)| a == asset)
            .map(|(_, v)| *v)
            .sum()
    }

    fn increase(
        &mut self,
        owner: &AccountId,
        asset: &AssetId,
        amount: u128,
        op: &'static str,
    ) -> TwapResult<u128> {
        if amount == 0 {
            return Err(ParamError::ZeroAmount.into());
        }
        let updated = self
            .balance(owner, asset)
            .checked_add(amount)
            .ok_or(TwapError::Overflow(op))?;
        self.store(owner, asset, updated);
        Ok(updated)
    }

    fn store(&mut self, owner: &AccountId, asset: &AssetId, amount: u128) {
        let key = (owner.clone(), asset.clone());
        if amount == 0 {
            self.balances.remove(&key);
        } else {
            self.balances.insert(key, amount);
        }
    }
}
