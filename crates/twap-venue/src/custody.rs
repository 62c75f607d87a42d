//! In-memory custody transfers.
//!
//! Models external wallets (per-`(owner, asset)` balances) and the allowance
//! each owner grants the engine. `pull_from` spends allowance before balance,
//! the way token contracts order their checks, and moves nothing on failure.

use ahash::AHashMap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use twap_core::{AccountId, AssetId};

use crate::{CustodyError, CustodyTransfer};

#[derive(Debug, Default)]
struct Wallets {
    balances: AHashMap<(AccountId, AssetId), u128>,
    allowances: AHashMap<(AccountId, AssetId), u128>,
}

/// Wallet balances and engine allowances held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    wallets: Mutex<Wallets>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an external wallet out of thin air.
    pub async fn mint(&self, owner: &AccountId, asset: &AssetId, amount: u128) {
        let mut w = self.wallets.lock().await;
        let slot = w.balances.entry((owner.clone(), asset.clone())).or_insert(0);
        *slot = slot.saturating_add(amount);
        debug!("[custody] minted {amount} {asset} to {owner}");
    }

    /// Set the allowance `owner` grants the engine for `asset`.
    pub async fn approve(&self, owner: &AccountId, asset: &AssetId, amount: u128) {
        let mut w = self.wallets.lock().await;
        w.allowances.insert((owner.clone(), asset.clone()), amount);
        debug!("[custody] {owner} approved {amount} {asset}");
    }

    /// External wallet balance.
    pub async fn balance_of(&self, owner: &AccountId, asset: &AssetId) -> u128 {
        let w = self.wallets.lock().await;
        w.balances
            .get(&(owner.clone(), asset.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Remaining allowance granted to the engine.
    pub async fn allowance(&self, owner: &AccountId, asset: &AssetId) -> u128 {
        let w = self.wallets.lock().await;
        w.allowances
            .get(&(owner.clone(), asset.clone()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CustodyTransfer for InMemoryCustody {
    async fn pull_from(
        &self,
        owner: &AccountId,
        asset: &AssetId,
        amount: u128,
    ) -> Result<(), CustodyError> {
        let mut w = self.wallets.lock().await;
        let key = (owner.clone(), asset.clone());

        let approved = w.allowances.get(&key).copied().unwrap_or(0);
        if approved < amount {
            return Err(CustodyError::InsufficientAllowance {
                owner: owner.clone(),
                asset: asset.clone(),
                needed: amount,
                approved,
            });
        }
        let available = w.balances.get(&key).copied().unwrap_or(0);
        if available < amount {
            return Err(CustodyError::InsufficientBalance {
                owner: owner.clone(),
                asset: asset.clone(),
                needed: amount,
                available,
            });
        }

        w.allowances.insert(key.clone(), approved - amount);
        w.balances.insert(key, available - amount);
        info!("[custody] pulled {amount} {asset} from {owner}");
        Ok(())
    }

    async fn push_to(
        &self,
        recipient: &AccountId,
        asset: &AssetId,
        amount: u128,
    ) -> Result<(), CustodyError> {
        if recipient.is_null() {
            return Err(CustodyError::Rejected("transfer to the null account".into()));
        }
        let mut w = self.wallets.lock().await;
        let slot = w
            .balances
            .entry((recipient.clone(), asset.clone()))
            .or_insert(0);
        *slot = slot
            .checked_add(amount)
            .ok_or_else(|| CustodyError::Rejected("recipient balance overflow".into()))?;
        info!("[custody] pushed {amount} {asset} to {recipient}");
        Ok(())
    }
}
