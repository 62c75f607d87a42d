//! Engine-held custody.
//!
//! The ledger says who is owed what; the vault says what the engine actually
//! holds, per asset, plus the one temporary allowance granted to the venue
//! while a slice is in flight.
//!
//! Movements:
//!
//! | Operation         | Holdings                                      |
//! |-------------------|-----------------------------------------------|
//! | deposit           | `+amount` of the deposited asset              |
//! | successful swap   | `-amount_in` input, `+amount_out` output      |
//! | proceeds withdraw | `-amount` of the withdrawn asset              |

use ahash::AHashMap;
use twap_core::{AssetId, TwapError, TwapResult};

/// Permission for the venue to pull `amount` of `asset` during one swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub spender: String,
    pub asset: AssetId,
    pub amount: u128,
}

#[derive(Debug, Default)]
pub struct Vault {
    holdings: AHashMap<AssetId, u128>,
    allowance: Option<Allowance>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount of `asset` physically held.
    #[inline]
    pub fn holding(&self, asset: &AssetId) -> u128 {
        self.holdings.get(asset).copied().unwrap_or(0)
    }

    /// Every asset with a non-zero holding.
    pub fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.holdings.keys()
    }

    /// The allowance currently granted, if any.
    pub fn allowance(&self) -> Option<&Allowance> {
        self.allowance.as_ref()
    }

    /// Grant the venue permission to pull `amount` of `asset`.
    ///
    /// Returns any previous allowance that was still outstanding; it is
    /// replaced.
    pub fn grant(&mut self, spender: &str, asset: &AssetId, amount: u128) -> Option<Allowance> {
        self.allowance.replace(Allowance {
            spender: spender.to_string(),
            asset: asset.clone(),
            amount,
        })
    }

    /// Withdraw any outstanding allowance.
    pub fn revoke(&mut self) -> Option<Allowance> {
        self.allowance.take()
    }

    pub fn check_receive(&self, asset: &AssetId, amount: u128) -> TwapResult<()> {
        self.holding(asset)
            .checked_add(amount)
            .map(|_| ())
            .ok_or(TwapError::Overflow("vault receive"))
    }

    pub fn check_release(&self, asset: &AssetId, amount: u128) -> TwapResult<()> {
        self.holding(asset)
            .checked_sub(amount)
            .map(|_| ())
            .ok_or(TwapError::Custody("release exceeds holdings"))
    }

    /// Add funds that arrived in custody.
    pub fn receive(&mut self, asset: &AssetId, amount: u128) -> TwapResult<()> {
        self.check_receive(asset, amount)?;
        *self.holdings.entry(asset.clone()).or_insert(0) += amount;
        Ok(())
    }

    /// Remove funds that left custody.
    pub fn release(&mut self, asset: &AssetId, amount: u128) -> TwapResult<()> {
        self.check_release(asset, amount)?;
        let left = self.holding(asset) - amount;
        if left == 0 {
            self.holdings.remove(asset);
        } else {
            self.holdings.insert(asset.clone(), left);
        }
        Ok(())
    }

    /// Verify a swap could be settled without touching anything.
    pub fn check_settle(
        &self,
        input: &AssetId,
        amount_in: u128,
        output: &AssetId,
        amount_out: u128,
    ) -> TwapResult<()> {
        match &self.allowance {
            Some(a) if a.asset == *input && a.amount >= amount_in => {}
            _ => return Err(TwapError::Custody("no matching venue allowance")),
        }
        self.check_release(input, amount_in)?;
        self.check_receive(output, amount_out)
    }

    /// Book a completed swap: consume the allowance, pay out the input, take
    /// in the output.
    pub fn settle_swap(
        &mut self,
        input: &AssetId,
        amount_in: u128,
        output: &AssetId,
        amount_out: u128,
    ) -> TwapResult<()> {
        self.check_settle(input, amount_in, output, amount_out)?;
        self.allowance = None;
        self.release(input, amount_in)?;
        if amount_out > 0 {
            self.receive(output, amount_out)?;
        }
        Ok(())
    }
}
