//! In-process swap router.
//!
//! Quotes each supported pair at a fixed rate, takes the fee tier off the
//! output, and pays out of a liquidity pool that must be funded up front.
//! Input received from a swap is added to the pool, so a router funded on
//! both sides can serve reverse swaps too.
//!
//! ```text
//! gross = amount_in * rate_num / rate_den
//! out   = gross * (1_000_000 - fee_tier) / 1_000_000
//! ```

use ahash::AHashMap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use twap_core::AssetId;
use twap_core::config::RouterConfig;
use twap_core::time_util;

use crate::{SwapRequest, SwapVenue, VenueError};

/// Fee tiers are expressed in hundredths of a basis point.
const FEE_DENOMINATOR: u128 = 1_000_000;

/// Fixed-rate router backed by a funded liquidity pool.
pub struct MockSwapRouter {
    name: String,
    /// `(input, output) → (rate_num, rate_den)`.
    pairs: AHashMap<(AssetId, AssetId), (u128, u128)>,
    liquidity: Mutex<AHashMap<AssetId, u128>>,
    /// Source of "venue time" for deadline checks.
    clock: fn() -> u64,
}

impl MockSwapRouter {
    /// Create an empty router with no pairs and no liquidity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pairs: AHashMap::new(),
            liquidity: Mutex::new(AHashMap::new()),
            clock: time_util::now_secs,
        }
    }

    /// Build a router from the `router` config block.
    pub fn from_config(config: &RouterConfig) -> Self {
        let mut router = Self::new("mock-router");
        for pair in &config.pairs {
            router.add_pair(pair.input.clone(), pair.output.clone(), pair.rate_num, pair.rate_den);
        }
        let pool = router.liquidity.get_mut();
        for seed in &config.liquidity {
            let slot = pool.entry(seed.asset.clone()).or_insert(0);
            *slot = slot.saturating_add(seed.amount);
        }
        router
    }

    /// Replace the clock used for deadline checks.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// Register a one-directional pair. A zero denominator is ignored.
    pub fn add_pair(&mut self, input: AssetId, output: AssetId, rate_num: u128, rate_den: u128) {
        if rate_den == 0 {
            warn!("[router] ignoring {input}->{output}: zero rate denominator");
            return;
        }
        self.pairs.insert((input, output), (rate_num, rate_den));
    }

    /// Add liquidity for `asset`.
    pub async fn fund(&self, asset: &AssetId, amount: u128) {
        let mut pool = self.liquidity.lock().await;
        let slot = pool.entry(asset.clone()).or_insert(0);
        *slot = slot.saturating_add(amount);
        info!("[router] funded {amount} {asset} (pool {})", *slot);
    }

    /// Liquidity currently available in `asset`.
    pub async fn liquidity(&self, asset: &AssetId) -> u128 {
        self.liquidity.lock().await.get(asset).copied().unwrap_or(0)
    }

    /// Price a request without touching liquidity.
    pub fn quote(&self, request: &SwapRequest) -> Result<u128, VenueError> {
        let key = (request.input_asset.clone(), request.output_asset.clone());
        let Some(&(num, den)) = self.pairs.get(&key) else {
            return Err(VenueError::UnsupportedPair {
                input: request.input_asset.clone(),
                output: request.output_asset.clone(),
            });
        };
        let fee = u128::from(request.fee_tier);
        if fee >= FEE_DENOMINATOR {
            return Err(VenueError::Rejected(format!("fee tier {fee} too large")));
        }
        let out = request
            .amount_in
            .checked_mul(num)
            .map(|g| g / den)
            .and_then(|g| g.checked_mul(FEE_DENOMINATOR - fee))
            .map(|n| n / FEE_DENOMINATOR)
            .ok_or_else(|| VenueError::Rejected("quote overflow".into()))?;
        if out == 0 {
            return Err(VenueError::ZeroOutput);
        }
        Ok(out)
    }
}

#[async_trait]
impl SwapVenue for MockSwapRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn swap(&self, request: &SwapRequest) -> Result<u128, VenueError> {
        let now = (self.clock)();
        if now > request.deadline {
            return Err(VenueError::DeadlineExpired {
                deadline: request.deadline,
                now,
            });
        }

        let amount_out = self.quote(request)?;
        if amount_out < request.min_amount_out {
            return Err(VenueError::BelowMinimum {
                amount_out,
                min_amount_out: request.min_amount_out,
            });
        }

        let mut pool = self.liquidity.lock().await;
        let available = pool.get(&request.output_asset).copied().unwrap_or(0);
        if available < amount_out {
            return Err(VenueError::InsufficientLiquidity {
                asset: request.output_asset.clone(),
                needed: amount_out,
                available,
            });
        }
        pool.insert(request.output_asset.clone(), available - amount_out);
        let input_pool = pool.entry(request.input_asset.clone()).or_insert(0);
        *input_pool = input_pool.saturating_add(request.amount_in);

        info!(
            "[router] {} {} → {} {} (fee tier {})",
            request.amount_in,
            request.input_asset,
            amount_out,
            request.output_asset,
            request.fee_tier,
        );
        Ok(amount_out)
    }
}
