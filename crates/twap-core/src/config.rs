//! Configuration parsing for the TWAP engine and its runner.
//!
//! Everything is read from a single JSON file. Only `engine.owner` is
//! required; every other setting has a default.
//!
//! # Example config
//!
//! ```json
//! {
//!   "TwapDesk": { "module_name": "twap", "log_path": "/tmp/log" },
//!   "engine": { "owner": "admin", "fee_tiers": [500, 3000] },
//!   "keeper": { "poll_interval_secs": 10 },
//!   "router": {
//!     "pairs": [{ "input": "USDC", "output": "WETH", "rate_num": 1, "rate_den": 2000 }],
//!     "liquidity": [{ "asset": "WETH", "amount": 100000 }]
//!   },
//!   "wallets": [{ "owner": "alice", "asset": "USDC", "balance": 1000, "approve": 1000 }],
//!   "orders": [{
//!     "creator": "alice", "input_asset": "USDC", "output_asset": "WETH",
//!     "total_amount": 1000, "duration": 60, "interval": 10,
//!     "max_slippage_bps": 50, "fee_tier": 3000
//!   }]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::types::{AccountId, AssetId};

/// Top-level application config.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    #[serde(rename = "TwapDesk", default)]
    pub meta: Option<ModuleMeta>,

    pub engine: EngineConfig,

    #[serde(default)]
    pub keeper: KeeperConfig,

    #[serde(default)]
    pub router: RouterConfig,

    /// External wallet balances to seed before anything runs.
    #[serde(default)]
    pub wallets: Vec<WalletSeed>,

    /// Orders to deposit for and create at startup.
    #[serde(default)]
    pub orders: Vec<OrderSeed>,
}

impl AppConfig {
    /// Returns the module name, defaulting to `"twap"`.
    pub fn module_name(&self) -> String {
        self.meta
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "twap".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.meta.as_ref().and_then(|m| m.log_path.clone())
    }

    /// Whether file logs should be JSON formatted.
    pub fn json_logs(&self) -> bool {
        self.meta.as_ref().and_then(|m| m.json_logs).unwrap_or(false)
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub json_logs: Option<bool>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Hard ceiling on an order's slippage tolerance (10%). Config may only
/// tighten it.
pub const MAX_SLIPPAGE_BPS: u32 = 1_000;

/// Hard ceiling on `duration / interval`. Config may only tighten it.
pub const MAX_SLICES: u64 = 1_000;

/// Engine-wide limits and venue call settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Initial holder of the pause authority.
    pub owner: AccountId,

    /// Upper bound for an order's `max_slippage_bps`, at most
    /// [`MAX_SLIPPAGE_BPS`].
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,

    /// Upper bound on `duration / interval`, at most [`MAX_SLICES`].
    #[serde(default = "default_max_slices")]
    pub max_slices: u64,

    /// Venue fee tiers an order may select.
    #[serde(default = "default_fee_tiers")]
    pub fee_tiers: Vec<u32>,

    /// Validity window handed to the venue with each swap request.
    #[serde(default = "default_swap_deadline_secs")]
    pub swap_deadline_secs: u64,

    /// Start with the pause switch engaged.
    #[serde(default)]
    pub start_paused: bool,
}

impl EngineConfig {
    /// Config with defaults for everything but the owner.
    pub fn with_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: AccountId::new(owner),
            max_slippage_bps: default_max_slippage_bps(),
            max_slices: default_max_slices(),
            fee_tiers: default_fee_tiers(),
            swap_deadline_secs: default_swap_deadline_secs(),
            start_paused: false,
        }
    }

    /// Reject settings no order could ever satisfy.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.owner.is_null() {
            bail!("engine.owner must not be empty");
        }
        if self.fee_tiers.is_empty() {
            bail!("engine.fee_tiers must list at least one tier");
        }
        if self.max_slices == 0 || self.max_slices > MAX_SLICES {
            bail!(
                "engine.max_slices {} outside 1..={MAX_SLICES}",
                self.max_slices
            );
        }
        if self.max_slippage_bps > MAX_SLIPPAGE_BPS {
            bail!(
                "engine.max_slippage_bps {} exceeds {MAX_SLIPPAGE_BPS}",
                self.max_slippage_bps
            );
        }
        Ok(())
    }

    #[inline]
    pub fn is_fee_tier_allowed(&self, tier: u32) -> bool {
        self.fee_tiers.contains(&tier)
    }
}

// ---------------------------------------------------------------------------
// Keeper
// ---------------------------------------------------------------------------

/// Monitoring loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Seconds between eligibility sweeps.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Stop once no tracked order can make progress.
    #[serde(default = "default_true")]
    pub exit_when_idle: bool,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            exit_when_idle: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Router (in-process venue)
// ---------------------------------------------------------------------------

/// Fixed-rate pairs and starting liquidity for the in-process venue.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub pairs: Vec<PairConfig>,
    #[serde(default)]
    pub liquidity: Vec<LiquiditySeed>,
}

/// `amount_out = amount_in * rate_num / rate_den`, before fees.
#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub input: AssetId,
    pub output: AssetId,
    pub rate_num: u128,
    pub rate_den: u128,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiquiditySeed {
    pub asset: AssetId,
    pub amount: u128,
}

// ---------------------------------------------------------------------------
// Seeds
// ---------------------------------------------------------------------------

/// An external wallet balance plus the allowance granted to the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletSeed {
    pub owner: AccountId,
    pub asset: AssetId,
    pub balance: u128,
    #[serde(default)]
    pub approve: u128,
}

/// An order created at startup. `deposit` defaults to `total_amount`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSeed {
    pub creator: AccountId,
    pub input_asset: AssetId,
    pub output_asset: AssetId,
    pub total_amount: u128,
    pub duration: u64,
    pub interval: u64,
    #[serde(default)]
    pub max_slippage_bps: u32,
    #[serde(default = "default_fee_tier")]
    pub fee_tier: u32,
    pub deposit: Option<u128>,
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_max_slippage_bps() -> u32 {
    MAX_SLIPPAGE_BPS
}

fn default_max_slices() -> u64 {
    MAX_SLICES
}

fn default_fee_tiers() -> Vec<u32> {
    vec![100, 500, 3_000, 10_000]
}

fn default_fee_tier() -> u32 {
    3_000
}

fn default_swap_deadline_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

/// Load and parse a JSON config file.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config.engine.validate()?;
    Ok(config)
}
