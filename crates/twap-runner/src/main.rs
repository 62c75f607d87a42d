//! # twap-runner
//!
//! Main entry point for the TWAP engine.
//!
//! Loads a JSON configuration file, builds the in-process router, custody and
//! engine, seeds wallets and orders, then lets the keeper execute slices
//! until every order is finished or Ctrl+C is pressed. Proceeds are withdrawn
//! for each seeded order before exit.
//!
//! # Usage
//!
//! ```bash
//! twap-runner config.json --log-level info
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use twap_core::config::AppConfig;
use twap_core::{AccountId, AssetId, CreateOrder, OrderId, TwapError, time_util};
use twap_engine::{Keeper, TwapEngine};
use twap_venue::{InMemoryCustody, MockSwapRouter};

/// Account the router pays swap output into.
const CUSTODY_ACCOUNT: &str = "twap-engine";

/// TWAP order engine runner.
#[derive(Parser)]
#[command(name = "twap-runner", about = "TWAP order engine runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output. Overrides the config.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = twap_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    twap_core::logging::init_logging(
        &cli.log_level,
        log_dir.as_deref(),
        &config.module_name(),
        config.json_logs(),
    );
    info!(
        "twap-runner starting: config={}, log_level={}, {} wallet(s), {} order(s)",
        cli.config.display(),
        cli.log_level,
        config.wallets.len(),
        config.orders.len()
    );

    // 3. Build venue, custody and engine
    let router = Arc::new(MockSwapRouter::from_config(&config.router));
    let custody = Arc::new(InMemoryCustody::new());
    for wallet in &config.wallets {
        custody.mint(&wallet.owner, &wallet.asset, wallet.balance).await;
        if wallet.approve > 0 {
            custody.approve(&wallet.owner, &wallet.asset, wallet.approve).await;
        }
    }
    let (engine, events) = TwapEngine::new(
        config.engine.clone(),
        CUSTODY_ACCOUNT.into(),
        router,
        custody.clone(),
    )?;
    let engine = Arc::new(engine);
    if config.engine.start_paused {
        warn!("engine starts paused: seeding and execution will be rejected");
    }

    // 4. Seed orders
    let seeded = seed_orders(&engine, &config).await;
    info!("{} of {} order(s) created", seeded.len(), config.orders.len());

    // 5. Run the keeper until idle or Ctrl+C
    let keeper = Keeper::new(engine.clone());
    let keeper_config = config.keeper.clone();
    let handle = tokio::spawn(async move {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        };
        keeper.run(events, &keeper_config, shutdown).await
    });
    let summary = handle.await?;
    info!(
        "keeper finished: {} ticks, {} slices, {} failures, {} order(s) dropped",
        summary.ticks,
        summary.slices_executed,
        summary.failures,
        summary.dropped.len()
    );

    // 6. Withdraw proceeds
    let now = time_util::now_secs();
    for (id, creator) in &seeded {
        match engine.withdraw_proceeds(*id, creator, now).await {
            Ok(amount) => info!("order {id}: withdrew {amount} to {creator}"),
            Err(TwapError::NoProceeds { asset, .. }) => {
                info!("order {id}: no {asset} proceeds left for {creator}")
            }
            Err(e) => warn!("order {id}: withdrawal failed: {e}"),
        }
    }

    // 7. Final balances
    log_balances(&engine, &custody, &config).await?;
    let imbalances = engine.check_solvency().await?;
    if imbalances.is_empty() {
        info!("custody matches the books");
    } else {
        for i in &imbalances {
            error!("{}: held {} but owe {}", i.asset, i.held, i.owed);
        }
    }

    info!("twap-runner stopped");
    Ok(())
}

/// Deposit for and create every configured order. Failures are logged and
/// skipped.
async fn seed_orders(engine: &TwapEngine, config: &AppConfig) -> Vec<(OrderId, AccountId)> {
    let mut created = Vec::with_capacity(config.orders.len());
    for (idx, seed) in config.orders.iter().enumerate() {
        let deposit = seed.deposit.unwrap_or(seed.total_amount);
        if deposit > 0 {
            if let Err(e) = engine
                .deposit(&seed.creator, &seed.input_asset, deposit)
                .await
            {
                error!("orders[{idx}]: deposit of {deposit} {} failed: {e}", seed.input_asset);
                continue;
            }
        }

        let params = CreateOrder {
            input_asset: seed.input_asset.clone(),
            output_asset: seed.output_asset.clone(),
            total_amount: seed.total_amount,
            duration: seed.duration,
            interval: seed.interval,
            max_slippage_bps: seed.max_slippage_bps,
            fee_tier: seed.fee_tier,
        };
        match engine
            .create_order(&seed.creator, params, time_util::now_secs())
            .await
        {
            Ok(id) => created.push((id, seed.creator.clone())),
            Err(e) => error!("orders[{idx}]: create failed: {e}"),
        }
    }
    created
}

async fn log_balances(
    engine: &TwapEngine,
    custody: &InMemoryCustody,
    config: &AppConfig,
) -> Result<()> {
    let mut pairs: BTreeSet<(AccountId, AssetId)> = BTreeSet::new();
    for w in &config.wallets {
        pairs.insert((w.owner.clone(), w.asset.clone()));
    }
    for o in &config.orders {
        pairs.insert((o.creator.clone(), o.input_asset.clone()));
        pairs.insert((o.creator.clone(), o.output_asset.clone()));
    }

    for (owner, asset) in &pairs {
        let ledger = engine.ledger_balance(owner, asset).await?;
        let wallet = custody.balance_of(owner, asset).await;
        info!("{owner} {asset}: wallet={wallet} ledger={ledger}");
    }
    Ok(())
}
