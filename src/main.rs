use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tradesim::config::EngineConfig;
use tradesim::feed::PriceFeedBridge;
use tradesim::ledger::PositionLedger;
use tradesim::market::{CandleAggregator, PriceStore};
use tradesim::models::AssetCatalog;
use tradesim::snapshot::{SnapshotManager, SnapshotStore};

/// Simulated leveraged-trading ledger & market-data engine.
#[derive(Parser, Debug)]
#[command(name = "tradesim")]
struct Args {
    /// Redis URL (overrides REDIS_URL)
    #[arg(long)]
    redis_url: Option<String>,

    /// Price feed pub/sub channel (overrides PRICES_CHANNEL)
    #[arg(long)]
    channel: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let mut config = EngineConfig::from_env();
    if let Some(url) = args.redis_url {
        config.redis_url = url;
    }
    if let Some(channel) = args.channel {
        config.prices_channel = channel;
    }

    tracing::info!("tradesim engine starting");
    tracing::info!("  Redis: {}", config.redis_url);
    tracing::info!("  Price channel: {}", config.prices_channel);
    tracing::info!("  Starting balance: {} cents", config.starting_balance);
    tracing::info!(
        "  Leverage bounds: [{}, {}]",
        config.min_leverage,
        config.max_leverage
    );

    let catalog = AssetCatalog::default_universe();
    let prices = PriceStore::new();
    let candles = CandleAggregator::new(config.candle_max_bars, config.candle_warmup_bars);
    let ledger = Arc::new(PositionLedger::new(
        catalog.clone(),
        prices.clone(),
        config.ledger(),
    ));

    // Restore prior state (or persist a baseline) before anything trades.
    let store = SnapshotStore::redis(&config.redis_url).await?;
    let (mut manager, snapshots) = SnapshotManager::new(
        prices.clone(),
        ledger.clone(),
        store,
        Duration::from_millis(config.snapshot_debounce_ms),
    );
    manager.load_and_ensure().await?;
    tracing::info!(
        "  Restored {} quotes, {} open positions",
        prices.symbols().len(),
        ledger.dump_open_positions().len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bridge = PriceFeedBridge::new(
        &config.redis_url,
        &config.prices_channel,
        prices.clone(),
        candles.clone(),
        snapshots.clone(),
        shutdown_rx,
    )?;

    let snapshot_task = tokio::spawn(manager.run());
    let feed_task = tokio::spawn(bridge.run());
    tracing::info!("Price feed and snapshot loops running. Press Ctrl+C to stop...");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down...");

    let _ = shutdown_tx.send(true);
    feed_task.await?;

    // Dropping the last handle lets the snapshot task flush and exit.
    drop(snapshots);
    snapshot_task.await?;

    tracing::info!("tradesim stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("tradesim=info")
        .init();
}
