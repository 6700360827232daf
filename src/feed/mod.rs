//! Inbound price stream: Redis pub/sub → PriceStore + CandleAggregator.
//!
//! The upstream relay publishes batches of `{asset, price, decimal}` triples
//! in a handful of envelope shapes. Every shape normalizes to one internal
//! list before any state is touched; malformed payloads or elements are
//! dropped, never crash the bridge.

use crate::market::{CandleAggregator, PriceStore};
use crate::money::{parse_scaled, pow10, MAX_DECIMALS};
use crate::snapshot::SnapshotHandle;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RawUpdate {
    asset: String,
    price: PriceField,
    decimal: u32,
}

/// The relay sends scaled prices as either a JSON integer or a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceField {
    Num(i64),
    Str(String),
}

impl PriceField {
    fn to_scaled(&self) -> Option<i128> {
        match self {
            Self::Num(n) => Some(*n as i128),
            Self::Str(s) => parse_scaled(s).ok(),
        }
    }
}

/// Pull the batch array out of any tolerated envelope shape.
fn batch_entries(raw: &Value) -> Option<&Vec<Value>> {
    if let Some(arr) = raw.as_array() {
        return Some(arr);
    }
    for key in ["price_updates", "updates", "ticks"] {
        if let Some(arr) = raw.get(key).and_then(Value::as_array) {
            return Some(arr);
        }
    }
    None
}

/// Apply one payload to the stores. Returns how many entries were applied;
/// the caller schedules a single snapshot save iff that is non-zero.
///
/// Each element is decoded independently so one bad record only drops
/// itself. Feeding the same malformed payload any number of times changes
/// no observable state.
pub fn apply_batch(
    prices: &PriceStore,
    candles: &CandleAggregator,
    payload: &str,
    at_ms: i64,
) -> usize {
    let raw: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("dropping non-JSON price payload: {e}");
            return 0;
        }
    };
    let Some(entries) = batch_entries(&raw) else {
        tracing::debug!("dropping price payload with unknown envelope shape");
        return 0;
    };

    let mut applied = 0;
    for entry in entries {
        let update = match serde_json::from_value::<RawUpdate>(entry.clone()) {
            Ok(u) => u,
            Err(e) => {
                tracing::debug!("dropping malformed price entry: {e}");
                continue;
            }
        };
        let Some(scaled) = update.price.to_scaled() else {
            tracing::debug!(asset = %update.asset, "dropping non-integer price entry");
            continue;
        };
        // wire scale is untrusted; past MAX_DECIMALS 10^n no longer fits
        if update.decimal > MAX_DECIMALS {
            tracing::debug!(
                asset = %update.asset,
                decimal = update.decimal,
                "dropping price entry with out-of-range scale"
            );
            continue;
        }

        prices.set_price(&update.asset, scaled, update.decimal);
        // chart path only; money math never sees this float
        let human = scaled as f64 / pow10(update.decimal) as f64;
        candles.record_tick(&update.asset, human, at_ms);
        applied += 1;
    }
    applied
}

/// Subscribes to the relay's price channel and fans ticks out to the price
/// store and candle aggregator, with capped-exponential reconnects.
pub struct PriceFeedBridge {
    client: redis::Client,
    channel: String,
    prices: PriceStore,
    candles: CandleAggregator,
    snapshots: SnapshotHandle,
    shutdown: watch::Receiver<bool>,
}

impl PriceFeedBridge {
    pub fn new(
        redis_url: &str,
        channel: &str,
        prices: PriceStore,
        candles: CandleAggregator,
        snapshots: SnapshotHandle,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            channel: channel.to_string(),
            prices,
            candles,
            snapshots,
            shutdown,
        })
    }

    /// Subscribe/recv loop. Runs until shutdown is signalled. Each
    /// reconnect builds a fresh pub/sub connection, so subscriptions are
    /// never duplicated and dead sockets are dropped with their connection.
    pub async fn run(self) {
        let mut shutdown = self.shutdown.clone();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.subscribe_and_pump(&mut shutdown).await {
                Ok(()) => break, // clean shutdown
                Err(e) => {
                    tracing::warn!("price feed connection lost: {e}; retrying in {backoff:?}");
                }
            }

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown.changed() => break,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        tracing::info!("price feed bridge stopped");
    }

    async fn subscribe_and_pump(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), redis::RedisError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        tracing::info!(channel = %self.channel, "subscribed to price feed");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(redis::RedisError::from((
                            redis::ErrorKind::IoError,
                            "pub/sub stream ended",
                        )));
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!("dropping undecodable pub/sub message: {e}");
                            continue;
                        }
                    };
                    let applied = apply_batch(
                        &self.prices,
                        &self.candles,
                        &payload,
                        Utc::now().timestamp_millis(),
                    );
                    if applied > 0 {
                        // one save per batch, not per entry
                        self.snapshots.schedule_save();
                    }
                }
            }
        }
    }
}
