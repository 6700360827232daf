//! Debounced engine-state checkpointing.
//!
//! The whole engine (quotes, balances, open positions) serializes into one
//! JSON document with every scaled integer encoded as a decimal string, so a
//! restore is bit-exact. Saves are debounced: bursts of trades or price
//! batches coalesce into a single write.

use crate::error::EngineError;
use crate::ledger::PositionLedger;
use crate::market::PriceStore;
use crate::models::{Position, Side};
use crate::money::{parse_scaled, MAX_DECIMALS};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

/// Fixed key the snapshot is upserted under.
const SNAPSHOT_KEY: &str = "engine_state";

// ---- persisted schema (decimal strings, never floats) ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotQuote {
    pub price: String,
    pub decimal: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotBalance {
    pub total: String,
    pub locked: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOrder {
    pub order_id: String,
    pub email: String,
    pub asset: String,
    pub side: Side,
    pub margin: String,
    pub leverage: u32,
    pub entry_price: String,
    pub asset_decimals: u32,
}

/// Point-in-time serialization of the whole engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineSnapshot {
    pub prices: BTreeMap<String, SnapshotQuote>,
    pub balances: BTreeMap<String, SnapshotBalance>,
    #[serde(rename = "openOrders")]
    pub open_orders: BTreeMap<String, SnapshotOrder>,
}

/// Serialize the current engine state.
pub fn dump(prices: &PriceStore, ledger: &PositionLedger) -> EngineSnapshot {
    let mut snapshot = EngineSnapshot::default();

    for quote in prices.dump() {
        snapshot.prices.insert(
            quote.symbol,
            SnapshotQuote {
                price: quote.price.to_string(),
                decimal: quote.decimals,
            },
        );
    }

    for (email, total, locked) in ledger.dump_balances() {
        snapshot.balances.insert(
            email,
            SnapshotBalance {
                total: total.to_string(),
                locked: locked.to_string(),
            },
        );
    }

    for position in ledger.dump_open_positions() {
        snapshot.open_orders.insert(
            position.order_id.to_string(),
            SnapshotOrder {
                order_id: position.order_id.to_string(),
                email: position.email,
                asset: position.symbol,
                side: position.side,
                margin: position.margin.to_string(),
                leverage: position.leverage,
                entry_price: position.entry_price.to_string(),
                asset_decimals: position.asset_decimals,
            },
        );
    }

    snapshot
}

/// Rebuild PriceStore and PositionLedger state from a parsed snapshot
/// document. Malformed entries are skipped with a warning; one bad record
/// never aborts the whole restore.
pub fn restore(raw: &Value, prices: &PriceStore, ledger: &PositionLedger) {
    for (symbol, entry) in object_entries(raw, "prices") {
        match serde_json::from_value::<SnapshotQuote>(entry.clone())
            .map_err(|e| e.to_string())
            .and_then(|q| {
                if q.decimal > MAX_DECIMALS {
                    return Err(format!("scale {} out of range", q.decimal));
                }
                parse_scaled(&q.price)
                    .map(|p| (p, q.decimal))
                    .map_err(|e| e.to_string())
            }) {
            Ok((price, decimal)) => prices.set_price(&symbol, price, decimal),
            Err(e) => tracing::warn!(symbol = %symbol, error = %e, "skipping malformed snapshot quote"),
        }
    }

    for (email, entry) in object_entries(raw, "balances") {
        let parsed = serde_json::from_value::<SnapshotBalance>(entry.clone())
            .map_err(|e| e.to_string())
            .and_then(|b| {
                Ok((
                    parse_scaled(&b.total).map_err(|e| e.to_string())?,
                    parse_scaled(&b.locked).map_err(|e| e.to_string())?,
                ))
            });
        match parsed {
            Ok((total, locked)) => ledger.restore_balance(&email, total, locked),
            Err(e) => tracing::warn!(email = %email, error = %e, "skipping malformed snapshot balance"),
        }
    }

    for (id, entry) in object_entries(raw, "openOrders") {
        match decode_order(&entry) {
            Ok(position) => ledger.restore_position(position),
            Err(e) => tracing::warn!(id = %id, error = %e, "skipping malformed snapshot order"),
        }
    }
}

fn object_entries(raw: &Value, field: &str) -> Vec<(String, Value)> {
    raw.get(field)
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn decode_order(entry: &Value) -> Result<Position, String> {
    let order: SnapshotOrder =
        serde_json::from_value(entry.clone()).map_err(|e| e.to_string())?;
    Ok(Position {
        order_id: Uuid::parse_str(&order.order_id).map_err(|e| e.to_string())?,
        email: order.email,
        symbol: order.asset,
        side: order.side,
        margin: parse_scaled(&order.margin).map_err(|e| e.to_string())?,
        leverage: order.leverage,
        entry_price: parse_scaled(&order.entry_price).map_err(|e| e.to_string())?,
        asset_decimals: order.asset_decimals,
        opened_at: Utc::now(), // open time is not part of the persisted schema
    })
}

// ---- durable stores ----

/// Where snapshots live. One enum so the debounce task owns a single
/// concrete store; the in-memory variant backs tests.
pub enum SnapshotStore {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<Option<String>>>),
}

impl SnapshotStore {
    /// Connect the Redis-backed store.
    pub async fn redis(redis_url: &str) -> Result<Self, EngineError> {
        let client = Client::open(redis_url)?;
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                EngineError::Persistence(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "redis connection timeout after 5 seconds",
                )))
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);
        Ok(Self::Redis(conn))
    }

    /// In-memory store; the returned cell can be inspected by tests.
    pub fn memory() -> (Self, Arc<Mutex<Option<String>>>) {
        let cell = Arc::new(Mutex::new(None));
        (Self::Memory(cell.clone()), cell)
    }

    async fn save(&mut self, payload: &str) -> Result<(), EngineError> {
        match self {
            Self::Redis(conn) => {
                conn.set::<_, _, ()>(SNAPSHOT_KEY, payload).await?;
                Ok(())
            }
            Self::Memory(cell) => {
                *cell.lock().unwrap_or_else(|e| e.into_inner()) = Some(payload.to_string());
                Ok(())
            }
        }
    }

    async fn load(&mut self) -> Result<Option<String>, EngineError> {
        match self {
            Self::Redis(conn) => Ok(conn.get::<_, Option<String>>(SNAPSHOT_KEY).await?),
            Self::Memory(cell) => Ok(cell.lock().unwrap_or_else(|e| e.into_inner()).clone()),
        }
    }
}

// ---- debounced manager ----

/// Cheap cloneable handle for requesting a save. Requests within the
/// debounce window coalesce into one write.
#[derive(Clone)]
pub struct SnapshotHandle {
    tx: mpsc::Sender<()>,
}

impl SnapshotHandle {
    /// Arm or re-arm the debounce timer. Non-blocking: a full queue means a
    /// save is already pending, which is exactly what we want.
    pub fn schedule_save(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Owns the debounce timer and the durable store; the single writer of
/// snapshots. Runs until every [`SnapshotHandle`] is dropped, then flushes
/// one last time.
pub struct SnapshotManager {
    prices: PriceStore,
    ledger: Arc<PositionLedger>,
    store: SnapshotStore,
    debounce: Duration,
    rx: mpsc::Receiver<()>,
}

impl SnapshotManager {
    pub fn new(
        prices: PriceStore,
        ledger: Arc<PositionLedger>,
        store: SnapshotStore,
        debounce: Duration,
    ) -> (Self, SnapshotHandle) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                prices,
                ledger,
                store,
                debounce,
                rx,
            },
            SnapshotHandle { tx },
        )
    }

    /// Startup: restore a prior snapshot, or persist a baseline so a crash
    /// before the first trade still leaves a recoverable checkpoint.
    pub async fn load_and_ensure(&mut self) -> Result<(), EngineError> {
        match self.store.load().await? {
            Some(payload) => match serde_json::from_str::<Value>(&payload) {
                Ok(raw) => {
                    restore(&raw, &self.prices, &self.ledger);
                    tracing::info!("restored engine state from snapshot");
                }
                Err(e) => {
                    tracing::error!("snapshot payload is not valid JSON, starting fresh: {e}");
                    self.persist_now().await?;
                }
            },
            None => {
                tracing::info!("no snapshot found, persisting baseline");
                self.persist_now().await?;
            }
        }
        Ok(())
    }

    /// Serialize and upsert the full engine state.
    pub async fn persist_now(&mut self) -> Result<(), EngineError> {
        let snapshot = dump(&self.prices, &self.ledger);
        let payload = serde_json::to_string(&snapshot)
            .map_err(|e| EngineError::MessageParse(e.to_string()))?;
        self.store.save(&payload).await?;
        tracing::debug!(bytes = payload.len(), "persisted engine snapshot");
        Ok(())
    }

    /// Debounce loop. Each save request opens (or re-arms) a window; the
    /// write happens once the window goes quiet. A failed write is logged
    /// and retried on the next request, never surfaced to a trading caller.
    pub async fn run(mut self) {
        while self.rx.recv().await.is_some() {
            loop {
                tokio::select! {
                    _ = sleep(self.debounce) => break,
                    more = self.rx.recv() => {
                        if more.is_none() {
                            break;
                        }
                        // another request inside the window: re-arm
                    }
                }
            }
            if let Err(e) = self.persist_now().await {
                tracing::error!("snapshot persist failed, retrying on next save: {e}");
            }
        }

        // all handles dropped: final flush on shutdown
        if let Err(e) = self.persist_now().await {
            tracing::warn!("final snapshot flush failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerConfig;
    use crate::models::{Asset, AssetCatalog};

    fn catalog() -> AssetCatalog {
        AssetCatalog::new(vec![Asset {
            symbol: "BTC".to_string(),
            decimals: 2,
        }])
    }

    fn populated() -> (PriceStore, Arc<PositionLedger>) {
        let prices = PriceStore::new();
        prices.set_price("BTC", 6_000_000, 2);
        let ledger = Arc::new(PositionLedger::new(
            catalog(),
            prices.clone(),
            LedgerConfig::default(),
        ));
        ledger
            .open_trade("a@x.com", "BTC", Side::Long, 10_000, 10)
            .unwrap();
        (prices, ledger)
    }

    #[test]
    fn test_dump_uses_decimal_strings() {
        let (prices, ledger) = populated();
        let snapshot = dump(&prices, &ledger);

        assert_eq!(snapshot.prices["BTC"].price, "6000000");
        assert_eq!(snapshot.balances["a@x.com"].total, "1000000");
        assert_eq!(snapshot.balances["a@x.com"].locked, "10000");

        let order = snapshot.open_orders.values().next().unwrap();
        assert_eq!(order.margin, "10000");
        assert_eq!(order.entry_price, "6000000");

        // wire shape: camelCase keys, no floats for money
        let json = serde_json::to_value(&snapshot).unwrap();
        let order_json = json["openOrders"]
            .as_object()
            .unwrap()
            .values()
            .next()
            .unwrap();
        assert!(order_json.get("entryPrice").unwrap().is_string());
        assert!(order_json.get("assetDecimals").unwrap().is_number());
        assert_eq!(order_json["side"], "LONG");
    }

    #[test]
    fn test_restore_round_trip_is_string_exact() {
        let (prices, ledger) = populated();
        let original = dump(&prices, &ledger);
        let raw: Value = serde_json::to_value(&original).unwrap();

        let prices2 = PriceStore::new();
        let ledger2 = Arc::new(PositionLedger::new(
            catalog(),
            prices2.clone(),
            LedgerConfig::default(),
        ));
        restore(&raw, &prices2, &ledger2);

        assert_eq!(dump(&prices2, &ledger2), original);

        // and the restored position is live: it can be closed
        let id = ledger2.list_open_positions("a@x.com")[0].order_id;
        prices2.set_price("BTC", 6_100_000, 2);
        assert_eq!(ledger2.close_trade(id).unwrap(), 1666);
    }

    #[test]
    fn test_restore_skips_malformed_entries() {
        let raw: Value = serde_json::json!({
            "prices": {
                "BTC": { "price": "6000000", "decimal": 2 },
                "BAD": { "price": "not-a-number", "decimal": 2 },
                "WIDE": { "price": "1", "decimal": 9999 },
                "WORSE": 42
            },
            "balances": {
                "a@x.com": { "total": "500000", "locked": "0" },
                "b@x.com": { "total": "1.5", "locked": "0" }
            },
            "openOrders": {
                "nope": { "orderId": "not-a-uuid", "email": "a@x.com", "asset": "BTC",
                          "side": "LONG", "margin": "100", "leverage": 2,
                          "entryPrice": "6000000", "assetDecimals": 2 }
            }
        });

        let prices = PriceStore::new();
        let ledger = Arc::new(PositionLedger::new(
            catalog(),
            prices.clone(),
            LedgerConfig::default(),
        ));
        restore(&raw, &prices, &ledger);

        assert_eq!(prices.get_price("BTC").unwrap().price, 6_000_000);
        assert!(prices.get_price("BAD").is_none());
        assert!(prices.get_price("WIDE").is_none());
        assert!(prices.get_price("WORSE").is_none());
        assert_eq!(ledger.get_balance("a@x.com").total, 500_000);
        assert!(ledger.dump_open_positions().is_empty());
        // malformed balance entry was skipped: b@x.com is freshly seeded
        assert_eq!(ledger.get_balance("b@x.com").total, 1_000_000);
    }

    #[tokio::test]
    async fn test_load_and_ensure_persists_baseline() {
        let prices = PriceStore::new();
        let ledger = Arc::new(PositionLedger::new(
            catalog(),
            prices.clone(),
            LedgerConfig::default(),
        ));
        let (store, cell) = SnapshotStore::memory();
        let (mut manager, _handle) =
            SnapshotManager::new(prices, ledger, store, Duration::from_millis(10));

        assert!(cell.lock().unwrap().is_none());
        manager.load_and_ensure().await.unwrap();

        let payload = cell.lock().unwrap().clone().unwrap();
        let parsed: EngineSnapshot = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed, EngineSnapshot::default());
    }

    #[tokio::test]
    async fn test_debounce_coalesces_bursts() {
        let (prices, ledger) = populated();
        let (store, cell) = SnapshotStore::memory();
        let (manager, handle) = SnapshotManager::new(
            prices.clone(),
            ledger,
            store,
            Duration::from_millis(20),
        );
        let task = tokio::spawn(manager.run());

        // burst of requests within one window
        for _ in 0..10 {
            handle.schedule_save();
        }
        sleep(Duration::from_millis(100)).await;
        assert!(cell.lock().unwrap().is_some());

        // a later price change and another request write the new state
        prices.set_price("BTC", 7_000_000, 2);
        handle.schedule_save();
        sleep(Duration::from_millis(100)).await;

        let payload = cell.lock().unwrap().clone().unwrap();
        let parsed: EngineSnapshot = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed.prices["BTC"].price, "7000000");

        drop(handle);
        task.await.unwrap();
    }
}
