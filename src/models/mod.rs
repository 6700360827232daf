use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A tradeable asset. Immutable once created; `decimals` is the scale used
/// for every price of this asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub symbol: String,
    pub decimals: u32,
}

/// Read-only registry of supported assets, seeded at construction.
#[derive(Debug, Clone)]
pub struct AssetCatalog {
    assets: HashMap<String, Asset>,
}

impl AssetCatalog {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self {
            assets: assets.into_iter().map(|a| (a.symbol.clone(), a)).collect(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Asset> {
        self.assets.get(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    /// Default asset universe, matching the upstream relay's stream list.
    pub fn default_universe() -> Self {
        let assets = [
            ("BTC", 2),
            ("ETH", 2),
            ("SOL", 2),
            ("XRP", 4),
            ("DOGE", 5),
            ("ADA", 4),
        ]
        .into_iter()
        .map(|(symbol, decimals)| Asset {
            symbol: symbol.to_string(),
            decimals,
        })
        .collect();
        Self::new(assets)
    }
}

/// Latest known price for one symbol, as a scaled integer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: i128,
    pub decimals: u32,
}

/// Human-readable quote DTO (scaled value rendered as a decimal string).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HumanQuote {
    pub symbol: String,
    pub price: String,
    pub decimals: u32,
    pub raw: String,
}

/// Position direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

/// One-minute OHLCV bar. Chart-facing values are human-scale floats; money
/// math never reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub bucket_start: i64, // minute-aligned epoch ms
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// An open leveraged position. `entry_price` is snapshotted at open and
/// never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub order_id: Uuid,
    pub email: String,
    pub symbol: String,
    pub side: Side,
    pub margin: i128, // USD cents
    pub leverage: u32,
    pub entry_price: i128, // scaled by asset_decimals
    pub asset_decimals: u32,
    pub opened_at: DateTime<Utc>,
}

/// Terminal state of a position; append-only history per account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedPosition {
    pub order_id: Uuid,
    pub email: String,
    pub symbol: String,
    pub side: Side,
    pub margin: i128,
    pub leverage: u32,
    pub entry_price: i128,
    pub exit_price: i128,
    pub pnl: i128, // USD cents, signed
    pub asset_decimals: u32,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Balance view for one account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub total: i128,
    pub locked: i128,
    pub free: i128,
}
