//! Engine facade: the API surface handed to outer adapters (HTTP layer,
//! dev tooling). Owns nothing itself beyond handles; all money mutation
//! happens inside the ledger, all persistence goes through the snapshot
//! handle.

use crate::error::EngineError;
use crate::ledger::PositionLedger;
use crate::market::{candles::Kline, CandleAggregator, PriceStore};
use crate::models::{
    AssetCatalog, Balance, ClosedPosition, HumanQuote, Position, PriceQuote, Side,
};
use crate::money::{format_scaled, pow10, to_scaled};
use crate::snapshot::SnapshotHandle;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct Engine {
    catalog: AssetCatalog,
    prices: PriceStore,
    candles: CandleAggregator,
    ledger: Arc<PositionLedger>,
    snapshots: SnapshotHandle,
}

impl Engine {
    pub fn new(
        catalog: AssetCatalog,
        prices: PriceStore,
        candles: CandleAggregator,
        ledger: Arc<PositionLedger>,
        snapshots: SnapshotHandle,
    ) -> Self {
        Self {
            catalog,
            prices,
            candles,
            ledger,
            snapshots,
        }
    }

    /// Open a leveraged position; schedules a snapshot on success.
    pub fn open_trade(
        &self,
        email: &str,
        symbol: &str,
        side: Side,
        margin: i128,
        leverage: u32,
    ) -> crate::Result<Uuid> {
        let order_id = self.ledger.open_trade(email, symbol, side, margin, leverage)?;
        self.snapshots.schedule_save();
        Ok(order_id)
    }

    /// Close a position, returning realized pnl in cents; schedules a
    /// snapshot on success.
    pub fn close_trade(&self, order_id: Uuid) -> crate::Result<i128> {
        let pnl = self.ledger.close_trade(order_id)?;
        self.snapshots.schedule_save();
        Ok(pnl)
    }

    // Reads are pure: none of these ever schedules persistence.

    pub fn get_balance(&self, email: &str) -> Balance {
        self.ledger.get_balance(email)
    }

    pub fn list_open_positions(&self, email: &str) -> Vec<Position> {
        self.ledger.list_open_positions(email)
    }

    pub fn list_closed_positions(&self, email: &str) -> Vec<ClosedPosition> {
        self.ledger.list_closed_positions(email)
    }

    pub fn get_quote(&self, symbol: &str) -> Option<PriceQuote> {
        self.prices.get_price(symbol)
    }

    /// Quote rendered as a decimal string alongside the raw scaled value.
    pub fn get_human_quote(&self, symbol: &str) -> Option<HumanQuote> {
        self.prices.get_price(symbol).map(|q| HumanQuote {
            symbol: q.symbol,
            price: format_scaled(q.price, q.decimals),
            decimals: q.decimals,
            raw: q.price.to_string(),
        })
    }

    pub fn get_klines(&self, symbol: &str, limit: usize) -> Vec<Kline> {
        self.candles.get_klines(symbol, limit)
    }

    /// Dev utility: set a price from a human decimal string. Scales exactly
    /// through strings, records a candle tick, and schedules a save.
    pub fn set_human_price(&self, symbol: &str, human: &str) -> crate::Result<()> {
        let asset = self
            .catalog
            .get(symbol)
            .ok_or_else(|| EngineError::UnknownAsset(symbol.to_string()))?;
        let scaled = to_scaled(human, asset.decimals)?;

        self.prices.set_price(symbol, scaled, asset.decimals);
        let chart_price = scaled as f64 / pow10(asset.decimals) as f64;
        self.candles
            .record_tick(symbol, chart_price, Utc::now().timestamp_millis());
        self.snapshots.schedule_save();
        Ok(())
    }
}
