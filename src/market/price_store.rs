use crate::models::PriceQuote;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Thread-safe store of the latest quote per symbol.
///
/// One quote per asset, overwritten on every tick; no history is kept here.
/// Absence of a quote means "never quoted" and is a retryable condition for
/// callers, not a corrupt-state signal.
#[derive(Clone, Default)]
pub struct PriceStore {
    quotes: Arc<RwLock<HashMap<String, PriceQuote>>>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the quote for a symbol. Fan-out (candles, snapshots) is the
    /// caller's responsibility.
    pub fn set_price(&self, symbol: &str, price: i128, decimals: u32) {
        let mut quotes = self.quotes.write().unwrap_or_else(|e| e.into_inner());
        quotes.insert(
            symbol.to_string(),
            PriceQuote {
                symbol: symbol.to_string(),
                price,
                decimals,
            },
        );
    }

    pub fn get_price(&self, symbol: &str) -> Option<PriceQuote> {
        let quotes = self.quotes.read().unwrap_or_else(|e| e.into_inner());
        quotes.get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        let quotes = self.quotes.read().unwrap_or_else(|e| e.into_inner());
        quotes.keys().cloned().collect()
    }

    /// All quotes, for snapshotting.
    pub fn dump(&self) -> Vec<PriceQuote> {
        let quotes = self.quotes.read().unwrap_or_else(|e| e.into_inner());
        quotes.values().cloned().collect()
    }
}
