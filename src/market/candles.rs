use crate::models::Candle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Kline wire tuple: `[time_ms, open, high, low, close, volume]`.
pub type Kline = (i64, f64, f64, f64, f64, f64);

const MINUTE_MS: i64 = 60_000;

/// Cosmetic widening applied to flat bars in query results, as a fraction of
/// the close. Never written back into stored bars.
const FLAT_BAR_PAD: f64 = 0.0005;

fn minute_bucket(at_ms: i64) -> i64 {
    at_ms.div_euclid(MINUTE_MS) * MINUTE_MS
}

#[derive(Debug, Default)]
struct SymbolBars {
    history: VecDeque<Candle>,
    live: Option<Candle>,
}

/// Aggregates price ticks into 1-minute OHLCV bars, independently per symbol.
///
/// Keeps a capped ring of closed bars plus one live bar per symbol. A symbol
/// seen for the first time is seeded with flat warm-up bars at its first
/// price so chart queries never come back empty for a fresh symbol.
#[derive(Clone)]
pub struct CandleAggregator {
    data: Arc<RwLock<HashMap<String, SymbolBars>>>,
    max_bars: usize,
    warmup_bars: usize,
}

impl CandleAggregator {
    /// # Arguments
    /// * `max_bars` - maximum closed bars kept per symbol
    /// * `warmup_bars` - flat bars synthesized on first tick of a symbol
    pub fn new(max_bars: usize, warmup_bars: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_bars,
            warmup_bars,
        }
    }

    /// Fold one tick into the symbol's current minute bar.
    ///
    /// An out-of-order timestamp is not rejected; it simply lands in the
    /// bucket it hashes to, rolling the live bar if the bucket differs.
    pub fn record_tick(&self, symbol: &str, price: f64, at_ms: i64) {
        let bucket = minute_bucket(at_ms);
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());

        let bars = data.entry(symbol.to_string()).or_default();
        if bars.live.is_none() && bars.history.is_empty() {
            Self::seed(bars, price, bucket, self.warmup_bars);
        }

        match bars.live.as_mut() {
            Some(live) if live.bucket_start == bucket => {
                live.close = price;
                if price > live.high {
                    live.high = price;
                }
                if price < live.low {
                    live.low = price;
                }
            }
            _ => {
                if let Some(done) = bars.live.take() {
                    bars.history.push_back(done);
                    while bars.history.len() > self.max_bars {
                        bars.history.pop_front();
                    }
                }
                bars.live = Some(flat_bar(bucket, price));
            }
        }
    }

    fn seed(bars: &mut SymbolBars, price: f64, bucket: i64, warmup: usize) {
        for i in (1..=warmup as i64).rev() {
            bars.history.push_back(flat_bar(bucket - i * MINUTE_MS, price));
        }
        tracing::debug!(warmup, "seeded warm-up bars for fresh symbol");
    }

    /// Last `limit` bars (closed history plus the live bar), ascending by
    /// bucket time, in the external wire shape. Flat bars get a cosmetic
    /// high/low pad in the returned copy so chart bodies never degenerate;
    /// stored bars are untouched.
    pub fn get_klines(&self, symbol: &str, limit: usize) -> Vec<Kline> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let Some(bars) = data.get(symbol) else {
            return Vec::new();
        };

        let all: Vec<&Candle> = bars.history.iter().chain(bars.live.iter()).collect();
        let start = all.len().saturating_sub(limit);

        all[start..]
            .iter()
            .map(|bar| {
                let (mut high, mut low) = (bar.high, bar.low);
                if high == low {
                    let pad = (bar.close.abs() * FLAT_BAR_PAD).max(f64::MIN_POSITIVE);
                    high += pad;
                    low -= pad;
                }
                (bar.bucket_start, bar.open, high, low, bar.close, bar.volume)
            })
            .collect()
    }

    /// Raw bars without cosmetic padding (closed history plus live bar).
    pub fn get_candles(&self, symbol: &str) -> Vec<Candle> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(symbol)
            .map(|bars| bars.history.iter().chain(bars.live.iter()).cloned().collect())
            .unwrap_or_default()
    }
}

fn flat_bar(bucket_start: i64, price: f64) -> Candle {
    Candle {
        bucket_start,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_040_000; // mid-minute epoch ms

    fn aggregator() -> CandleAggregator {
        CandleAggregator::new(1000, 0)
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        assert!(aggregator().get_klines("BTC", 10).is_empty());
    }

    #[test]
    fn test_ticks_in_same_minute_fold_into_one_bar() {
        let agg = aggregator();
        let t0 = minute_bucket(T);
        agg.record_tick("BTC", 100.0, t0);
        agg.record_tick("BTC", 105.0, t0 + 10_000);
        agg.record_tick("BTC", 95.0, t0 + 40_000);

        let bars = agg.get_candles("BTC");
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 105.0);
        assert_eq!(bars[0].low, 95.0);
        assert_eq!(bars[0].close, 95.0);
        assert_eq!(bars[0].bucket_start, t0);
    }

    #[test]
    fn test_minute_boundary_rolls_bar() {
        let agg = aggregator();
        let t0 = minute_bucket(T);
        agg.record_tick("BTC", 100.0, t0);
        agg.record_tick("BTC", 101.0, t0 + 65_000); // next minute

        let bars = agg.get_candles("BTC");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 100.0);
        assert_eq!(bars[1].bucket_start, t0 + MINUTE_MS);
        assert_eq!(bars[1].open, 101.0);
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let agg = CandleAggregator::new(3, 0);
        let t0 = minute_bucket(T);
        for i in 0..6 {
            agg.record_tick("BTC", 100.0 + i as f64, t0 + i * MINUTE_MS);
        }

        // 5 closed + 1 live, capped at 3 closed
        let bars = agg.get_candles("BTC");
        assert_eq!(bars.len(), 4);
        assert_eq!(bars[0].open, 102.0); // 100 and 101 evicted
        assert_eq!(bars[3].open, 105.0);
    }

    #[test]
    fn test_warmup_seeding() {
        let agg = CandleAggregator::new(1000, 5);
        agg.record_tick("SOL", 150.0, T);

        let klines = agg.get_klines("SOL", 100);
        assert_eq!(klines.len(), 6); // 5 warm-up + live
        for window in klines.windows(2) {
            assert_eq!(window[1].0 - window[0].0, MINUTE_MS);
        }
        assert!(klines.iter().all(|k| k.4 == 150.0));
    }

    #[test]
    fn test_klines_limit_and_order() {
        let agg = aggregator();
        let t0 = minute_bucket(T);
        for i in 0..10 {
            agg.record_tick("BTC", 100.0 + i as f64, t0 + i * MINUTE_MS);
        }

        let klines = agg.get_klines("BTC", 4);
        assert_eq!(klines.len(), 4);
        // ascending, newest last
        assert!(klines.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(klines[3].4, 109.0);
    }

    #[test]
    fn test_flat_bar_padding_is_cosmetic() {
        let agg = aggregator();
        agg.record_tick("BTC", 100.0, T);

        let kline = agg.get_klines("BTC", 1)[0];
        assert!(kline.2 > 100.0 && kline.3 < 100.0); // padded in the view

        let bar = &agg.get_candles("BTC")[0];
        assert_eq!(bar.high, bar.low); // stored bar untouched
    }

    #[test]
    fn test_out_of_order_tick_lands_in_its_bucket() {
        let agg = aggregator();
        let t0 = minute_bucket(T);
        agg.record_tick("BTC", 100.0, t0 + MINUTE_MS);
        agg.record_tick("BTC", 99.0, t0); // older minute: rolls, not rejected

        let bars = agg.get_candles("BTC");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].open, 99.0);
    }

    #[test]
    fn test_symbols_are_independent() {
        let agg = aggregator();
        agg.record_tick("BTC", 100.0, T);
        agg.record_tick("ETH", 2500.0, T);

        assert_eq!(agg.get_candles("BTC").len(), 1);
        assert_eq!(agg.get_candles("ETH").len(), 1);
        assert_eq!(agg.get_candles("ETH")[0].close, 2500.0);
    }
}
