// Market data: latest quotes and minute-candle aggregation
pub mod candles;
pub mod price_store;

pub use candles::CandleAggregator;
pub use price_store::PriceStore;
