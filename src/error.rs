use thiserror::Error;
use uuid::Uuid;

/// Everything the engine can reject or fail with.
///
/// Trade-mutating variants are detected before any state change; persistence
/// and feed errors stay off the trading path entirely.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("margin must be > 0")]
    InvalidMargin,

    #[error("leverage {0} outside allowed bounds")]
    InvalidLeverage(u32),

    #[error("unsupported asset: {0}")]
    UnknownAsset(String),

    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("insufficient free balance: need {needed}, have {free}")]
    InsufficientBalance { free: i128, needed: i128 },

    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("bad decimal string: {0:?}")]
    BadDecimal(String),

    #[error("snapshot persistence failed: {0}")]
    Persistence(#[from] redis::RedisError),

    #[error("malformed price update: {0}")]
    MessageParse(String),
}
