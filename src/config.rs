use crate::ledger::LedgerConfig;

/// Engine configuration, read from the environment (a `.env` file is loaded
/// by the binary before this runs).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub redis_url: String,
    pub prices_channel: String,
    /// Balance seeded into a fresh account, USD cents.
    pub starting_balance: i128,
    pub min_leverage: u32,
    pub max_leverage: u32,
    pub snapshot_debounce_ms: u64,
    pub candle_max_bars: usize,
    pub candle_warmup_bars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            prices_channel: "prices".to_string(),
            starting_balance: 1_000_000, // $10,000
            min_leverage: 1,
            max_leverage: 100,
            snapshot_debounce_ms: 750,
            candle_max_bars: 1000,
            candle_warmup_bars: 120,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env_or("REDIS_URL", defaults.redis_url),
            prices_channel: env_or("PRICES_CHANNEL", defaults.prices_channel),
            starting_balance: env_parsed("STARTING_BALANCE_CENTS", defaults.starting_balance),
            min_leverage: env_parsed("MIN_LEVERAGE", defaults.min_leverage),
            max_leverage: env_parsed("MAX_LEVERAGE", defaults.max_leverage),
            snapshot_debounce_ms: env_parsed("SNAPSHOT_DEBOUNCE_MS", defaults.snapshot_debounce_ms),
            candle_max_bars: env_parsed("CANDLE_MAX_BARS", defaults.candle_max_bars),
            candle_warmup_bars: env_parsed("CANDLE_WARMUP_BARS", defaults.candle_warmup_bars),
        }
    }

    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            starting_balance: self.starting_balance,
            min_leverage: self.min_leverage,
            max_leverage: self.max_leverage,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
