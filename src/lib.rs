// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod market;
pub mod models;
pub mod money;
pub mod snapshot;

// Re-export commonly used types
pub use engine::Engine;
pub use error::EngineError;
pub use models::*;

pub type Result<T> = std::result::Result<T, EngineError>;
