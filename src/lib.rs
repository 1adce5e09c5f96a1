//! Autonomous momentum-discovery trading bot: a strategy engine that
//! scans for trending tokens, runs them through an LLM-backed decision
//! loop, and opens/manages positions via a pluggable external trader.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod execution;
pub mod llm;
pub mod models;
pub mod notifier;
pub mod persistence;
pub mod price_cache;
pub mod scheduler;
pub mod tools;
pub mod utils;

pub use config::AppConfig;
pub use error::{EngineError, EngineResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing with the default `info` filter.
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_logging("info")?;
    tracing::info!(version = VERSION, "{} initialized", NAME);
    Ok(())
}

/// Initialize tracing with a caller-supplied filter/level.
pub fn init_with_tracing(log_level: &str) -> anyhow::Result<()> {
    utils::logging::init_logging(log_level)?;
    tracing::info!(version = VERSION, level = log_level, "{} initialized", NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_is_non_empty() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
    }
}
