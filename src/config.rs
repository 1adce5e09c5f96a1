use anyhow::{bail, Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime configuration for the strategy engine.
///
/// Loaded (see [`AppConfig::load_from_path`]) by layering, lowest precedence
/// first: struct defaults, an optional `config.toml`, an optional
/// `config.<BOT_MODE>.toml`, then `BOT_`-prefixed environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub enabled: bool,
    pub dry_run: bool,
    pub chain: String,
    pub max_positions: u32,
    pub position_size_usd: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub trailing_stop_pct: f64,
    pub max_hold_hours: u32,
    pub discovery_interval_mins: u32,
    pub price_check_seconds: u32,
    pub daily_loss_limit_usd: f64,
    pub min_volume_usd: f64,
    pub min_liquidity_usd: f64,
    pub min_market_cap_usd: f64,
    pub min_token_age_hours: f64,
    pub cooldown_seconds: u32,
    pub min_momentum_score: f64,
    pub max_slippage_bps: u32,
    pub quote_mint: String,
    pub rpc_url: String,
    pub quote_method: Option<String>,
    pub execute_method: Option<String>,
    pub db_path: String,
    pub mistral_api_key: Option<String>,
    pub mistral_model: String,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from an optional TOML file, a mode-specific
    /// override file (`config.<BOT_MODE>.toml`), and `BOT_`-prefixed
    /// environment variables, with a `.env` file read first.
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = ConfigBuilder::builder()
            .add_source(
                File::with_name(
                    config_path
                        .as_ref()
                        .to_str()
                        .context("config path is not valid UTF-8")?,
                )
                .required(false),
            )
            .add_source(Environment::with_prefix("BOT").separator("_"));

        if let Ok(mode) = std::env::var("BOT_MODE") {
            let mode_path = format!("config.{}.toml", mode);
            builder = builder.add_source(File::with_name(&mode_path).required(false));
        }

        let merged = builder.build().context("failed to build configuration")?;
        let mut config: AppConfig = merged
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        if config.mistral_api_key.is_none() {
            config.mistral_api_key = std::env::var("MISTRAL_API_KEY").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.trim().is_empty() {
            bail!("chain must not be empty");
        }
        if self.max_positions == 0 {
            bail!("max_positions must be greater than 0");
        }
        if self.position_size_usd <= 0.0 {
            bail!("position_size_usd must be positive");
        }
        if self.stop_loss_pct <= 0.0 {
            bail!("stop_loss_pct must be positive");
        }
        if self.take_profit_pct <= 0.0 {
            bail!("take_profit_pct must be positive");
        }
        if self.trailing_stop_pct <= 0.0 {
            bail!("trailing_stop_pct must be positive");
        }
        if self.discovery_interval_mins == 0 {
            bail!("discovery_interval_mins must be greater than 0");
        }
        if self.price_check_seconds == 0 {
            bail!("price_check_seconds must be greater than 0");
        }
        Ok(())
    }

    pub fn chain_normalized(&self) -> String {
        self.chain.to_lowercase()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: true,
            chain: "solana".to_string(),
            max_positions: 5,
            position_size_usd: 25.0,
            take_profit_pct: 15.0,
            stop_loss_pct: 8.0,
            trailing_stop_pct: 5.0,
            max_hold_hours: 24,
            discovery_interval_mins: 15,
            price_check_seconds: 60,
            daily_loss_limit_usd: 50.0,
            min_volume_usd: 50_000.0,
            min_liquidity_usd: 25_000.0,
            min_market_cap_usd: 250_000.0,
            min_token_age_hours: 4.0,
            cooldown_seconds: 3600,
            min_momentum_score: 50.0,
            max_slippage_bps: 300,
            quote_mint: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            quote_method: None,
            execute_method: None,
            db_path: "data/portfolio.db".to_string(),
            mistral_api_key: None,
            mistral_model: "mistral-large-latest".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_positions() {
        let mut config = AppConfig::default();
        config.max_positions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn chain_is_normalized_lowercase() {
        let mut config = AppConfig::default();
        config.chain = "SOLANA".to_string();
        assert_eq!(config.chain_normalized(), "solana");
    }
}
