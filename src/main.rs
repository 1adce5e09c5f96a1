use anyhow::{Context, Result};
use clap::Parser;
use dex_strategy_engine::config::AppConfig;
use dex_strategy_engine::discovery::DiscoveryPipeline;
use dex_strategy_engine::engine::StrategyEngine;
use dex_strategy_engine::execution::TraderExecutionService;
use dex_strategy_engine::llm::{ChatSession, MistralChatSession};
use dex_strategy_engine::notifier::{Notifier, TracingNotifier};
use dex_strategy_engine::persistence::Store;
use dex_strategy_engine::price_cache::PriceCache;
use dex_strategy_engine::scheduler::Scheduler;
use dex_strategy_engine::tools::chain_rpc::DecimalsCache;
use dex_strategy_engine::tools::http_provider::{discover_tools, HttpToolProvider};
use dex_strategy_engine::tools::market_data::QuoteSource;
use dex_strategy_engine::tools::safety::SafetyChecker;
use dex_strategy_engine::tools::ToolProvider;
use dex_strategy_engine::{utils::logging, NAME, VERSION};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level override
    #[arg(short, long)]
    log_level: Option<String>,

    /// Market-data collaborator base URL
    #[arg(long, default_value = "http://localhost:8081")]
    market_data_url: String,

    /// Safety-check collaborator base URL
    #[arg(long, default_value = "http://localhost:8082")]
    safety_url: String,

    /// Trader collaborator base URL
    #[arg(long, default_value = "http://localhost:8083")]
    trader_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load_from_path(&args.config).context("failed to load configuration")?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init_logging(log_level)?;
    info!(%NAME, %VERSION, "starting");

    if config.dry_run {
        warn!("running in dry-run mode: no live trades will be executed");
    }
    if !config.enabled {
        warn!("engine is disabled in configuration");
    }

    let market_tools = discover_tools(&args.market_data_url).await.context("market-data tool discovery failed")?;
    let safety_tools = discover_tools(&args.safety_url).await.context("safety tool discovery failed")?;
    let trader_tools = discover_tools(&args.trader_url).await.context("trader tool discovery failed")?;

    let market_provider: Arc<dyn ToolProvider> =
        Arc::new(HttpToolProvider::new("market-data", args.market_data_url.clone(), market_tools));
    let safety_provider: Arc<dyn ToolProvider> = Arc::new(HttpToolProvider::new("safety", args.safety_url.clone(), safety_tools));
    let trader_provider: Arc<dyn ToolProvider> = Arc::new(HttpToolProvider::new("trader", args.trader_url.clone(), trader_tools));

    let price_cache = Arc::new(PriceCache::new(config.price_check_seconds as i64));
    let market = Arc::new(QuoteSource::new(Arc::clone(&market_provider), price_cache));
    let safety = Arc::new(SafetyChecker::new(safety_provider));
    let decimals = Arc::new(DecimalsCache::new(config.rpc_url.clone(), &config.quote_mint));

    let trader = Arc::new(TraderExecutionService::new(
        trader_provider,
        config.chain_normalized(),
        config.max_slippage_bps,
        config.quote_mint.clone(),
        decimals,
        config.quote_method.as_deref(),
        config.execute_method.as_deref(),
    )?);

    let store = Arc::new(Store::open(&config.db_path).context("failed to open persistence store")?);
    let discovery = Arc::new(DiscoveryPipeline::new(Arc::clone(&market), safety, &config));

    let mistral_key = config.mistral_api_key.clone().context("MISTRAL_API_KEY is required")?;
    let mistral_model = config.mistral_model.clone();
    let decision_tools: Arc<dyn ToolProvider> = Arc::clone(&market_provider);
    let chat_tools = market_provider.list_tools().to_vec();
    let chat_factory: dex_strategy_engine::engine::ChatFactory = Arc::new(move || {
        Box::new(MistralChatSession::new(
            &mistral_key,
            &mistral_model,
            dex_strategy_engine::discovery::decision::DECISION_SYSTEM_PROMPT,
            &chat_tools,
        )) as Box<dyn ChatSession>
    });

    let engine = Arc::new(StrategyEngine::new(
        config.clone(),
        store,
        discovery,
        trader,
        market,
        decision_tools,
        chat_factory,
    ));

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let scheduler = Arc::new(Scheduler::new(config, engine, notifier));
    scheduler.start().await;

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    scheduler.stop().await;

    Ok(())
}
