// =============================================================================
// Atlas Trader — Main Entry Point
// =============================================================================
//
// Wires the connector factory, pattern store and trader runtime together
// from environment variables. The engine starts against the mock venue
// unless ATLAS_EXCHANGE selects a real one, so a bare `cargo run` never
// touches live funds.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod binance;
mod bitget;
mod config;
mod connector;
mod errors;
mod factory;
mod indicators;
mod market_data;
mod mock;
mod patterns;
mod rate_limit;
mod retry;
mod signal;
mod strategy;
mod trader;
mod types;
mod ws;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ExchangeConfig;
use crate::factory::ConnectorFactory;
use crate::patterns::InMemoryPatternStore;
use crate::strategy::StrategyKind;
use crate::trader::{Trader, TraderConfig};
use crate::types::{Exchange, TimeFrame};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Atlas Trader starting up");

    // ── 2. Exchange selection (mock unless told otherwise) ───────────────
    let exchange = std::env::var("ATLAS_EXCHANGE")
        .ok()
        .and_then(|value| Exchange::from_str(&value).ok())
        .unwrap_or(Exchange::Mock);

    let mut exchange_config = ExchangeConfig::new(exchange).with_credentials(
        std::env::var("ATLAS_API_KEY").unwrap_or_default(),
        std::env::var("ATLAS_API_SECRET").unwrap_or_default(),
    );
    if let Ok(passphrase) = std::env::var("ATLAS_PASSPHRASE") {
        exchange_config = exchange_config.with_passphrase(passphrase);
    }
    if std::env::var("ATLAS_TESTNET").map(|v| v == "1").unwrap_or(false) {
        exchange_config = exchange_config.with_testnet(true);
    }

    info!(exchange = %exchange, testnet = exchange_config.testnet, "venue selected");

    // ── 3. Connector ─────────────────────────────────────────────────────
    let factory = ConnectorFactory::new();
    let connector = factory.create_connector(exchange, exchange_config.clone(), true)?;
    connector.connect().await?;
    info!(exchange = %exchange, "connector ready");

    // ── 4. Pattern store (empty unless the pattern service fills it) ─────
    let pattern_store = Arc::new(InMemoryPatternStore::new());

    // ── 5. Traders ───────────────────────────────────────────────────────
    let symbols: Vec<String> = std::env::var("ATLAS_SYMBOLS")
        .unwrap_or_else(|_| "BTCUSDT".to_string())
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    let interval = std::env::var("ATLAS_INTERVAL")
        .ok()
        .and_then(|value| TimeFrame::from_str(&value).ok())
        .unwrap_or(TimeFrame::M1);
    let strategy = std::env::var("ATLAS_STRATEGY")
        .ok()
        .and_then(|value| StrategyKind::from_str(&value).ok())
        .unwrap_or(StrategyKind::TrendFollowing);
    let budget = std::env::var("ATLAS_BUDGET")
        .ok()
        .and_then(|value| value.parse::<Decimal>().ok())
        .unwrap_or_else(|| Decimal::from(1000));
    let tick_interval = std::env::var("ATLAS_TICK_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));

    let mut traders = Vec::new();
    for (index, symbol) in symbols.iter().enumerate() {
        let mut trader_config = TraderConfig::new(
            format!("trader-{}", index + 1),
            symbol.clone(),
            exchange_config.clone(),
        );
        trader_config.interval = interval;
        trader_config.strategy = strategy;
        trader_config.budget = budget;
        trader_config.tick_interval = tick_interval;

        let matcher: Arc<dyn crate::patterns::PatternMatcher> = pattern_store.clone();
        let trader = Trader::new(trader_config, connector.clone(), Some(matcher));
        match trader.start() {
            Ok(()) => {
                info!(symbol = %symbol, strategy = %strategy, "trader started");
                traders.push(trader);
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "trader refused to start"),
        }
    }

    if traders.is_empty() {
        warn!("no traders running; check configuration");
    }
    info!(count = traders.len(), "engine running; Ctrl+C to stop");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping traders");

    for trader in &traders {
        if let Err(e) = trader.stop().await {
            warn!(trader = trader.id(), error = %e, "stop failed");
        }
    }
    connector.disconnect().await.ok();

    info!("Atlas Trader shut down complete");
    Ok(())
}
