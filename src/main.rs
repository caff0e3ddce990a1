// src/main.rs
use crate::config::AppConfig;
use crate::connectors::binance::BinanceClient;
use crate::connectors::traits::ExchangeClient;
use crate::core::engine::TradeEngine;
use crate::core::lock::PairLock;
use crate::core::{report, setup};
use crate::inputs::{http, stdin};
use crate::utils::logging;
use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod connectors;
mod core;
mod error;
mod inputs;
mod types;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Configuration and logging
    let config = AppConfig::new().context("failed to load configuration")?;
    let _log_guard = logging::init(&config.log);

    info!("========================================");
    info!("       SPOT SNIPER - v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");

    // 2. Exchange state needed before any symbol is accepted
    let client = Arc::new(BinanceClient::new(&config.api));
    let (exchange_info, balances) = tokio::try_join!(client.exchange_info(), client.balances())?;
    let pairs = setup::tradable_pairs(&exchange_info, &config.trade.quote_asset)?;
    let quote_amount =
        setup::quote_amount(&config.trade, &balances, &exchange_info, client.as_ref()).await?;
    setup::announce(&config.trade, quote_amount);

    // 3. Input channels race for the pair lock
    let (lock, waiter) = PairLock::new(config.trade.quote_asset.clone(), pairs);
    let server_lock = Arc::clone(&lock);
    let server_config = config.server.clone();
    tokio::spawn(async move {
        if let Err(e) = http::serve(server_lock, &server_config).await {
            error!("HTTP listener stopped: {:#}", e);
        }
    });
    stdin::spawn(Arc::clone(&lock)).context("failed to start the stdin prompt")?;
    info!("Waiting for a {} pair from the prompt or over HTTP", lock.quote_asset());

    // 4. Engine
    let mut engine = TradeEngine::new(
        Arc::new(config.trade),
        client.clone(),
        client,
        waiter,
        quote_amount,
    );

    tokio::select! {
        locked = engine.await_lock() => locked?,
        _ = tokio::signal::ctrl_c() => {
            info!("Stopped before a trading pair was selected");
            return Ok(());
        }
    }

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl+C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };
    match engine.run(interrupt).await {
        Ok(outcome) => {
            report::outcome(&outcome);
            Ok(())
        }
        Err(e) => {
            report::failure(&e);
            Err(e.into())
        }
    }
}
