// src/core/setup.rs
//! Startup checks that run before any input channel opens.

use crate::config::TradeConfig;
use crate::connectors::traits::ExchangeClient;
use crate::error::TradeError;
use crate::types::{Balance, ExchangeInfo, TradingPair};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Pairs quoted in `quote_asset` that accept market buys, keyed by base asset.
pub fn tradable_pairs(
    info: &ExchangeInfo,
    quote_asset: &str,
) -> Result<HashMap<String, TradingPair>, TradeError> {
    let pairs: HashMap<String, TradingPair> = info
        .symbols
        .iter()
        .filter(|p| p.quote_asset == quote_asset && p.is_tradable())
        .map(|p| (p.base_asset.clone(), p.clone()))
        .collect();

    if pairs.is_empty() {
        return Err(TradeError::Setup(format!(
            "no tradable pairs are quoted in {quote_asset}"
        )));
    }
    info!("{} pairs tradable against {}", pairs.len(), quote_asset);
    Ok(pairs)
}

/// Stablecoin quotes accepted for pricing the quote asset in USD.
const USD_QUOTES: [&str; 2] = ["BUSD", "USDT"];

/// First tradable pair that prices `asset` in BUSD or USDT.
pub fn usd_pair<'a>(info: &'a ExchangeInfo, asset: &str) -> Option<&'a TradingPair> {
    info.symbols.iter().find(|p| {
        p.base_asset == asset && USD_QUOTES.contains(&p.quote_asset.as_str()) && p.is_tradable()
    })
}

/// Quote amount spent by the buy. In order of precedence: `usd_value`
/// converted at the last USD price, the configured amount, or `buy_percent`
/// of the free balance.
pub async fn quote_amount(
    config: &TradeConfig,
    balances: &[Balance],
    info: &ExchangeInfo,
    exchange: &dyn ExchangeClient,
) -> Result<Decimal, TradeError> {
    let balance = balances
        .iter()
        .find(|b| b.asset == config.quote_asset)
        .ok_or_else(|| {
            TradeError::Setup(format!("no {} balance on the account", config.quote_asset))
        })?;
    info!(
        "Your free balance for {} is {} (locked: {})",
        balance.asset, balance.free, balance.locked
    );

    let amount = match (config.usd_value, config.quote_amount) {
        (Some(usd), _) => {
            let pair = usd_pair(info, &config.quote_asset).ok_or_else(|| {
                TradeError::Setup(format!(
                    "no BUSD/USDT trade symbol found for {}",
                    config.quote_asset
                ))
            })?;
            let price = exchange.last_price(&pair.symbol).await?;
            if price <= Decimal::ZERO {
                return Err(TradeError::Setup(format!(
                    "{} reported a non-positive price",
                    pair.symbol
                )));
            }
            debug!("1 {} = {} {}", config.quote_asset, price, pair.quote_asset);
            usd / price
        }
        (None, Some(amount)) => amount,
        (None, None) => balance.free * config.buy_percent / Decimal::ONE_HUNDRED,
    };
    if amount <= Decimal::ZERO {
        return Err(TradeError::Setup(format!(
            "cannot spend a non-positive amount of {}",
            config.quote_asset
        )));
    }
    if amount > balance.free {
        return Err(TradeError::Setup(format!(
            "cannot spend {} {}, only {} is free",
            amount, config.quote_asset, balance.free
        )));
    }
    if config.profit_percent <= Decimal::ZERO {
        warn!("You have set a non-positive profit. Proceeding may net you a loss!");
    }
    Ok(amount)
}

/// Prints the selected options once everything is validated.
pub fn announce(config: &TradeConfig, amount: Decimal) {
    info!("---- SELECTED OPTIONS ----");
    info!("Selected quote coin: {}", config.quote_asset);
    if let Some(usd) = config.usd_value {
        info!("Selected USD value to buy: {} USD", usd);
    }
    info!("Selected quote amount to sell: {} {}", amount, config.quote_asset);
    info!("Selected sell strategy: {}", config.sell_strategy);
    info!("Selected target profit: {:.2}%", config.profit_percent);
    if config.stop_enabled() {
        info!("Selected stop percentage: {:.2}%", config.stop_percent);
    }
    info!("--------------------------");
    if config.bailout {
        info!("Bailout enabled: once trading starts, press Ctrl+C to sell immediately");
    }
}
