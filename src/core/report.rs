// src/core/report.rs
//! Human-readable rendering of engine events. Every line goes through `tracing`.

use crate::core::constraints::{PriceBand, QtyBand, TickPrecision};
use crate::core::engine::{CycleOutcome, SaleKind, SaleReport};
use crate::core::resolver::{DeferReason, SellPlan, TargetClip, Trigger};
use crate::error::ExchangeError;
use crate::types::{MarketOrderReport, OrderHandle, OrderKind, Side, TradingPair};
use crate::utils::precision::percent_change;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// `+1.25%` / `-0.40%`.
pub fn signed_percent(value: Decimal) -> String {
    let value = value.round_dp(2);
    if value.is_sign_negative() && !value.is_zero() {
        format!("{:.2}%", value)
    } else {
        format!("+{:.2}%", value.abs())
    }
}

pub fn pair_locked(pair: &TradingPair, ticks: TickPrecision, plan: &SellPlan) {
    info!("Market manager started with pair {}", pair.symbol);
    debug!(
        "Tick digits for {}: price {}, lot {}, market lot {}",
        pair.symbol, ticks.price, ticks.lot, ticks.market_lot
    );
    if plan.stop_ignored {
        warn!("You set a stop price but this trading pair doesn't allow OCO trades!");
    }
}

pub fn market_order(order: &MarketOrderReport, pair: &TradingPair) {
    info!("Executed market order (status: {})", order.status);
    match order.side {
        Side::Buy => info!(
            "Bought {} {} with {} {}",
            order.executed_qty, pair.base_asset, order.cumulative_quote_qty, pair.quote_asset
        ),
        Side::Sell => info!(
            "Sold {} {} for {} {}",
            order.executed_qty, pair.base_asset, order.cumulative_quote_qty, pair.quote_asset
        ),
    }
    for fill in &order.fills {
        info!(
            "  {} {} at {} {} (commission {} {})",
            fill.qty,
            pair.base_asset,
            fill.price,
            pair.quote_asset,
            fill.commission,
            fill.commission_asset
        );
    }
    if let Ok(avg) = order.average_price() {
        info!("Average fill price: {} {}", avg, pair.quote_asset);
    }
}

pub fn near_limits(qty: Decimal, band: &QtyBand) {
    warn!(
        "Caution, you are nearing the exchange's quantity limits: {} within {}",
        qty, band
    );
}

pub fn tick_line(pair: &TradingPair, price: Decimal, profit: Decimal) -> String {
    format!(
        "[{}] 1 {} = {} {}",
        signed_percent(profit),
        pair.base_asset,
        price,
        pair.quote_asset
    )
}

pub fn price_tick(pair: &TradingPair, price: Decimal, profit: Decimal) {
    info!("{}", tick_line(pair, price, profit));
}

pub fn target_clip(clip: &TargetClip, prices: &PriceBand) {
    match clip {
        TargetClip::Keep(_) => {}
        TargetClip::Lowered {
            price,
            from_percent,
            to_percent,
        } => warn!(
            "Target price too high, lowering to {} (profit {} -> {})",
            price,
            signed_percent(*from_percent),
            signed_percent(*to_percent)
        ),
        TargetClip::Defer(reason) => warn!("{}, retrying later", defer_line(reason, prices)),
    }
}

pub fn defer_line(reason: &DeferReason, prices: &PriceBand) -> String {
    match reason {
        DeferReason::NoPriceRoom => format!("No price is accepted at the moment ({prices})"),
        DeferReason::BelowMinProfit { profit } => format!(
            "Highest accepted price gives {} profit, under the configured minimum",
            signed_percent(*profit)
        ),
        DeferReason::UnderBand { low } => {
            format!("Target price is under the lowest accepted price {low}")
        }
    }
}

pub fn bounds_skip(what: &str, qty: Decimal, band: &QtyBand) {
    warn!("Skipping order: {} {} is outside {}", what, qty, band);
}

pub fn trigger(trigger: Trigger, price: Decimal) {
    let label = match trigger {
        Trigger::Target => "target",
        Trigger::Stop => "stop",
    };
    info!("[MARKET SELL] {} reached at {}", label, price);
}

pub fn resting_placed(order: &OrderHandle, mean_buy_price: Decimal) {
    let profit = signed_percent(percent_change(order.price, mean_buy_price));
    match (order.kind, order.stop_price) {
        (OrderKind::Oco, Some(stop)) => info!(
            "[OCO SELL] #{} {} at {} target profit: {}, stop: {} ({})",
            order.id,
            order.qty,
            order.price,
            profit,
            stop,
            signed_percent(percent_change(stop, mean_buy_price))
        ),
        _ => info!(
            "[LIMIT SELL] #{} {} at {} target profit: {}",
            order.id, order.qty, order.price, profit
        ),
    }
}

pub fn rejected(action: &str, err: &ExchangeError) {
    warn!("{} rejected, will retry: {}", action, err);
}

pub fn sale_line(sale: &SaleReport) -> String {
    let profit = signed_percent(sale.profit_percent);
    let result = if sale.profit_percent.is_sign_negative() && !sale.profit_percent.is_zero() {
        "LOSS"
    } else {
        "PROFIT"
    };
    match sale.kind {
        SaleKind::Market => format!("[MARKET SELL {result}] {profit}"),
        SaleKind::Limit => format!("[LIMIT SELL {result}] {profit} at {}", sale.price),
        SaleKind::Oco => format!("[OCO SELL {result}] {profit} at {}", sale.price),
    }
}

pub fn outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Sold(sale) => info!("{} ({} sold)", sale_line(sale), sale.executed_qty),
        CycleOutcome::BailedOut(Some(sale)) => {
            warn!("Bailed out: {} ({} sold)", sale_line(sale), sale.executed_qty)
        }
        CycleOutcome::BailedOut(None) => warn!("Bailed out with nothing left to sell"),
        CycleOutcome::Interrupted { resting: Some(order) } => warn!(
            "Stopped; order #{} stays on the book ({} at {})",
            order.id, order.qty, order.price
        ),
        CycleOutcome::Interrupted { resting: None } => warn!("Stopped before anything was sold"),
    }
}

pub fn failure(err: &crate::error::TradeError) {
    match err.retry_after() {
        Some(wait) => error!(
            "Trade cycle failed: {}. Do not send requests for the next {}s",
            err,
            wait.as_secs()
        ),
        None => error!("Trade cycle failed: {}", err),
    }
}
