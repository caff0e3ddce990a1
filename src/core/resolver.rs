// src/core/resolver.rs
//! Sell decisions as plain functions of configuration and market state.
//! Nothing here talks to the exchange or logs; `core::report` renders the outcomes.

use crate::core::constraints::{PriceBand, QtyBand};
use crate::types::SellStrategy;
use crate::utils::precision::percent_change;
use rust_decimal::Decimal;

/// Quantities within 10% of a band edge trigger a caution.
pub const NEAR_LIMIT_MARGIN: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// The stop leg's limit price sits 5% under its trigger so it still fills in a fast drop.
pub const STOP_LIMIT_CUSHION: Decimal = Decimal::from_parts(95, 0, 0, false, 2);

/// Order left on the book after the buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestingOrder {
    None,
    Limit,
    Oco,
}

/// How one cycle sells: what rests on the book and which client-side triggers are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellPlan {
    pub resting: RestingOrder,
    /// Market sell when the price drops under the stop.
    pub client_stop: bool,
    /// Market sell when the price beats the target and nothing rests on the book.
    pub client_target: bool,
    /// A stop was configured but the pair cannot carry it in an OCO.
    pub stop_ignored: bool,
}

pub fn plan_sell(strategy: SellStrategy, stop_enabled: bool, oco_allowed: bool) -> SellPlan {
    let use_oco = stop_enabled && oco_allowed;
    let resting = if use_oco {
        RestingOrder::Oco
    } else {
        RestingOrder::Limit
    };
    match strategy {
        SellStrategy::Market => SellPlan {
            resting: RestingOrder::None,
            client_stop: stop_enabled,
            client_target: true,
            stop_ignored: false,
        },
        SellStrategy::Limit => SellPlan {
            resting,
            client_stop: false,
            client_target: false,
            stop_ignored: stop_enabled && !oco_allowed,
        },
        SellStrategy::Hybrid => SellPlan {
            resting,
            client_stop: stop_enabled && !use_oco,
            client_target: true,
            stop_ignored: false,
        },
    }
}

/// Target and stop prices derived from the mean buy price.
pub fn price_targets(
    mean_buy_price: Decimal,
    profit_percent: Decimal,
    stop_percent: Decimal,
) -> (Decimal, Decimal) {
    let target = mean_buy_price * (Decimal::ONE + profit_percent / Decimal::ONE_HUNDRED);
    let stop = mean_buy_price * (Decimal::ONE + stop_percent / Decimal::ONE_HUNDRED);
    (target, stop.max(Decimal::ZERO))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Clear,
    /// Within bounds, but close enough to an edge that price moves may push it out.
    NearLimits,
    OutOfBounds,
}

pub fn eligibility(qty: Decimal, band: QtyBand) -> Eligibility {
    if !band.contains(qty) {
        Eligibility::OutOfBounds
    } else if !band.contains_with_margin(qty, NEAR_LIMIT_MARGIN) {
        Eligibility::NearLimits
    } else {
        Eligibility::Clear
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The price band is empty at the moment.
    NoPriceRoom,
    /// Lowering the target to the band ceiling would undercut the profit floor.
    BelowMinProfit { profit: Decimal },
    /// The target is under the lowest accepted price.
    UnderBand { low: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetClip {
    Keep(Decimal),
    Lowered {
        price: Decimal,
        from_percent: Decimal,
        to_percent: Decimal,
    },
    Defer(DeferReason),
}

impl TargetClip {
    pub fn price(&self) -> Option<Decimal> {
        match self {
            TargetClip::Keep(p) => Some(*p),
            TargetClip::Lowered { price, .. } => Some(*price),
            TargetClip::Defer(_) => None,
        }
    }
}

/// Fits a limit target under the current price ceiling.
pub fn clip_target(
    target: Decimal,
    mean_buy_price: Decimal,
    band: PriceBand,
    min_profit_percent: Decimal,
) -> TargetClip {
    if !band.is_tradable() {
        return TargetClip::Defer(DeferReason::NoPriceRoom);
    }
    if target < band.low {
        return TargetClip::Defer(DeferReason::UnderBand { low: band.low });
    }
    if target <= band.high {
        return TargetClip::Keep(target);
    }
    let to_percent = percent_change(band.high, mean_buy_price);
    if to_percent < min_profit_percent {
        return TargetClip::Defer(DeferReason::BelowMinProfit { profit: to_percent });
    }
    TargetClip::Lowered {
        price: band.high,
        from_percent: percent_change(target, mean_buy_price),
        to_percent,
    }
}

/// Stop trigger raised to the lowest accepted price, with its limit leg.
pub fn oco_stop(stop: Decimal, band: PriceBand) -> (Decimal, Decimal) {
    let stop = stop.max(band.low);
    (stop, stop * STOP_LIMIT_CUSHION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Target,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Same price as the previous trade, nothing to evaluate.
    Repeat,
    Hold { profit: Decimal },
    Fire { trigger: Trigger, profit: Decimal },
}

/// Market state seen by one trade print.
#[derive(Debug, Clone, Copy)]
pub struct TickInput {
    pub price: Decimal,
    pub last_price: Option<Decimal>,
    pub mean_buy_price: Decimal,
    pub target: Decimal,
    pub stop: Decimal,
    /// A limit or OCO order is resting on the book.
    pub resting: bool,
}

pub fn evaluate_tick(plan: &SellPlan, tick: TickInput) -> TickDecision {
    if tick.last_price == Some(tick.price) {
        return TickDecision::Repeat;
    }
    let profit = percent_change(tick.price, tick.mean_buy_price);
    if plan.client_target && !tick.resting && tick.price > tick.target {
        return TickDecision::Fire {
            trigger: Trigger::Target,
            profit,
        };
    }
    if plan.client_stop && tick.price < tick.stop {
        return TickDecision::Fire {
            trigger: Trigger::Stop,
            profit,
        };
    }
    TickDecision::Hold { profit }
}

/// The resting order may have filled when the market reaches one of its legs.
pub fn resting_order_touched(
    price: Decimal,
    limit_price: Decimal,
    stop_price: Option<Decimal>,
) -> bool {
    price >= limit_price || stop_price.is_some_and(|stop| price <= stop)
}
