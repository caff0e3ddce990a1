// src/core/constraints.rs
//! Exchange filter math for the selected pair: tick precision, legal price
//! and quantity ranges, and rendering of amounts sent to the exchange.

use crate::types::{LotSizeFilter, TradingPair};
use crate::utils::precision::{
    normalize_price, normalize_quantity, price_amount, qty_amount, tick_digits,
    DEFAULT_TICK_DIGITS,
};
use rust_decimal::Decimal;
use std::fmt;

/// Upper end of a band with no limit.
pub const UNBOUNDED: Decimal = Decimal::MAX;

/// 5% inward margin against filters that move with the market.
const MARGIN_LOW: Decimal = Decimal::from_parts(105, 0, 0, false, 2);
const MARGIN_HIGH: Decimal = Decimal::from_parts(95, 0, 0, false, 2);

/// Decimal digits accepted per field. Derived once when the pair is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPrecision {
    pub price: u32,
    pub lot: u32,
    pub market_lot: u32,
}

impl TickPrecision {
    pub fn derive(pair: &TradingPair) -> Self {
        let price = pair
            .price_filter()
            .map(|f| tick_digits(f.tick_size, pair.quote_asset_precision))
            .unwrap_or(DEFAULT_TICK_DIGITS);
        let lot = pair
            .lot_size()
            .map(|f| tick_digits(f.step_size, pair.base_asset_precision))
            .unwrap_or(DEFAULT_TICK_DIGITS);
        // MARKET_LOT_SIZE usually publishes a zero step; market orders then follow the lot step.
        let market_lot = match pair.market_lot_size() {
            Some(f) if !f.step_size.is_zero() => {
                tick_digits(f.step_size, pair.base_asset_precision)
            }
            _ => lot,
        };
        Self {
            price,
            lot,
            market_lot,
        }
    }
}

/// Inclusive `[low, high]` range. `low > high` means nothing can trade right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub low: Decimal,
    pub high: Decimal,
}

impl Band {
    pub const fn unbounded() -> Self {
        Self {
            low: Decimal::ZERO,
            high: UNBOUNDED,
        }
    }

    pub const fn empty() -> Self {
        Self {
            low: UNBOUNDED,
            high: Decimal::ZERO,
        }
    }

    pub fn is_tradable(&self) -> bool {
        self.low <= self.high
    }

    pub fn contains(&self, value: Decimal) -> bool {
        self.is_tradable() && self.low <= value && value <= self.high
    }

    /// `value` sits at least `fraction` away from both edges (relative to the edge).
    pub fn contains_with_margin(&self, value: Decimal, fraction: Decimal) -> bool {
        if !self.contains(value) {
            return false;
        }
        let low = self.low * (Decimal::ONE + fraction);
        let high = if self.high == UNBOUNDED {
            UNBOUNDED
        } else {
            self.high * (Decimal::ONE - fraction)
        };
        low <= value && value <= high
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == UNBOUNDED {
            write!(f, "[{}, inf)", self.low)
        } else {
            write!(f, "[{}, {}]", self.low, self.high)
        }
    }
}

pub type PriceBand = Band;
pub type QtyBand = Band;

/// An exchange "max" of zero disables that limit.
fn upper_limit(max: Decimal) -> Decimal {
    if max.is_zero() {
        UNBOUNDED
    } else {
        max
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintModel {
    pair: TradingPair,
    ticks: TickPrecision,
}

impl ConstraintModel {
    pub fn new(pair: TradingPair) -> Self {
        let ticks = TickPrecision::derive(&pair);
        Self { pair, ticks }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn ticks(&self) -> TickPrecision {
        self.ticks
    }

    /// Prices the exchange accepts right now, given the current average price.
    pub fn price_band(&self, avg: Decimal) -> PriceBand {
        let (rel_low, rel_high) = match self.pair.percent_price() {
            Some(p) => (
                avg * p.multiplier_down * MARGIN_LOW,
                avg * p.multiplier_up * MARGIN_HIGH,
            ),
            None => (Decimal::ZERO, UNBOUNDED),
        };
        let (fix_low, fix_high) = match self.pair.price_filter() {
            Some(f) => (f.min_price, upper_limit(f.max_price)),
            None => (Decimal::ZERO, UNBOUNDED),
        };
        Band {
            low: rel_low.max(fix_low),
            high: rel_high.min(fix_high),
        }
    }

    /// Quantities the exchange accepts for an order priced at `price`
    /// (limit price, or the average price for market orders).
    pub fn qty_band(&self, price: Decimal, market: bool) -> QtyBand {
        let notional_floor = match self.pair.min_notional() {
            Some((min_notional, apply_to_market)) if !market || apply_to_market => {
                if price <= Decimal::ZERO {
                    return Band::empty();
                }
                min_notional / price * MARGIN_LOW
            }
            _ => Decimal::ZERO,
        };

        let lot: Option<&LotSizeFilter> = if market {
            self.pair.market_lot_size().or_else(|| self.pair.lot_size())
        } else {
            self.pair.lot_size()
        };
        let mut band = lot.map_or_else(Band::unbounded, |f| Band {
            low: f.min_qty,
            high: upper_limit(f.max_qty),
        });
        band.low = band.low.max(notional_floor);
        band
    }

    /// Price (or stop price) as sent to the exchange.
    pub fn price_amount(&self, price: Decimal) -> Decimal {
        let tick = self.pair.price_filter().map(|f| f.tick_size).unwrap_or_default();
        price_amount(normalize_price(price, tick), self.ticks.price)
    }

    /// Quantity for LIMIT and OCO orders.
    pub fn lot_amount(&self, qty: Decimal) -> Decimal {
        let step = self.pair.lot_size().map(|f| f.step_size).unwrap_or_default();
        qty_amount(normalize_quantity(qty, step), self.ticks.lot)
    }

    /// Quantity for MARKET orders.
    pub fn market_lot_amount(&self, qty: Decimal) -> Decimal {
        let step = self
            .pair
            .market_lot_size()
            .map(|f| f.step_size)
            .filter(|s| !s.is_zero())
            .or_else(|| self.pair.lot_size().map(|f| f.step_size))
            .unwrap_or_default();
        qty_amount(normalize_quantity(qty, step), self.ticks.market_lot)
    }

    /// Quote amount for a market buy sized in the quote asset.
    pub fn quote_amount(&self, amount: Decimal) -> Decimal {
        qty_amount(amount, self.ticks.price)
    }
}
