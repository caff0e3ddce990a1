// src/types.rs
use crate::error::TradeError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// How the bought balance gets sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SellStrategy {
    /// Resting GTC limit (or OCO) order at the target price.
    Limit,
    /// Client-side market sells triggered by live trade prices.
    Market,
    /// Resting order plus client-side market sells.
    Hybrid,
}

impl std::fmt::Display for SellStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SellStrategy::Limit => "LIMIT",
            SellStrategy::Market => "MARKET",
            SellStrategy::Hybrid => "HYBRID",
        };
        f.write_str(name)
    }
}

// --- Exchange metadata ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub tick_size: Decimal,
}

/// Shared shape of LOT_SIZE and MARKET_LOT_SIZE.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentPriceFilter {
    pub multiplier_up: Decimal,
    pub multiplier_down: Decimal,
    #[serde(default)]
    pub avg_price_mins: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinNotionalFilter {
    pub min_notional: Decimal,
    #[serde(default = "default_true")]
    pub apply_to_market: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotionalFilter {
    pub min_notional: Decimal,
    #[serde(default = "default_true")]
    pub apply_min_to_market: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price(PriceFilter),
    #[serde(rename = "LOT_SIZE")]
    LotSize(LotSizeFilter),
    #[serde(rename = "MARKET_LOT_SIZE")]
    MarketLotSize(LotSizeFilter),
    #[serde(rename = "PERCENT_PRICE")]
    PercentPrice(PercentPriceFilter),
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional(MinNotionalFilter),
    #[serde(rename = "NOTIONAL")]
    Notional(NotionalFilter),
    #[serde(other)]
    Other,
}

/// One spot symbol from `exchangeInfo`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingPair {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    pub base_asset: String,
    pub base_asset_precision: u32,
    pub quote_asset: String,
    pub quote_asset_precision: u32,
    #[serde(default)]
    pub oco_allowed: bool,
    #[serde(default)]
    pub is_spot_trading_allowed: bool,
    #[serde(default)]
    pub quote_order_qty_market_allowed: bool,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl TradingPair {
    pub fn price_filter(&self) -> Option<&PriceFilter> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::Price(p) => Some(p),
            _ => None,
        })
    }

    pub fn lot_size(&self) -> Option<&LotSizeFilter> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::LotSize(l) => Some(l),
            _ => None,
        })
    }

    pub fn market_lot_size(&self) -> Option<&LotSizeFilter> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::MarketLotSize(l) => Some(l),
            _ => None,
        })
    }

    pub fn percent_price(&self) -> Option<&PercentPriceFilter> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::PercentPrice(p) => Some(p),
            _ => None,
        })
    }

    /// Minimum notional and whether it also binds market orders.
    /// MIN_NOTIONAL wins over the newer NOTIONAL filter when both are listed.
    pub fn min_notional(&self) -> Option<(Decimal, bool)> {
        let legacy = self.filters.iter().find_map(|f| match f {
            SymbolFilter::MinNotional(n) => Some((n.min_notional, n.apply_to_market)),
            _ => None,
        });
        legacy.or_else(|| {
            self.filters.iter().find_map(|f| match f {
                SymbolFilter::Notional(n) => Some((n.min_notional, n.apply_min_to_market)),
                _ => None,
            })
        })
    }

    /// Spot pair that accepts market buys sized in the quote asset.
    pub fn is_tradable(&self) -> bool {
        self.status == "TRADING"
            && self.is_spot_trading_allowed
            && self.quote_order_qty_market_allowed
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<TradingPair>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

// --- Orders ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub price: Decimal,
    pub qty: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default)]
    pub commission_asset: String,
}

/// Result of a filled MARKET order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrderReport {
    pub symbol: String,
    pub side: Side,
    pub status: String,
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty")]
    pub cumulative_quote_qty: Decimal,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

impl MarketOrderReport {
    /// Quantity-weighted mean fill price.
    pub fn average_price(&self) -> Result<Decimal, TradeError> {
        if self.executed_qty.is_zero() {
            return Err(TradeError::Integrity(format!(
                "market {:?} order on {} reports zero executed quantity",
                self.side, self.symbol
            )));
        }
        let avg: Decimal = self
            .fills
            .iter()
            .map(|f| f.price * f.qty / self.executed_qty)
            .sum();
        if avg.is_zero() {
            return Err(TradeError::Integrity(
                "average fill price seems to be zero".to_string(),
            ));
        }
        Ok(avg)
    }

    /// Commission withheld in `asset` across all fills.
    pub fn commission_in(&self, asset: &str) -> Decimal {
        self.fills
            .iter()
            .filter(|f| f.commission_asset == asset)
            .map(|f| f.commission)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Oco,
}

/// A sell order resting on the book.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHandle {
    /// `orderId` for LIMIT, `orderListId` for OCO.
    pub id: u64,
    pub kind: OrderKind,
    pub qty: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
}

/// Execution state of a resting order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderProgress {
    pub executed_qty: Decimal,
    /// No further fills are possible (filled, cancelled, expired or rejected).
    pub closed: bool,
    /// Executed quantity covers the full order.
    pub filled: bool,
}

/// One trade print from the live stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeTick {
    pub price: Decimal,
    pub timestamp: u64,
}

/// Holdings acquired by the buy and not yet sold.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub bought_qty: Decimal,
    pub mean_buy_price: Decimal,
    pub target_price: Decimal,
    pub stop_price: Decimal,
    pub remaining_qty: Decimal,
    pub outstanding: Option<OrderHandle>,
}

impl Position {
    /// Records quantity that left the position. Never increases `remaining_qty`.
    pub fn reduce(&mut self, sold: Decimal) {
        let sold = sold.max(Decimal::ZERO).min(self.remaining_qty);
        self.remaining_qty -= sold;
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_qty <= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn report(executed: Decimal, fills: Vec<(Decimal, Decimal)>) -> MarketOrderReport {
        MarketOrderReport {
            symbol: "ABCBTC".into(),
            side: Side::Buy,
            status: "FILLED".into(),
            executed_qty: executed,
            cumulative_quote_qty: Decimal::ZERO,
            fills: fills
                .into_iter()
                .map(|(price, qty)| Fill {
                    price,
                    qty,
                    commission: Decimal::ZERO,
                    commission_asset: "BNB".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn average_price_is_quantity_weighted() {
        let r = report(dec!(2.0), vec![(dec!(10), dec!(1.0)), (dec!(20), dec!(1.0))]);
        assert_eq!(r.average_price().unwrap(), dec!(15));
    }

    #[test]
    fn zero_average_price_is_an_integrity_error() {
        let r = report(dec!(2.0), vec![(dec!(0), dec!(2.0))]);
        assert!(matches!(r.average_price(), Err(TradeError::Integrity(_))));

        let empty = report(dec!(0), vec![]);
        assert!(matches!(empty.average_price(), Err(TradeError::Integrity(_))));
    }

    #[test]
    fn parses_binance_market_order_response() {
        let raw = r#"{
            "symbol": "ABCBTC", "orderId": 28, "side": "BUY", "status": "FILLED",
            "executedQty": "10.00000000", "cummulativeQuoteQty": "0.00100000",
            "fills": [
                {"price": "0.00010000", "qty": "4.00000000", "commission": "0.004", "commissionAsset": "ABC"},
                {"price": "0.00010000", "qty": "6.00000000", "commission": "0.001", "commissionAsset": "BNB"}
            ]
        }"#;
        let r: MarketOrderReport = serde_json::from_str(raw).unwrap();
        assert_eq!(r.executed_qty, dec!(10));
        assert_eq!(r.commission_in("ABC"), dec!(0.004));
        assert_eq!(r.average_price().unwrap(), dec!(0.0001));
    }

    #[test]
    fn parses_filters_and_ignores_unknown_ones() {
        let raw = r#"{
            "symbol": "ABCBTC", "status": "TRADING", "baseAsset": "ABC", "baseAssetPrecision": 8,
            "quoteAsset": "BTC", "quoteAssetPrecision": 8, "ocoAllowed": true,
            "isSpotTradingAllowed": true, "quoteOrderQtyMarketAllowed": true,
            "filters": [
                {"filterType": "PRICE_FILTER", "minPrice": "0.00000001", "maxPrice": "1000.00000000", "tickSize": "0.00000001"},
                {"filterType": "LOT_SIZE", "minQty": "1.00000000", "maxQty": "90000000.00000000", "stepSize": "1.00000000"},
                {"filterType": "ICEBERG_PARTS", "limit": 10},
                {"filterType": "NOTIONAL", "minNotional": "0.00010000", "applyMinToMarket": false, "maxNotional": "9000000.00000000", "applyMaxToMarket": false, "avgPriceMins": 5}
            ]
        }"#;
        let pair: TradingPair = serde_json::from_str(raw).unwrap();
        assert!(pair.is_tradable());
        assert_eq!(pair.lot_size().unwrap().step_size, dec!(1));
        assert!(pair.market_lot_size().is_none());
        assert_eq!(pair.min_notional(), Some((dec!(0.0001), false)));
        assert_eq!(pair.filters.len(), 4);
    }

    #[test]
    fn position_never_grows() {
        let mut pos = Position {
            symbol: "ABCBTC".into(),
            bought_qty: dec!(5),
            mean_buy_price: dec!(1),
            target_price: dec!(1.1),
            stop_price: dec!(0),
            remaining_qty: dec!(5),
            outstanding: None,
        };
        pos.reduce(dec!(-3));
        assert_eq!(pos.remaining_qty, dec!(5));
        pos.reduce(dec!(2));
        assert_eq!(pos.remaining_qty, dec!(3));
        pos.reduce(dec!(10));
        assert!(pos.is_closed());
    }
}
