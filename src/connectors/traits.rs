// src/connectors/traits.rs
use crate::error::ExchangeError;
use crate::types::{
    Balance, ExchangeInfo, MarketOrderReport, OrderHandle, OrderProgress, TradeTick,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Live trade prints. The stream ends (sender dropped) when the socket closes;
/// the consumer subscribes again with a fresh channel.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn subscribe_trades(
        &self,
        symbol: &str,
        sender: mpsc::Sender<TradeTick>,
    ) -> ExchangeResult<()>;
}

/// Signed spot REST operations. Amounts arrive already rendered to the
/// pair's tick precision.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo>;

    async fn avg_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    async fn last_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    async fn balances(&self) -> ExchangeResult<Vec<Balance>>;

    /// Market buy spending `quote_amount` of the quote asset.
    async fn buy_market(&self, symbol: &str, quote_amount: Decimal)
        -> ExchangeResult<MarketOrderReport>;

    async fn sell_market(&self, symbol: &str, qty: Decimal) -> ExchangeResult<MarketOrderReport>;

    /// GTC limit sell, returns the order id.
    async fn sell_limit(&self, symbol: &str, qty: Decimal, price: Decimal) -> ExchangeResult<u64>;

    /// OCO sell, returns the order list id.
    async fn sell_oco(
        &self,
        symbol: &str,
        qty: Decimal,
        price: Decimal,
        stop_price: Decimal,
        stop_limit_price: Decimal,
    ) -> ExchangeResult<u64>;

    /// Returns the quantity the order executed before it was cancelled.
    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ExchangeResult<Decimal>;

    /// Returns the quantity executed across all legs before cancellation.
    async fn cancel_oco(&self, symbol: &str, order_list_id: u64) -> ExchangeResult<Decimal>;

    async fn query_order(&self, symbol: &str, order: &OrderHandle) -> ExchangeResult<OrderProgress>;
}
