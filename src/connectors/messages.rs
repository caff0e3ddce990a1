// src/connectors/messages.rs
//! Raw Binance payloads that do not map one-to-one onto domain types.
use crate::types::Balance;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Aggregated trade event from wss://stream.binance.com:9443/ws/<symbol>@aggTrade
/// Short field names (rename) map Binance's JSON.
#[derive(Debug, Deserialize)]
pub struct AggTradeEvent {
    #[serde(rename = "p")]
    pub price: Decimal,

    #[serde(rename = "T")]
    pub trade_time: u64,
}

#[derive(Debug, Deserialize)]
pub struct PriceResponse {
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: u64,
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListAck {
    pub order_list_id: u64,
    pub list_order_status: String,
}

/// `DELETE /api/v3/order` and `GET /api/v3/order`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderState {
    pub order_id: u64,
    pub status: String,
    pub executed_qty: Decimal,
}

impl OrderState {
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status.as_str(),
            "FILLED" | "CANCELED" | "REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH"
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderListResponse {
    pub order_list_id: u64,
    pub list_order_status: String,
    pub order_reports: Vec<OrderState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListMember {
    pub order_id: u64,
}

/// `GET /api/v3/orderList`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListState {
    pub order_list_id: u64,
    pub list_order_status: String,
    pub orders: Vec<OrderListMember>,
}

impl OrderListState {
    pub fn is_closed(&self) -> bool {
        self.list_order_status == "ALL_DONE"
    }
}
