// src/connectors/binance.rs
use crate::config::ApiConfig;
use crate::connectors::messages::{
    AccountInfo, AggTradeEvent, CancelOrderListResponse, OrderAck, OrderListAck, OrderListState,
    OrderState, PriceResponse,
};
use crate::connectors::traits::{ExchangeClient, ExchangeResult, StreamClient};
use crate::error::{ExchangeError, TransportKind};
use crate::types::{
    Balance, ExchangeInfo, MarketOrderReport, OrderHandle, OrderKind, OrderProgress, TradeTick,
};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceClient {
    api_key: String,
    secret_key: String,
    http_client: Client,
    base_rest_url: String,
    base_ws_url: String,
    recv_window: u64,
}

impl BinanceClient {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            http_client: Client::new(),
            base_rest_url: config.rest_url.trim_end_matches('/').to_string(),
            base_ws_url: config.ws_url.trim_end_matches('/').to_string(),
            recv_window: config.recv_window,
        }
    }

    fn sign_and_build_query(&self, params: Vec<(&str, String)>) -> ExchangeResult<String> {
        let mut params = params;
        params.push(("recvWindow", self.recv_window.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query_string = serde_urlencoded::to_string(&params)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(query_string.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}&signature={}", query_string, signature))
    }

    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> ExchangeResult<T> {
        let full_query = self.sign_and_build_query(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, full_query);

        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        read_response(response).await
    }

    async fn send_public_request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.base_rest_url, endpoint);
        let response = self
            .http_client
            .get(&url)
            .query(params)
            .header("Accept", "application/json")
            .send()
            .await?;

        read_response(response).await
    }

    async fn order_state(&self, symbol: &str, order_id: u64) -> ExchangeResult<OrderState> {
        self.send_signed_request(
            Method::GET,
            "/api/v3/order",
            vec![
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
        )
        .await
    }
}

/// Maps transport refusals and order rejections onto typed errors.
async fn read_response<T: DeserializeOwned>(response: Response) -> ExchangeResult<T> {
    let status = response.status();

    let transport = match status {
        StatusCode::IM_A_TEAPOT => Some(TransportKind::Ban),
        StatusCode::TOO_MANY_REQUESTS => Some(TransportKind::RateLimit),
        _ => None,
    };
    if let Some(kind) = transport {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        return Err(ExchangeError::Transport {
            kind,
            retry_after: Duration::from_secs(retry_after),
        });
    }

    let body = response.text().await?;
    if !status.is_success() {
        let payload = serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body));
        return Err(ExchangeError::Rejected {
            status: status.as_u16(),
            payload,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

fn client_order_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        self.send_public_request("/api/v3/exchangeInfo", &[]).await
    }

    async fn avg_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let resp: PriceResponse = self
            .send_public_request("/api/v3/avgPrice", &[("symbol", symbol)])
            .await?;
        Ok(resp.price)
    }

    async fn last_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let resp: PriceResponse = self
            .send_public_request("/api/v3/ticker/price", &[("symbol", symbol)])
            .await?;
        Ok(resp.price)
    }

    async fn balances(&self) -> ExchangeResult<Vec<Balance>> {
        let resp: AccountInfo = self
            .send_signed_request(Method::GET, "/api/v3/account", vec![])
            .await?;
        Ok(resp.balances)
    }

    async fn buy_market(
        &self,
        symbol: &str,
        quote_amount: Decimal,
    ) -> ExchangeResult<MarketOrderReport> {
        info!("🚀 Sending Order: MARKET BUY {} for {} quote", symbol, quote_amount);
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", "BUY".to_string()),
            ("type", "MARKET".to_string()),
            ("quoteOrderQty", quote_amount.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        self.send_signed_request(Method::POST, "/api/v3/order", params)
            .await
    }

    async fn sell_market(&self, symbol: &str, qty: Decimal) -> ExchangeResult<MarketOrderReport> {
        info!("🚀 Sending Order: MARKET SELL {} {}", qty, symbol);
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", "SELL".to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", qty.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        self.send_signed_request(Method::POST, "/api/v3/order", params)
            .await
    }

    async fn sell_limit(&self, symbol: &str, qty: Decimal, price: Decimal) -> ExchangeResult<u64> {
        info!("🚀 Sending Order: LIMIT SELL {} {} @ {}", qty, symbol, price);
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", "SELL".to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", qty.to_string()),
            ("price", price.to_string()),
            ("newClientOrderId", client_order_id()),
        ];
        let ack: OrderAck = self
            .send_signed_request(Method::POST, "/api/v3/order", params)
            .await?;
        info!("Limit sell #{} accepted (status: {})", ack.order_id, ack.status);
        Ok(ack.order_id)
    }

    async fn sell_oco(
        &self,
        symbol: &str,
        qty: Decimal,
        price: Decimal,
        stop_price: Decimal,
        stop_limit_price: Decimal,
    ) -> ExchangeResult<u64> {
        info!(
            "🚀 Sending Order: OCO SELL {} {} @ {}, stop {} (limit {})",
            qty, symbol, price, stop_price, stop_limit_price
        );
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", "SELL".to_string()),
            ("quantity", qty.to_string()),
            ("price", price.to_string()),
            ("stopPrice", stop_price.to_string()),
            ("stopLimitPrice", stop_limit_price.to_string()),
            ("stopLimitTimeInForce", "GTC".to_string()),
            ("listClientOrderId", client_order_id()),
        ];
        let ack: OrderListAck = self
            .send_signed_request(Method::POST, "/api/v3/order/oco", params)
            .await?;
        info!(
            "OCO sell #{} accepted (status: {})",
            ack.order_list_id, ack.list_order_status
        );
        Ok(ack.order_list_id)
    }

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> ExchangeResult<Decimal> {
        let resp: OrderState = self
            .send_signed_request(
                Method::DELETE,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;
        info!("Canceled limit order #{} (status: {})", resp.order_id, resp.status);
        Ok(resp.executed_qty)
    }

    async fn cancel_oco(&self, symbol: &str, order_list_id: u64) -> ExchangeResult<Decimal> {
        let resp: CancelOrderListResponse = self
            .send_signed_request(
                Method::DELETE,
                "/api/v3/orderList",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderListId", order_list_id.to_string()),
                ],
            )
            .await?;
        info!(
            "Canceled OCO #{} (status: {})",
            resp.order_list_id, resp.list_order_status
        );
        Ok(resp.order_reports.iter().map(|r| r.executed_qty).sum())
    }

    async fn query_order(
        &self,
        symbol: &str,
        order: &OrderHandle,
    ) -> ExchangeResult<OrderProgress> {
        match order.kind {
            OrderKind::Limit => {
                let state = self.order_state(symbol, order.id).await?;
                Ok(OrderProgress {
                    executed_qty: state.executed_qty,
                    closed: state.is_closed(),
                    filled: state.status == "FILLED",
                })
            }
            OrderKind::Oco => {
                let list: OrderListState = self
                    .send_signed_request(
                        Method::GET,
                        "/api/v3/orderList",
                        vec![("orderListId", order.id.to_string())],
                    )
                    .await?;
                let mut executed_qty = Decimal::ZERO;
                let mut filled = false;
                for member in &list.orders {
                    let state = self.order_state(symbol, member.order_id).await?;
                    executed_qty += state.executed_qty;
                    filled |= state.status == "FILLED";
                }
                debug!(
                    "OCO #{} is {} ({} executed)",
                    list.order_list_id, list.list_order_status, executed_qty
                );
                Ok(OrderProgress {
                    executed_qty,
                    closed: list.is_closed(),
                    filled,
                })
            }
        }
    }
}

#[async_trait]
impl StreamClient for BinanceClient {
    async fn subscribe_trades(
        &self,
        symbol: &str,
        sender: mpsc::Sender<TradeTick>,
    ) -> ExchangeResult<()> {
        let ws_url = format!("{}/ws/{}@aggTrade", self.base_ws_url, symbol.to_lowercase());
        let url = Url::parse(&ws_url)?;

        let (ws_stream, _) = connect_async(url).await?;
        info!("WebSocket connected for {}", symbol);

        let symbol = symbol.to_string();
        tokio::spawn(async move {
            let (_write, mut read) = ws_stream.split();

            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        warn!("WebSocket for {} closed by server: {:?}", symbol, frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("WebSocket Error for {}: {}", symbol, e);
                        break;
                    }
                };
                let event = match serde_json::from_str::<AggTradeEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("Skipping unexpected stream payload: {}", e);
                        continue;
                    }
                };
                let tick = TradeTick {
                    price: event.price,
                    timestamp: event.trade_time,
                };
                if sender.send(tick).await.is_err() {
                    // consumer is gone
                    break;
                }
            }
            info!("WebSocket task finished for {}", symbol);
        });

        Ok(())
    }
}
