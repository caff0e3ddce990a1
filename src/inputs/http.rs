// src/inputs/http.rs
//! Symbol submission over HTTP: `POST /` with the base asset as the raw body.

use crate::config::ServerConfig;
use crate::core::lock::PairLock;
use crate::error::LockError;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct LockResponse {
    pub status: &'static str,
}

pub fn router(lock: Arc<PairLock>) -> Router {
    Router::new().route("/", post(submit_symbol)).with_state(lock)
}

async fn submit_symbol(State(lock): State<Arc<PairLock>>, body: String) -> impl IntoResponse {
    let (code, status) = match lock.attempt_lock(&body) {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e @ LockError::InvalidPair { .. }) => {
            warn!("{}", e);
            (StatusCode::BAD_REQUEST, "invalid_symbol")
        }
        Err(e) => {
            warn!("{}", e);
            (StatusCode::OK, "closed")
        }
    };
    (code, Json(LockResponse { status }))
}

/// Serves until the listener fails. Spawned next to the stdin prompt.
pub async fn serve(lock: Arc<PairLock>, config: &ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting HTTP listener at {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(lock)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constraints::tests::pair_with;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn lock() -> (Arc<PairLock>, crate::core::lock::LockWaiter) {
        PairLock::new("BTC", HashMap::from([("ABC".to_string(), pair_with(vec![]))]))
    }

    async fn post_symbol(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn lock_responses_follow_the_lock_state() {
        let (lock, waiter) = lock();
        let app = router(lock);

        let (code, body) = post_symbol(app.clone(), "xyz").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "invalid_symbol");

        let (code, body) = post_symbol(app.clone(), "abc\n").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (code, body) = post_symbol(app, "abc").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "closed");

        assert_eq!(waiter.wait().await.unwrap().symbol, "ABCBTC");
    }
}
