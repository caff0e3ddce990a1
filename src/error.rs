// src/error.rs
//! Typed errors for the trading cycle.
//!
//! Expected branching (a rejected pair selection) lives in [`LockError`];
//! everything that ends a cycle travels as [`TradeError`].

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Why the exchange refused to serve us at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// HTTP 418, the IP is banned.
    Ban,
    /// HTTP 429, the request weight limit was hit.
    RateLimit,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ban => write!(f, "IP banned"),
            TransportKind::RateLimit => write!(f, "rate limited"),
        }
    }
}

/// Errors raised by the exchange connectors.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("{kind} by the exchange, wait {}s before retrying", retry_after.as_secs())]
    Transport {
        kind: TransportKind,
        retry_after: Duration,
    },

    /// Per-call refusal. The raw payload is kept so the caller can decide what to do.
    #[error("exchange rejected the request (HTTP {status}): {payload}")]
    Rejected {
        status: u16,
        payload: serde_json::Value,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("request signing failed: {0}")]
    Signing(String),
}

impl ExchangeError {
    /// Mandatory wait for transport-level refusals.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExchangeError::Transport { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ExchangeError::Rejected { .. })
    }
}

/// Outcome of a pair selection that did not win the lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Retryable: the caller may submit a different symbol.
    #[error("trading pair {symbol}/{quote} not found")]
    InvalidPair { symbol: String, quote: String },

    /// Terminal for the caller: a pair has already been selected.
    #[error("market operation is already running")]
    AlreadyLocked,

    /// Every input channel went away before a pair was selected.
    #[error("no trading pair was selected")]
    Abandoned,
}

/// Fatal conditions for the current trading cycle.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("{what} {value} is outside the allowed range [{low}, {high}]")]
    BoundsViolation {
        what: &'static str,
        value: Decimal,
        low: Decimal,
        high: Decimal,
    },

    #[error("data integrity error: {0}, verify the exchange state manually")]
    Integrity(String),

    #[error("unable to cancel order #{order_id}, it is probably executed already: {source}")]
    CancelFailed {
        order_id: u64,
        #[source]
        source: ExchangeError,
    },

    #[error("invalid engine state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("setup failed: {0}")]
    Setup(String),
}

impl TradeError {
    /// Wait duration demanded by the exchange, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TradeError::Exchange(e) => e.retry_after(),
            TradeError::CancelFailed { source, .. } => source.retry_after(),
            _ => None,
        }
    }
}
