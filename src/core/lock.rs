// src/core/lock.rs
//! One-shot pair selection shared by every input channel.
//!
//! The first valid `attempt_lock` consumes the `oneshot::Sender`, so no later
//! caller can ever deliver a second pair. The engine owns the receiving half.

use crate::error::LockError;
use crate::types::TradingPair;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::info;

pub struct PairLock {
    quote_asset: String,
    /// Tradable pairs keyed by base asset.
    pairs: HashMap<String, TradingPair>,
    slot: Mutex<Option<oneshot::Sender<TradingPair>>>,
}

/// Receiving half, handed to the engine.
#[derive(Debug)]
pub struct LockWaiter {
    rx: oneshot::Receiver<TradingPair>,
}

impl LockWaiter {
    /// Resolves with the selected pair, or `Abandoned` once every
    /// handle to the lock is gone without a selection.
    pub async fn wait(self) -> Result<TradingPair, LockError> {
        self.rx.await.map_err(|_| LockError::Abandoned)
    }
}

impl PairLock {
    pub fn new(
        quote_asset: impl Into<String>,
        pairs: HashMap<String, TradingPair>,
    ) -> (Arc<Self>, LockWaiter) {
        let (tx, rx) = oneshot::channel();
        let lock = Arc::new(Self {
            quote_asset: quote_asset.into(),
            pairs,
            slot: Mutex::new(Some(tx)),
        });
        (lock, LockWaiter { rx })
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Selects the pair `<symbol>/<quote>` for trading.
    ///
    /// Only the first valid call succeeds; afterwards every call reports
    /// `AlreadyLocked`, whatever the symbol.
    pub fn attempt_lock(&self, symbol: &str) -> Result<(), LockError> {
        let symbol = symbol.trim().to_uppercase();
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());

        if slot.is_none() {
            return Err(LockError::AlreadyLocked);
        }
        let pair = self
            .pairs
            .get(&symbol)
            .cloned()
            .ok_or_else(|| LockError::InvalidPair {
                symbol: symbol.clone(),
                quote: self.quote_asset.clone(),
            })?;

        let Some(tx) = slot.take() else {
            return Err(LockError::AlreadyLocked);
        };
        info!("Locked trading pair {}", pair.symbol);
        tx.send(pair).map_err(|_| LockError::Abandoned)
    }

    pub fn is_locked(&self) -> bool {
        self.slot.lock().map(|s| s.is_none()).unwrap_or(true)
    }
}
