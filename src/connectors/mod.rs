// src/connectors/mod.rs
pub mod binance;
pub mod messages;
pub mod traits;
