// src/core/mod.rs
pub mod constraints;
pub mod engine;
pub mod lock;
pub mod report;
pub mod resolver;
pub mod setup;
