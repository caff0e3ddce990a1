// src/inputs/mod.rs
pub mod http;
pub mod stdin;
