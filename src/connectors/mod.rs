// src/connectors/mod.rs
pub mod fear_greed;
pub mod serpapi;
pub mod traits;
pub mod upbit;
