// src/lib.rs
pub mod config;
pub mod connectors;
pub mod core;
pub mod decision;
pub mod errors;
pub mod storage;
pub mod types;
pub mod utils;
