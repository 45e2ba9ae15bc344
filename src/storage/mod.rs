// src/storage/mod.rs
pub mod ledger;
