// src/core/mod.rs
pub mod executor;
pub mod scheduler;
