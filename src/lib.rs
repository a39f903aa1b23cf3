//! Library entrypoint: re‑export modules

pub mod collectors;
pub mod config;
pub mod errors;
pub mod export;
pub mod gather;
pub mod metrics;
