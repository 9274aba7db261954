// src/lib.rs
pub mod config;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod server;
