// src/logging/mod.rs
mod manager;
mod sink;

pub use manager::LogManager;
pub use sink::{LogMessage, LogSink, TracingSink};
