pub mod aggregator;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod health;
pub mod indicator;
pub mod model;
pub mod recommendation;
pub mod session;
pub mod stream;
pub mod upstox;

/// Wall clock in Unix milliseconds.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
