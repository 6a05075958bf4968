// Subscription system module
// Entitlements, free tries and in-app purchase orchestration

pub mod types;
pub mod config;
pub mod clock;
pub mod storage;
pub mod bridge;
pub mod api;
pub mod remote_config;
pub mod notify;
pub mod manager;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use config::*;
pub use manager::SubscriptionManager;
