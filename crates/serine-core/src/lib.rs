pub mod error;
pub mod types;
pub mod config;
pub mod util;
pub mod provider;
pub mod session;
pub mod knowledge;
pub mod sentiment;
pub mod metrics;
pub mod agent;
pub mod service;

#[cfg(feature = "postgres-backend")]
pub mod db;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
