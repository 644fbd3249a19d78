pub mod accounts;
pub mod usage;

#[cfg(feature = "http-api")]
pub mod billing;

#[cfg(feature = "http-api")]
pub mod http;
