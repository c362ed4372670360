pub mod config;
pub mod http;
mod metrics;
mod rate_limit;
