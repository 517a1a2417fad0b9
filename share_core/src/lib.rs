pub mod config;
pub mod logger;
pub mod metrics;
pub mod os;
pub mod signals;
