pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod types;

// Record pipeline core
pub mod pipeline;

// Layered boundaries for application and infrastructure
pub mod app;
pub mod infra;
