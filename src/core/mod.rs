pub mod config;
pub(crate) mod metrics;
pub mod redis;
pub(crate) mod retry;
pub(crate) mod shutdown;
pub mod state;
pub(crate) mod telemetry;
pub mod time;
