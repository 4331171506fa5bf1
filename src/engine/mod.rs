pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod schedule;
