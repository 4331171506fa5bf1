pub mod cli;
pub mod engine;
pub mod error;
pub mod http;
pub mod output;
pub mod trace;
