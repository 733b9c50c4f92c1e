#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod http;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod provision;
pub mod registry;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
