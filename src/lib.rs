#![forbid(unsafe_code)]

//! Durable outbound action queue: catalog, quota and validation gates,
//! dispatcher, and their `SQLite` persistence.

pub mod app;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod executor;
pub mod models;
pub mod persistence;
pub mod quota;
pub mod status;
pub mod validation;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
