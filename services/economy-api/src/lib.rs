pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod nats;
pub mod services;

pub use config::Config;
pub use errors::{ApiError, Result};
