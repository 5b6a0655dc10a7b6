pub mod config;
pub mod database;
pub mod emissions;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod nats;
pub mod services;

pub use config::Config;
pub use errors::{CreditEngineError, Result};
