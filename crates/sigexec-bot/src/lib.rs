//! Signal execution bot.
//!
//! Loads the TOML config, wires each account to an exchange gateway and the
//! shared order store, and runs one tick loop per account.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AccountConfig, AppConfig, ExchangeKind, StoreBackend};
pub use error::{AppError, AppResult};
