//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Controller error: {0}")]
    Controller(#[from] sigexec_executor::ControllerError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] sigexec_gateway::GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] sigexec_persistence::StoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] sigexec_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
