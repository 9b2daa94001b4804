use noteflow_core::{ConfigError, EngineError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("uso: {0}")]
    Usage(String),
    #[error("configuración inválida: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("almacenamiento: {0}")]
    Store(#[from] StoreError),
    #[error("json inválido: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Código de salida del binario.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Usage(_) => 2,
            AppError::Engine(EngineError::JobNotFound(_)) => 4,
            _ => 1,
        }
    }
}
