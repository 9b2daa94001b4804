//! Errores de persistencia.
//! Mapea errores de IO / serde a variantes propias y luego a `StoreError`.

use noteflow_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("corrupt document {path}: {source}")]
    Corrupt { path: String, #[source] source: serde_json::Error },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io { path: path.display().to_string(),
                   source }
    }
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Io { .. } => StoreError::Backend(err.to_string()),
            PersistenceError::Corrupt { .. } | PersistenceError::Serialize(_) => StoreError::Serialization(err.to_string()),
        }
    }
}
