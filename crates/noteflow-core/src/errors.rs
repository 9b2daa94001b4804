//! Errores del core agrupados por capa.
//!
//! - `ConfigError`: problemas de registro/configuración (fatales al cargar).
//! - `ContextError`: fallas al aplicar o invertir un efecto lateral.
//! - `ProcessorError`: falla estructurada devuelta por un processor.
//! - `StoreError`: fallas del backend de almacenamiento.
//! - `EngineError`: errores del motor (executor / pipeline) hacia el llamador.

use thiserror::Error;
use uuid::Uuid;

use crate::model::JobStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("processor name must not be empty")] EmptyName,
    #[error("processor '{0}' already registered")] DuplicateProcessor(String),
    #[error("processor '{processor}' requires unknown processor '{dependency}'")]
    UnknownDependency { processor: String, dependency: String },
    #[error("dependency cycle between processors: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),
    #[error("processor '{processor}' still required by: {}", .dependents.join(", "))]
    HasDependents { processor: String, dependents: Vec<String> },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")] Backend(String),
    #[error("serialization error: {0}")] Serialization(String),
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("file already exists: {0}")] AlreadyExists(String),
    #[error("file not found: {0}")] NotFound(String),
    #[error("move destination already exists: {0}")] DestinationExists(String),
    #[error("invalid frontmatter in {path}: {reason}")]
    Frontmatter { path: String, reason: String },
    #[error("artifact {0} has no before_state to restore")] MissingSnapshot(String),
    #[error("no reverse action recorded for {0}")] MissingReverseAction(String),
    #[error("no api reverter configured for {0}")] NoReverter(String),
    #[error("reverse action for {target} failed: {reason}")]
    ReverseActionFailed { target: String, reason: String },
    #[error("artifact {0} is irreversible")] Irreversible(String),
    #[error(transparent)] Store(#[from] StoreError),
}

impl ContextError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(),
                   source }
    }
}

/// Falla estructurada de un processor. Se convierte en campos del
/// `StepResult` (`error_message`, `error_trace`) y nunca sale del executor.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{message}")]
    Failed { message: String, trace: Option<String> },
    #[error(transparent)] Context(#[from] ContextError),
    #[error("io error: {0}")] Io(#[from] std::io::Error),
    #[error("json error: {0}")] Json(#[from] serde_json::Error),
}

impl ProcessorError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed { message: message.into(),
                       trace: None }
    }

    pub fn with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::Failed { message: message.into(),
                       trace: Some(trace.into()) }
    }

    /// Traza asociada; para errores envueltos se usa la cadena de `source`.
    pub fn trace(&self) -> Option<String> {
        match self {
            Self::Failed { trace, .. } => trace.clone(),
            other => {
                let mut chain = Vec::new();
                let mut cur = std::error::Error::source(other);
                while let Some(e) = cur {
                    chain.push(e.to_string());
                    cur = e.source();
                }
                if chain.is_empty() {
                    None
                } else {
                    Some(chain.join("\ncaused by: "))
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("job {0} not found")] JobNotFound(Uuid),
    #[error("job {0} is being processed by another worker")] JobBusy(Uuid),
    #[error("job {0} is not awaiting input")] NotAwaitingInput(Uuid),
    #[error("unknown processor '{0}'")] UnknownProcessor(String),
    #[error("step '{0}' not found in job history")] StepNotInHistory(String),
    #[error("invalid user input: {0}")] InvalidInput(String),
    #[error("pipeline is shutting down")] ShuttingDown,
    #[error("revert of job {job_id} failed: {reason}")]
    RevertFailed { job_id: Uuid, reason: String },
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Context(#[from] ContextError),
    #[error(transparent)] Config(#[from] ConfigError),
}
