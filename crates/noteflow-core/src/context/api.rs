//! Registro e inversión de llamadas a APIs externas.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptor de la acción que deshace una llamada externa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseAction {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl ReverseAction {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self { action: action.into(),
               payload }
    }
}

/// Llamada externa ya realizada por el processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub service: String,
    pub action: String,
    pub request: Value,
    pub response: Value,
    /// Estado remoto previo si la llamada modificó un recurso existente.
    pub previous: Option<Value>,
}

impl ApiCall {
    pub fn new(service: impl Into<String>, action: impl Into<String>, request: Value, response: Value) -> Self {
        Self { service: service.into(),
               action: action.into(),
               request,
               response,
               previous: None }
    }

    pub fn modifying(mut self, previous: Value) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.service, self.action)
    }
}

/// Ejecuta acciones inversas contra servicios externos durante rollback /
/// revert. Lo provee la capa que conoce los clientes HTTP concretos.
#[async_trait]
pub trait ApiReverter: Send + Sync {
    async fn invoke(&self, service: &str, reverse: &ReverseAction) -> Result<(), String>;
}
