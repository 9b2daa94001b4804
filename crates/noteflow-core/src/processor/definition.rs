use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::run_result::StepRunResult;
use crate::context::ExecutionContext;
use crate::errors::ProcessorError;
use crate::model::{Job, RequiresInput, StepResult};

/// Contrato de un processor (plugin). El motor sólo los conoce a través de
/// este trait, nunca por tipo concreto.
///
/// Reglas:
/// - `should_process` es un predicado puro: no muta el job ni produce efectos.
/// - Todo efecto lateral de `process` pasa por el `ExecutionContext`.
/// - `revert` corre después de que el motor ya invirtió los artifacts del
///   StepResult; sirve para limpieza propia (p.ej. claves de `job.data`).
#[async_trait]
pub trait Processor: Send + Sync {
    /// Identificador único dentro del registry.
    fn name(&self) -> &str;

    fn display_name(&self) -> String {
        self.name().to_string()
    }

    fn description(&self) -> &str {
        ""
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Processors que deben tener un StepResult `completed` antes de ofrecer
    /// éste.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    fn requires_input(&self) -> RequiresInput {
        RequiresInput::Never
    }

    /// Mayor prioridad se ofrece primero entre candidatos.
    fn priority(&self) -> i32 {
        0
    }

    async fn should_process(&self, _job: &Job) -> Result<bool, ProcessorError> {
        Ok(true)
    }

    /// Para `RequiresInput::Conditional`: si devuelve `true` el step se
    /// pausa antes de llamar a `process`.
    fn needs_input(&self, _job: &Job) -> bool {
        false
    }

    /// Esquema / ayuda a mostrar mientras el step espera input.
    fn input_schema(&self, _job: &Job) -> Option<Value> {
        None
    }

    /// Validación del input antes de reanudar. Un `Err` deja el job pausado.
    async fn validate_input(&self, _job: &Job, _input: &Value) -> Result<(), String> {
        Ok(())
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult;

    async fn revert(&self, _job: &mut Job, _result: &StepResult, _ctx: &mut ExecutionContext) -> Result<bool, ProcessorError> {
        Ok(true)
    }
}

/// Vista serializable de la metadata de un processor registrado.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub requires: Vec<String>,
    pub requires_input: RequiresInput,
    pub priority: i32,
}

impl ProcessorInfo {
    pub fn of(p: &dyn Processor) -> Self {
        Self { name: p.name().to_string(),
               display_name: p.display_name(),
               description: p.description().to_string(),
               version: p.version().to_string(),
               requires: p.requires(),
               requires_input: p.requires_input(),
               priority: p.priority() }
    }
}
