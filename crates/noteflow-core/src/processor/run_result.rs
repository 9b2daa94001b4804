use serde_json::{Map, Value};

use crate::errors::ProcessorError;

/// Resultado de `Processor::process`.
///
/// - `Success`: el executor hace commit del contexto y mezcla `output` en
///   `job.data`.
/// - `AwaitingInput`: el step se pausa; `prompt` se guarda en el StepResult.
/// - `Failure`: el executor hace rollback antes de registrar el error.
#[derive(Debug)]
pub enum StepRunResult {
    Success { output: Map<String, Value>, message: Option<String> },
    AwaitingInput { prompt: Option<Value> },
    Failure { error: ProcessorError },
}

impl StepRunResult {
    pub fn success(output: Map<String, Value>) -> Self {
        StepRunResult::Success { output,
                                 message: None }
    }

    pub fn awaiting_input(prompt: Option<Value>) -> Self {
        StepRunResult::AwaitingInput { prompt }
    }

    pub fn failure(error: impl Into<ProcessorError>) -> Self {
        StepRunResult::Failure { error: error.into() }
    }

    pub fn with_message(self, msg: impl Into<String>) -> Self {
        match self {
            StepRunResult::Success { output, .. } => StepRunResult::Success { output,
                                                                            message: Some(msg.into()) },
            other => other,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepRunResult::Success { .. })
    }
}

impl From<Result<Map<String, Value>, ProcessorError>> for StepRunResult {
    fn from(r: Result<Map<String, Value>, ProcessorError>) -> Self {
        match r {
            Ok(output) => StepRunResult::success(output),
            Err(error) => StepRunResult::Failure { error },
        }
    }
}
