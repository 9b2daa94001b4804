//! StepResult: registro de la ejecución de un processor sobre un job.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::artifact::Artifact;
use super::enums::StepStatus;
use crate::constants::SKIP_REASON_KEY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_data: Map<String, Value>,
    pub message: Option<String>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub awaiting_input_since: Option<DateTime<Utc>>,
    /// Esquema o texto de ayuda ofrecido al pausar.
    pub input_prompt: Option<Value>,
    pub user_input: Option<Value>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub reverted_at: Option<DateTime<Utc>>,
    pub revert_error: Option<String>,
    /// Valores de `job.data` que el step pisó, tal como estaban antes.
    #[serde(default)]
    pub data_before: Map<String, Value>,
    /// Claves que el step agregó a `job.data` sin que existieran.
    #[serde(default)]
    pub data_added: Vec<String>,
}

impl StepResult {
    pub fn new(job_id: Uuid, step_name: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(),
               job_id,
               step_name: step_name.into(),
               status: StepStatus::Pending,
               started_at: None,
               completed_at: None,
               output_data: Map::new(),
               message: None,
               error_message: None,
               error_trace: None,
               awaiting_input_since: None,
               input_prompt: None,
               user_input: None,
               artifacts: Vec::new(),
               reverted_at: None,
               revert_error: None,
               data_before: Map::new(),
               data_added: Vec::new() }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&mut self, output: Map<String, Value>, message: Option<String>, artifacts: Vec<Artifact>) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output_data = output;
        self.message = message;
        // conserva lo confirmado antes de una pausa
        self.artifacts.extend(artifacts);
        self.awaiting_input_since = None;
    }

    pub fn fail(&mut self, error: impl Into<String>, trace: Option<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
        self.error_trace = trace;
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
        self.output_data
            .insert(SKIP_REASON_KEY.to_string(), Value::String(reason.into()));
    }

    pub fn await_input(&mut self, prompt: Option<Value>) {
        self.status = StepStatus::AwaitingInput;
        self.awaiting_input_since = Some(Utc::now());
        self.input_prompt = prompt;
    }

    pub fn provide_input(&mut self, input: Value) {
        self.user_input = Some(input);
        self.status = StepStatus::Running;
    }

    pub fn mark_reverted(&mut self) {
        self.status = StepStatus::Reverted;
        self.reverted_at = Some(Utc::now());
        self.revert_error = None;
    }

    /// Anota el estado previo de `keys` en `data`. Sólo cuenta la primera vez
    /// que el step toca cada clave.
    pub fn remember_data<K: AsRef<str>>(&mut self, data: &Map<String, Value>, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            let key = key.as_ref();
            if self.data_before.contains_key(key) || self.data_added.iter().any(|k| k == key) {
                continue;
            }
            match data.get(key) {
                Some(v) => {
                    self.data_before.insert(key.to_string(), v.clone());
                }
                None => self.data_added.push(key.to_string()),
            }
        }
    }

    /// Deja `data` como estaba antes de que el step escribiera.
    pub fn restore_data(&self, data: &mut Map<String, Value>) {
        for key in &self.data_added {
            data.remove(key);
        }
        for (k, v) in &self.data_before {
            data.insert(k.clone(), v.clone());
        }
    }

    /// Duración de la ejecución si ya terminó.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some(c - s),
            _ => None,
        }
    }
}
