//! Job: unidad de trabajo que recorre el pipeline.
//!
//! Invariante principal: `current_step` está presente si y sólo si el estado
//! es `processing` o `awaiting_input`. Todas las transiciones pasan por
//! `transition`, que valida contra `JobStatus::can_transition_to`.
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::artifact::Artifact;
use super::enums::{JobStatus, StepStatus};
use super::step::StepResult;
use crate::errors::EngineError;

/// Origen del job (archivo observado, texto inline, URL...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSource {
    pub source_type: String,
    pub name: String,
    pub path: Option<String>,
    pub url: Option<String>,
}

impl JobSource {
    pub fn new(source_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self { source_type: source_type.into(),
               name: name.into(),
               path: None,
               url: None }
    }

    /// Fuente respaldada por un archivo local; el nombre es el file name.
    pub fn file(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = std::path::Path::new(&path).file_name()
                                              .map(|n| n.to_string_lossy().into_owned())
                                              .unwrap_or_else(|| path.clone());
        Self { source_type: "file".into(),
               name,
               path: Some(path),
               url: None }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source: JobSource,
    pub status: JobStatus,
    pub current_step: Option<String>,
    /// Processor preferido para el primer step (si es candidato).
    pub initial_processor: Option<String>,
    /// Último destino de revert (`None` = revert completo o nunca revertido).
    pub reverted_to: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub history: Vec<StepResult>,
    /// StepResults sintéticos con artifacts compensatorios de `revert()`.
    #[serde(default)]
    pub revert_log: Vec<StepResult>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub priority: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source: JobSource) -> Self {
        let now = Utc::now();
        Self { id: Uuid::new_v4(),
               source,
               status: JobStatus::Pending,
               current_step: None,
               initial_processor: None,
               reverted_to: None,
               data: Map::new(),
               history: Vec::new(),
               revert_log: Vec::new(),
               config: Map::new(),
               tags: BTreeSet::new(),
               priority: 0,
               error_message: None,
               created_at: now,
               started_at: None,
               completed_at: None,
               updated_at: now }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    pub fn with_initial_processor(mut self, name: impl Into<String>) -> Self {
        self.initial_processor = Some(name.into());
        self
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition { from: self.status,
                                                        to: next });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Entra (o continúa) en `processing` con `step` como step activo.
    pub fn start_processing(&mut self, step: &str) -> Result<(), EngineError> {
        self.transition(JobStatus::Processing)?;
        self.current_step = Some(step.to_string());
        self.error_message = None;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn await_input(&mut self, step: &str) -> Result<(), EngineError> {
        self.transition(JobStatus::AwaitingInput)?;
        self.current_step = Some(step.to_string());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), EngineError> {
        self.transition(JobStatus::Completed)?;
        self.current_step = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), EngineError> {
        self.transition(JobStatus::Failed)?;
        self.current_step = None;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), EngineError> {
        self.transition(JobStatus::Cancelled)?;
        self.current_step = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn start_revert(&mut self) -> Result<(), EngineError> {
        self.transition(JobStatus::Reverting)?;
        self.current_step = None;
        Ok(())
    }

    /// Cierra un revert exitoso: vuelve a `pending` sin step activo.
    pub fn finish_revert(&mut self, to_step: Option<String>) -> Result<(), EngineError> {
        self.transition(JobStatus::Pending)?;
        self.current_step = None;
        self.reverted_to = to_step;
        self.error_message = None;
        self.completed_at = None;
        Ok(())
    }

    pub fn fail_revert(&mut self, error: impl Into<String>) -> Result<(), EngineError> {
        self.fail(error)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Último StepResult registrado para `name`.
    pub fn step_result(&self, name: &str) -> Option<&StepResult> {
        self.history.iter().rev().find(|r| r.step_name == name)
    }

    pub fn has_step_with_status(&self, name: &str, status: StepStatus) -> bool {
        self.history
            .iter()
            .any(|r| r.step_name == name && r.status == status)
    }

    pub fn completed_steps(&self) -> Vec<&str> {
        self.history
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .map(|r| r.step_name.as_str())
            .collect()
    }

    /// Agrega el StepResult o reemplaza la entrada pausada del mismo step.
    pub fn record_step(&mut self, result: StepResult) {
        match self.history.last_mut() {
            Some(last) if last.id == result.id => *last = result,
            _ => self.history.push(result),
        }
        self.touch();
    }

    /// Last-writer-wins sobre `data`.
    pub fn merge_data(&mut self, output: &Map<String, Value>) {
        for (k, v) in output {
            self.data.insert(k.clone(), v.clone());
        }
        self.touch();
    }

    pub fn all_artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.history.iter().flat_map(|r| r.artifacts.iter())
    }

    /// Chequeo del invariante `current_step` <-> estado activo.
    pub fn current_step_consistent(&self) -> bool {
        self.current_step.is_some() == self.status.is_active()
    }
}
