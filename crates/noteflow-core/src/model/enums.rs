//! Enumeraciones de estado del modelo (jobs, steps, artifacts).
//!
//! Todas se serializan en `snake_case` para que la capa de transporte reciba
//! el mismo vocabulario que se persiste.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Estado de un job dentro de la máquina de estados del pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    AwaitingInput,
    Completed,
    Failed,
    Cancelled,
    Reverting,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [JobStatus::Pending,
                                     JobStatus::Processing,
                                     JobStatus::AwaitingInput,
                                     JobStatus::Completed,
                                     JobStatus::Failed,
                                     JobStatus::Cancelled,
                                     JobStatus::Reverting];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::AwaitingInput => "awaiting_input",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Reverting => "reverting",
        }
    }

    /// Estados finales de una corrida (sólo salen de ahí vía revert).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Estados en los que el job tiene un `current_step`.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::AwaitingInput)
    }

    /// Transiciones válidas. `Failed -> Processing` sólo la usa el reintento
    /// del pipeline; `Processing -> Processing` es el avance entre steps;
    /// `Pending -> Completed` cierra un job sin ningún processor candidato.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Processing | Completed | Cancelled | Reverting) => true,
            (Processing, Processing | AwaitingInput | Completed | Failed | Cancelled) => true,
            (AwaitingInput, Processing) | (AwaitingInput, Cancelled) => true,
            (Completed | Failed | Cancelled, Reverting) => true,
            (Failed, Processing) => true,
            (Reverting, Pending) | (Reverting, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL.iter()
                      .copied()
                      .find(|st| st.as_str() == s)
                      .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

/// Estado de un `StepResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    AwaitingInput,
    Completed,
    Failed,
    Skipped,
    Reverted,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::AwaitingInput => "awaiting_input",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Reverted => "reverted",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tipo de efecto lateral registrado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    FileCreate,
    FileModify,
    FileDelete,
    FileMove,
    FrontmatterUpdate,
    ExternalApiCreate,
    ExternalApiModify,
    Metadata,
}

/// Estado de un artifact: `pending -> created -> reverted`, o bien
/// `failed` / `orphaned` / `irreversible`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Pending,
    Created,
    Reverted,
    Failed,
    Orphaned,
    Irreversible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    FullyReversible,
    PartiallyReversible,
    ManualRevert,
    Irreversible,
}

/// Cuándo un processor necesita input externo antes de completar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiresInput {
    #[default]
    Never,
    Always,
    Conditional,
}
