//! Eventos observables del pipeline.
//!
//! Se emiten de forma síncrona en el momento de cada transición para que la
//! capa de transporte (HTTP/WebSocket) los retransmita sin pérdida.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{JobStatus, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEventKind {
    JobCreated { source_type: String, source_name: String },
    JobStarted,
    StepCompleted { step_name: String, status: StepStatus },
    StepAwaitingInput { step_name: String },
    JobCompleted,
    JobFailed { error: String },
    JobCancelled,
    JobReverted { to_step: Option<String>, status: JobStatus },
}

impl PipelineEventKind {
    /// Nombre estable del evento (igual al tag serializado).
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEventKind::JobCreated { .. } => "job_created",
            PipelineEventKind::JobStarted => "job_started",
            PipelineEventKind::StepCompleted { .. } => "step_completed",
            PipelineEventKind::StepAwaitingInput { .. } => "step_awaiting_input",
            PipelineEventKind::JobCompleted => "job_completed",
            PipelineEventKind::JobFailed { .. } => "job_failed",
            PipelineEventKind::JobCancelled => "job_cancelled",
            PipelineEventKind::JobReverted { .. } => "job_reverted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub seq: u64, // asignado por el bus (orden global de emisión)
    pub job_id: Uuid,
    #[serde(flatten)]
    pub kind: PipelineEventKind,
    pub ts: DateTime<Utc>,
}
