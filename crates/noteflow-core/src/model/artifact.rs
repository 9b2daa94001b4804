//! Artifact: registro de un efecto lateral producido por un step.
//!
//! Invariantes:
//! - `created -> reverted` ocurre a lo sumo una vez.
//! - Un artifact `irreversible` nunca llega a `reverted`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::enums::{ArtifactStatus, ArtifactType, Reversibility};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_name: String,
    pub artifact_type: ArtifactType,
    /// Ruta de archivo o token `service:action`.
    pub target: String,
    pub before_state: Option<String>,
    pub after_state: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: ArtifactStatus,
    pub reversibility: Reversibility,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reverted_at: Option<DateTime<Utc>>,
}

impl Artifact {
    /// Nuevo artifact en estado `pending`, totalmente reversible.
    pub fn new(job_id: Uuid, step_name: impl Into<String>, artifact_type: ArtifactType, target: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(),
               job_id,
               step_name: step_name.into(),
               artifact_type,
               target: target.into(),
               before_state: None,
               after_state: None,
               metadata: Map::new(),
               status: ArtifactStatus::Pending,
               reversibility: Reversibility::FullyReversible,
               error_message: None,
               created_at: Utc::now(),
               reverted_at: None }
    }

    pub fn with_states(mut self, before: Option<String>, after: Option<String>) -> Self {
        self.before_state = before;
        self.after_state = after;
        self
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Marca el artifact como no reversible; queda fuera de rollback/revert.
    pub fn mark_irreversible(&mut self, reason: &str) {
        self.status = ArtifactStatus::Irreversible;
        self.reversibility = Reversibility::Irreversible;
        self.metadata
            .insert("irreversible_reason".to_string(), Value::String(reason.to_string()));
    }

    /// `pending -> created`. Otros estados se dejan intactos.
    pub fn mark_created(&mut self) {
        if self.status == ArtifactStatus::Pending {
            self.status = ArtifactStatus::Created;
        }
    }

    /// Devuelve `false` si el artifact no admite la transición a `reverted`.
    /// `failed` se acepta: es una inversión previa que no llegó a aplicarse.
    pub fn mark_reverted(&mut self) -> bool {
        if !self.can_revert() {
            return false;
        }
        self.status = ArtifactStatus::Reverted;
        self.reverted_at = Some(Utc::now());
        self.error_message = None;
        true
    }

    /// Registra una inversión fallida sin tocar el estado previo.
    pub fn record_revert_error(&mut self, error: impl Into<String>) {
        self.error_message = Some(error.into());
    }

    /// Inversión fallida durante un rollback automático.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ArtifactStatus::Failed;
        self.error_message = Some(error.into());
    }

    pub fn mark_orphaned(&mut self) {
        if self.status == ArtifactStatus::Created {
            self.status = ArtifactStatus::Orphaned;
        }
    }

    pub fn can_revert(&self) -> bool {
        matches!(self.status, ArtifactStatus::Pending | ArtifactStatus::Created | ArtifactStatus::Failed)
        && self.reversibility != Reversibility::Irreversible
    }

    pub fn is_irreversible(&self) -> bool {
        self.status == ArtifactStatus::Irreversible || self.reversibility == Reversibility::Irreversible
    }
}
