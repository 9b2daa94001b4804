//! Contratos de almacenamiento consumidos por el motor.
//!
//! `JobStore::save_job` debe ser un upsert atómico del job completo (con su
//! historial): un lector nunca ve una escritura parcial.
use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::model::{Artifact, Job, JobStatus};

/// Orden de listado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobOrder {
    /// Más recientes primero (consultas de la API).
    #[default]
    Newest,
    /// Orden de planificación: prioridad DESC, luego `created_at` ASC.
    Schedule,
}

/// Filtro de `list_jobs`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub order: JobOrder,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self { status: Some(status),
               ..Self::default() }
    }

    /// Jobs `pending` en orden de planificación.
    pub fn schedulable(limit: usize) -> Self {
        Self { status: Some(JobStatus::Pending),
               limit: Some(limit),
               order: JobOrder::Schedule,
               ..Self::default() }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
        && self.tag.as_ref().map_or(true, |t| job.tags.contains(t))
    }

    /// Aplica filtro, orden y paginación sobre un conjunto ya cargado. Lo
    /// comparten los backends que no pueden delegar la consulta.
    pub fn apply(&self, jobs: impl IntoIterator<Item = Job>) -> Vec<Job> {
        let mut out: Vec<Job> = jobs.into_iter().filter(|j| self.matches(j)).collect();
        match self.order {
            JobOrder::Newest => out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id))),
            JobOrder::Schedule => out.sort_by(|a, b| {
                                         b.priority
                                          .cmp(&a.priority)
                                          .then(a.created_at.cmp(&b.created_at))
                                          .then(a.id.cmp(&b.id))
                                     }),
        }
        let iter = out.into_iter().skip(self.offset);
        match self.limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;
    /// Upsert atómico del job completo.
    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;
    /// Devuelve `true` si el job existía.
    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn count_by_status(&self) -> Result<BTreeMap<JobStatus, usize>, StoreError> {
        let mut counts: BTreeMap<JobStatus, usize> = JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for job in self.list_jobs(&JobFilter::default()).await? {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upsert por `artifact.id`, preservando el orden de inserción por job.
    async fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError>;
    async fn load_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, StoreError>;
    async fn delete_artifacts(&self, job_id: Uuid) -> Result<usize, StoreError>;
    /// Marca como `orphaned` los artifacts `created` de un job que se elimina
    /// sin revert. Devuelve cuántos cambiaron.
    async fn mark_orphaned(&self, job_id: Uuid) -> Result<usize, StoreError>;
}
