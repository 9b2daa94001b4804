//! Backends in-memory de `JobStore` / `ArtifactStore`.
//!
//! Útiles para tests y para ejecuciones efímeras. El upsert del job completo
//! ocurre bajo el write-lock, por lo que los lectores nunca observan un
//! historial a medio escribir.
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{ArtifactStore, JobFilter, JobStore};
use crate::errors::StoreError;
use crate::model::{Artifact, ArtifactStatus, Job};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let guard = self.jobs.read().await;
        Ok(filter.apply(guard.values().cloned()))
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryArtifactStore {
    by_job: RwLock<HashMap<Uuid, Vec<Artifact>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let mut guard = self.by_job.write().await;
        let list = guard.entry(artifact.job_id).or_default();
        match list.iter_mut().find(|a| a.id == artifact.id) {
            Some(existing) => *existing = artifact.clone(),
            None => list.push(artifact.clone()),
        }
        Ok(())
    }

    async fn load_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        Ok(self.by_job
               .read()
               .await
               .get(&job_id)
               .cloned()
               .unwrap_or_default())
    }

    async fn delete_artifacts(&self, job_id: Uuid) -> Result<usize, StoreError> {
        Ok(self.by_job
               .write()
               .await
               .remove(&job_id)
               .map(|l| l.len())
               .unwrap_or(0))
    }

    async fn mark_orphaned(&self, job_id: Uuid) -> Result<usize, StoreError> {
        let mut guard = self.by_job.write().await;
        let Some(list) = guard.get_mut(&job_id) else {
            return Ok(0);
        };
        let mut changed = 0;
        for a in list.iter_mut().filter(|a| a.status == ArtifactStatus::Created) {
            a.mark_orphaned();
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactType, JobSource, JobStatus};
    use crate::repo::JobOrder;

    #[tokio::test]
    async fn schedule_order_is_priority_then_fifo() {
        let store = InMemoryJobStore::new();
        let low = Job::new(JobSource::new("text", "low"));
        let mut high = Job::new(JobSource::new("text", "high")).with_priority(5);
        high.created_at = low.created_at + chrono::Duration::seconds(1);
        let mut low2 = Job::new(JobSource::new("text", "low2"));
        low2.created_at = low.created_at + chrono::Duration::seconds(2);
        for j in [&low2, &high, &low] {
            store.save_job(j).await.unwrap();
        }
        let got = store.list_jobs(&JobFilter::schedulable(10)).await.unwrap();
        let names: Vec<_> = got.iter().map(|j| j.source.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low", "low2"]);

        let newest = store.list_jobs(&JobFilter { limit: Some(1),
                                                  order: JobOrder::Newest,
                                                  ..JobFilter::default() })
                          .await
                          .unwrap();
        assert_eq!(newest[0].source.name, "low2");
    }

    #[tokio::test]
    async fn filter_by_status_tag_and_offset() {
        let store = InMemoryJobStore::new();
        let a = Job::new(JobSource::new("text", "a")).with_tag("inbox");
        let mut b = Job::new(JobSource::new("text", "b"));
        b.start_processing("x").unwrap();
        store.save_job(&a).await.unwrap();
        store.save_job(&b).await.unwrap();
        let pending = store.list_jobs(&JobFilter::with_status(JobStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        let tagged = store.list_jobs(&JobFilter { tag: Some("inbox".into()),
                                                  ..JobFilter::default() })
                          .await
                          .unwrap();
        assert_eq!(tagged[0].id, a.id);
        let skipped = store.list_jobs(&JobFilter { offset: 2,
                                                   ..JobFilter::default() })
                           .await
                           .unwrap();
        assert!(skipped.is_empty());
        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts[&JobStatus::Pending], 1);
        assert_eq!(counts[&JobStatus::Processing], 1);
        assert_eq!(counts[&JobStatus::Completed], 0);
        assert!(store.delete_job(a.id).await.unwrap());
        assert!(!store.delete_job(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn artifacts_upsert_keeps_order_and_orphans_created() {
        let store = InMemoryArtifactStore::new();
        let job_id = Uuid::new_v4();
        let mut first = Artifact::new(job_id, "s", ArtifactType::FileCreate, "/a");
        let second = Artifact::new(job_id, "s", ArtifactType::FileModify, "/a");
        store.save_artifact(&first).await.unwrap();
        store.save_artifact(&second).await.unwrap();
        first.mark_created();
        store.save_artifact(&first).await.unwrap();
        let loaded = store.load_artifacts(job_id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[0].status, ArtifactStatus::Created);
        assert_eq!(store.mark_orphaned(job_id).await.unwrap(), 1);
        assert_eq!(store.load_artifacts(job_id).await.unwrap()[0].status, ArtifactStatus::Orphaned);
        assert_eq!(store.delete_artifacts(job_id).await.unwrap(), 2);
        assert!(store.load_artifacts(job_id).await.unwrap().is_empty());
    }
}
