use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use noteflow_core::{Artifact, ArtifactStatus, ArtifactStore, StoreError};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{doc_path, read_doc, remove_doc, write_atomic};
use crate::config::StoreConfig;

/// `ArtifactStore` con un archivo JSON por job. Las escrituras son
/// leer-modificar-escribir, serializadas con un mutex por job.
#[derive(Debug)]
pub struct FileArtifactStore {
    dir: PathBuf,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl FileArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(),
               locks: DashMap::new() }
    }

    fn job_lock(&self, job_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(job_id).or_default().clone()
    }

    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self::new(cfg.artifacts_dir())
    }

    async fn read_list(&self, job_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        Ok(read_doc(&doc_path(&self.dir, job_id)).await?
                                                 .unwrap_or_default())
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let lock = self.job_lock(artifact.job_id);
        let _held = lock.lock().await;
        let mut list = self.read_list(artifact.job_id).await?;
        match list.iter_mut().find(|a| a.id == artifact.id) {
            Some(existing) => *existing = artifact.clone(),
            None => list.push(artifact.clone()),
        }
        write_atomic(&doc_path(&self.dir, artifact.job_id), &list).await?;
        Ok(())
    }

    async fn load_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        self.read_list(job_id).await
    }

    async fn delete_artifacts(&self, job_id: Uuid) -> Result<usize, StoreError> {
        let lock = self.job_lock(job_id);
        let held = lock.lock().await;
        let n = self.read_list(job_id).await?.len();
        remove_doc(&doc_path(&self.dir, job_id)).await?;
        drop(held);
        drop(lock);
        self.locks.remove_if(&job_id, |_, l| Arc::strong_count(l) == 1);
        Ok(n)
    }

    async fn mark_orphaned(&self, job_id: Uuid) -> Result<usize, StoreError> {
        let lock = self.job_lock(job_id);
        let _held = lock.lock().await;
        let mut list = self.read_list(job_id).await?;
        let mut changed = 0;
        for a in list.iter_mut().filter(|a| a.status == ArtifactStatus::Created) {
            a.mark_orphaned();
            changed += 1;
        }
        if changed > 0 {
            write_atomic(&doc_path(&self.dir, job_id), &list).await?;
        }
        Ok(changed)
    }
}
