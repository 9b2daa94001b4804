use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use noteflow_core::{Job, JobFilter, JobStore, StoreError};
use uuid::Uuid;

use super::{doc_path, read_doc, remove_doc, write_atomic};
use crate::config::StoreConfig;
use crate::error::PersistenceError;

/// `JobStore` con un archivo JSON por job.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(cfg: &StoreConfig) -> Self {
        Self::new(cfg.jobs_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn load_all(&self) -> Result<Vec<Job>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.dir, e)),
        };
        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry()
                                       .await
                                       .map_err(|e| PersistenceError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_doc::<Job>(&path).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                // un documento dañado no tumba el listado completo
                Err(e) => warn!("skipping unreadable job document: {e}"),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(read_doc(&doc_path(&self.dir, id)).await?)
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        write_atomic(&doc_path(&self.dir, job.id), job).await?;
        debug!("job {} saved ({})", job.id, job.status);
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        Ok(filter.apply(self.load_all().await?))
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(remove_doc(&doc_path(&self.dir, id)).await?)
    }
}
