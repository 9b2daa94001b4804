//! Stores sobre el sistema de archivos.
//!
//! Layout bajo `data_dir`:
//! - `jobs/<job_id>.json`: el job completo (con historial).
//! - `artifacts/<job_id>.json`: lista de artifacts del job.
//!
//! Toda escritura es atómica: archivo temporal en el mismo directorio y
//! `rename` encima del destino.

mod artifacts;
mod jobs;

pub use artifacts::FileArtifactStore;
pub use jobs::FileJobStore;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PersistenceError;

pub(crate) fn doc_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("{id}.json"))
}

pub(crate) async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await
                                      .map_err(|e| PersistenceError::io(dir, e))?;
    }
    let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, &bytes).await
                                  .map_err(|e| PersistenceError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(PersistenceError::io(path, e));
    }
    Ok(())
}

/// `None` si el documento no existe.
pub(crate) async fn read_doc<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };
    serde_json::from_slice(&bytes).map(Some)
                                  .map_err(|source| PersistenceError::Corrupt { path: path.display().to_string(),
                                                                               source })
}

/// `true` si existía.
pub(crate) async fn remove_doc(path: &Path) -> Result<bool, PersistenceError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}
