//! Inversas por tipo de artifact, compartidas por rollback y revert.
use std::path::Path;

use log::warn;
use serde_json::Value;

use super::api::{ApiReverter, ReverseAction};
use super::frontmatter;
use crate::errors::ContextError;
use crate::hashing::hash_str;
use crate::model::{Artifact, ArtifactType};

pub(crate) const AFTER_HASH_KEY: &str = "after_hash";
pub(crate) const BEFORE_BLOCK_KEY: &str = "before_block";
pub(crate) const REVERSE_ACTION_KEY: &str = "reverse_action";
pub(crate) const SERVICE_KEY: &str = "service";

/// Aplica la inversa del artifact sobre el entorno. No cambia su estado.
pub(crate) async fn apply(artifact: &Artifact, reverter: Option<&dyn ApiReverter>) -> Result<(), ContextError> {
    let target = artifact.target.as_str();
    match artifact.artifact_type {
        ArtifactType::FileCreate => {
            ensure_exists(target).await?;
            warn_on_drift(artifact).await;
            tokio::fs::remove_file(target).await
                                          .map_err(|e| ContextError::io(target, e))
        }
        ArtifactType::FileModify => {
            let before = snapshot(artifact)?;
            ensure_exists(target).await?;
            warn_on_drift(artifact).await;
            write(target, before).await
        }
        ArtifactType::FileDelete => {
            let before = snapshot(artifact)?;
            if exists(target).await {
                return Err(ContextError::AlreadyExists(target.to_string()));
            }
            write(target, before).await
        }
        ArtifactType::FileMove => {
            let src = artifact.before_state
                              .as_deref()
                              .ok_or_else(|| ContextError::MissingSnapshot(artifact.id.to_string()))?;
            let dest = artifact.after_state.as_deref().unwrap_or(target);
            ensure_exists(dest).await?;
            if exists(src).await {
                return Err(ContextError::DestinationExists(src.to_string()));
            }
            create_parent(src).await?;
            tokio::fs::rename(dest, src).await
                                        .map_err(|e| ContextError::io(dest, e))
        }
        ArtifactType::FrontmatterUpdate => {
            ensure_exists(target).await?;
            let current = read(target).await?;
            let head = match artifact.metadata.get(BEFORE_BLOCK_KEY) {
                Some(Value::String(h)) => h.as_str(),
                _ => "",
            };
            let restored = format!("{head}{}", frontmatter::split(&current).body);
            write(target, &restored).await
        }
        ArtifactType::ExternalApiCreate | ArtifactType::ExternalApiModify => {
            let reverse: ReverseAction = artifact.metadata
                                                 .get(REVERSE_ACTION_KEY)
                                                 .and_then(|v| serde_json::from_value(v.clone()).ok())
                                                 .ok_or_else(|| ContextError::MissingReverseAction(target.to_string()))?;
            let reverter = reverter.ok_or_else(|| ContextError::NoReverter(target.to_string()))?;
            let service = artifact.metadata
                                  .get(SERVICE_KEY)
                                  .and_then(Value::as_str)
                                  .unwrap_or_else(|| target.split(':').next().unwrap_or(target));
            reverter.invoke(service, &reverse)
                    .await
                    .map_err(|reason| ContextError::ReverseActionFailed { target: target.to_string(),
                                                                          reason })
        }
        ArtifactType::Metadata => Ok(()),
    }
}

fn snapshot(artifact: &Artifact) -> Result<&str, ContextError> {
    artifact.before_state
            .as_deref()
            .ok_or_else(|| ContextError::MissingSnapshot(artifact.id.to_string()))
}

pub(crate) async fn exists(path: &str) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn ensure_exists(path: &str) -> Result<(), ContextError> {
    if exists(path).await {
        Ok(())
    } else {
        Err(ContextError::NotFound(path.to_string()))
    }
}

pub(crate) async fn read(path: &str) -> Result<String, ContextError> {
    tokio::fs::read_to_string(path).await
                                   .map_err(|e| ContextError::io(path, e))
}

pub(crate) async fn create_parent(path: &str) -> Result<(), ContextError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await
                                             .map_err(|e| ContextError::io(parent.to_string_lossy(), e))?;
        }
    }
    Ok(())
}

pub(crate) async fn write(path: &str, content: &str) -> Result<(), ContextError> {
    create_parent(path).await?;
    tokio::fs::write(path, content).await
                                   .map_err(|e| ContextError::io(path, e))
}

/// El archivo cambió desde que el step lo escribió: se restaura igual, pero
/// queda en el log.
async fn warn_on_drift(artifact: &Artifact) {
    let Some(Value::String(expected)) = artifact.metadata.get(AFTER_HASH_KEY) else {
        return;
    };
    if let Ok(current) = tokio::fs::read_to_string(&artifact.target).await {
        if &hash_str(&current) != expected {
            warn!("artifact {} target {} changed since step '{}' ran; restoring anyway",
                  artifact.id, artifact.target, artifact.step_name);
        }
    }
}
