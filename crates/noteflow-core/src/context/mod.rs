//! ExecutionContext: único canal sancionado para efectos laterales de un
//! step, y unidad de atomicidad del mismo.
//!
//! Cada operación aplica el efecto de inmediato y agrega un artifact
//! `pending` al buffer. `commit` lo persiste como `created`; `rollback`
//! invierte en orden inverso de creación todo lo que aún sea reversible.
pub mod api;
pub mod frontmatter;
pub(crate) mod inverse;

use std::path::Path;
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use api::{ApiCall, ApiReverter, ReverseAction};
use inverse::{AFTER_HASH_KEY, BEFORE_BLOCK_KEY, REVERSE_ACTION_KEY, SERVICE_KEY};

use crate::errors::ContextError;
use crate::hashing::hash_str;
use crate::model::{Artifact, ArtifactStatus, ArtifactType, Reversibility};
use crate::repo::ArtifactStore;

/// Resumen de un rollback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    pub reverted: usize,
    pub skipped_irreversible: usize,
    pub failed: Vec<(Uuid, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ExecutionContext {
    job_id: Uuid,
    step_name: String,
    artifacts: Vec<Artifact>,
    /// `artifacts[..persisted]` ya se escribieron en el store.
    persisted: usize,
    store: Arc<dyn ArtifactStore>,
    reverter: Option<Arc<dyn ApiReverter>>,
    user_input: Option<Value>,
    warnings: Vec<String>,
}

impl ExecutionContext {
    pub fn new(job_id: Uuid, step_name: impl Into<String>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { job_id,
               step_name: step_name.into(),
               artifacts: Vec::new(),
               persisted: 0,
               store,
               reverter: None,
               user_input: None,
               warnings: Vec::new() }
    }

    pub fn with_reverter(mut self, reverter: Option<Arc<dyn ApiReverter>>) -> Self {
        self.reverter = reverter;
        self
    }

    pub fn with_user_input(mut self, input: Option<Value>) -> Self {
        self.user_input = input;
        self
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Input entregado al reanudar un step pausado.
    pub fn user_input(&self) -> Option<&Value> {
        self.user_input.as_ref()
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn into_artifacts(self) -> Vec<Artifact> {
        self.artifacts
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn has_uncommitted(&self) -> bool {
        self.artifacts[self.persisted..].iter()
                                        .any(|a| a.status == ArtifactStatus::Pending)
    }

    fn push(&mut self, artifact: Artifact) -> Uuid {
        debug!("job {} step '{}': recorded {:?} on {}",
               self.job_id, self.step_name, artifact.artifact_type, artifact.target);
        let id = artifact.id;
        self.artifacts.push(artifact);
        id
    }

    fn artifact(&self, kind: ArtifactType, target: &str) -> Artifact {
        Artifact::new(self.job_id, self.step_name.clone(), kind, target)
    }

    /// Crea un archivo nuevo (y sus directorios). Falla si ya existe.
    pub async fn create_file(&mut self, path: impl AsRef<Path>, content: &str) -> Result<Uuid, ContextError> {
        let target = path_str(path.as_ref());
        if inverse::exists(&target).await {
            return Err(ContextError::AlreadyExists(target));
        }
        inverse::write(&target, content).await?;
        let art = self.artifact(ArtifactType::FileCreate, &target)
                      .with_states(None, Some(content.to_string()))
                      .with_meta(AFTER_HASH_KEY, Value::String(hash_str(content)));
        Ok(self.push(art))
    }

    /// Reescribe un archivo existente guardando el contenido previo.
    pub async fn modify_file(&mut self, path: impl AsRef<Path>, content: &str) -> Result<Uuid, ContextError> {
        let target = path_str(path.as_ref());
        if !inverse::exists(&target).await {
            return Err(ContextError::NotFound(target));
        }
        let before = inverse::read(&target).await?;
        inverse::write(&target, content).await?;
        let art = self.artifact(ArtifactType::FileModify, &target)
                      .with_states(Some(before), Some(content.to_string()))
                      .with_meta(AFTER_HASH_KEY, Value::String(hash_str(content)));
        Ok(self.push(art))
    }

    pub async fn delete_file(&mut self, path: impl AsRef<Path>) -> Result<Uuid, ContextError> {
        let target = path_str(path.as_ref());
        if !inverse::exists(&target).await {
            return Err(ContextError::NotFound(target));
        }
        let before = inverse::read(&target).await?;
        tokio::fs::remove_file(&target).await
                                       .map_err(|e| ContextError::io(&target, e))?;
        let art = self.artifact(ArtifactType::FileDelete, &target)
                      .with_states(Some(before), None);
        Ok(self.push(art))
    }

    /// Mueve `src` a `dest`; `before_state`/`after_state` guardan las rutas.
    pub async fn move_file(&mut self, src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<Uuid, ContextError> {
        let src = path_str(src.as_ref());
        let dest = path_str(dest.as_ref());
        if !inverse::exists(&src).await {
            return Err(ContextError::NotFound(src));
        }
        if inverse::exists(&dest).await {
            return Err(ContextError::DestinationExists(dest));
        }
        inverse::create_parent(&dest).await?;
        tokio::fs::rename(&src, &dest).await
                                      .map_err(|e| ContextError::io(&src, e))?;
        let art = self.artifact(ArtifactType::FileMove, &dest)
                      .with_states(Some(src), Some(dest.clone()));
        Ok(self.push(art))
    }

    /// Mezcla `updates` en el frontmatter YAML del archivo. Guarda los campos
    /// previos/nuevos como JSON y la cabecera original cruda.
    pub async fn update_frontmatter(&mut self, path: impl AsRef<Path>, updates: &Map<String, Value>) -> Result<Uuid, ContextError> {
        let target = path_str(path.as_ref());
        if !inverse::exists(&target).await {
            return Err(ContextError::NotFound(target));
        }
        let content = inverse::read(&target).await?;
        let (before, after, doc) =
            frontmatter::apply_updates(&content, updates).map_err(|reason| ContextError::Frontmatter { path: target.clone(),
                                                                                                        reason })?;
        let head = frontmatter::split(&content).head
                                               .map(|h| Value::String(h.to_string()))
                                               .unwrap_or(Value::Null);
        inverse::write(&target, &doc).await?;
        let art = self.artifact(ArtifactType::FrontmatterUpdate, &target)
                      .with_states(Some(Value::Object(before).to_string()), Some(Value::Object(after).to_string()))
                      .with_meta(BEFORE_BLOCK_KEY, head)
                      .with_meta(AFTER_HASH_KEY, Value::String(hash_str(&doc)));
        Ok(self.push(art))
    }

    /// Registra una llamada externa ya hecha. Sin acción inversa (o con
    /// `reversible = false`) el artifact queda `irreversible` desde ya.
    pub fn record_api_call(&mut self, call: ApiCall, reversible: bool, reverse: Option<ReverseAction>) -> Uuid {
        let kind = if call.previous.is_some() {
            ArtifactType::ExternalApiModify
        } else {
            ArtifactType::ExternalApiCreate
        };
        let mut art = self.artifact(kind, &call.target())
                          .with_states(call.previous.as_ref().map(Value::to_string), Some(call.response.to_string()))
                          .with_meta(SERVICE_KEY, Value::String(call.service.clone()))
                          .with_meta("action", Value::String(call.action.clone()))
                          .with_meta("request", call.request.clone());
        match (reversible, reverse) {
            (true, Some(rev)) => {
                art.reversibility = Reversibility::PartiallyReversible;
                art.metadata
                   .insert(REVERSE_ACTION_KEY.to_string(), serde_json::to_value(&rev).unwrap_or(Value::Null));
            }
            (true, None) => art.mark_irreversible("declared reversible without a reverse action"),
            (false, _) => art.mark_irreversible("external action declared irreversible"),
        }
        self.push(art)
    }

    /// Artifact sólo de metadata (sin efecto físico que invertir).
    pub fn record_metadata(&mut self, key: &str, before: Option<Value>, after: Option<Value>) -> Uuid {
        let art = self.artifact(ArtifactType::Metadata, key)
                      .with_states(before.map(|v| v.to_string()), after.map(|v| v.to_string()));
        self.push(art)
    }

    /// `pending -> created` y persistencia. Idempotente: una segunda llamada
    /// sin operaciones nuevas no escribe nada y devuelve la misma lista.
    pub async fn commit(&mut self) -> Result<Vec<Artifact>, ContextError> {
        for art in &self.artifacts[self.persisted..] {
            let mut staged = art.clone();
            staged.mark_created();
            self.store.save_artifact(&staged).await?;
        }
        for art in &mut self.artifacts[self.persisted..] {
            art.mark_created();
        }
        if self.persisted < self.artifacts.len() {
            debug!("job {} step '{}': committed {} artifact(s)",
                   self.job_id,
                   self.step_name,
                   self.artifacts.len() - self.persisted);
        }
        self.persisted = self.artifacts.len();
        Ok(self.artifacts.clone())
    }

    /// Invierte, en orden inverso de creación, todos los artifacts del
    /// contexto que sigan siendo reversibles (incluye los ya confirmados).
    pub async fn rollback(&mut self) -> RollbackReport {
        self.rollback_from(0).await
    }

    /// Como `rollback`, pero sólo sobre lo aún no confirmado.
    pub async fn rollback_uncommitted(&mut self) -> RollbackReport {
        let from = self.persisted;
        self.rollback_from(from).await
    }

    async fn rollback_from(&mut self, from: usize) -> RollbackReport {
        let mut report = RollbackReport::default();
        let reverter = self.reverter.clone();
        for idx in (from..self.artifacts.len()).rev() {
            let art = &mut self.artifacts[idx];
            if art.is_irreversible() {
                let msg = format!("skipping irreversible artifact {} ({})", art.id, art.target);
                warn!("job {} step '{}': {msg}", self.job_id, self.step_name);
                self.warnings.push(msg);
                report.skipped_irreversible += 1;
                continue;
            }
            if !art.can_revert() {
                continue;
            }
            match inverse::apply(art, reverter.as_deref()).await {
                Ok(()) => {
                    art.mark_reverted();
                    report.reverted += 1;
                }
                Err(e) => {
                    error!("job {} step '{}': rollback of {} failed: {e}", self.job_id, self.step_name, art.target);
                    art.mark_failed(e.to_string());
                    report.failed.push((art.id, e.to_string()));
                }
            }
        }
        for art in &self.artifacts[from..] {
            if let Err(e) = self.store.save_artifact(art).await {
                warn!("job {}: could not persist rolled back artifact {}: {e}", self.job_id, art.id);
            }
        }
        self.persisted = self.persisted.max(self.artifacts.len());
        report
    }

    /// Aplica la inversa de un artifact ya confirmado (modo revert).
    /// `Ok(false)` si se omitió por estar revertido o ser irreversible.
    pub async fn revert_artifact(&self, artifact: &mut Artifact) -> Result<bool, ContextError> {
        if !artifact.can_revert() {
            return Ok(false);
        }
        inverse::apply(artifact, self.reverter.as_deref()).await?;
        artifact.mark_reverted();
        self.store.save_artifact(artifact).await?;
        Ok(true)
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::InMemoryArtifactStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn ctx() -> (ExecutionContext, Arc<InMemoryArtifactStore>) {
        let store = Arc::new(InMemoryArtifactStore::new());
        (ExecutionContext::new(Uuid::new_v4(), "step", store.clone()), store)
    }

    #[tokio::test]
    async fn rollback_restores_files_in_reverse_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("out/a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&b, "original b").unwrap();
        let (mut ctx, _) = ctx();
        ctx.create_file(&a, "hello").await.unwrap();
        ctx.modify_file(&a, "hello [x]").await.unwrap();
        ctx.delete_file(&b).await.unwrap();
        assert!(!b.exists());

        let report = ctx.rollback().await;
        assert!(report.is_clean());
        assert_eq!(report.reverted, 3);
        assert!(!a.exists());
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "original b");
        assert!(ctx.artifacts()
                   .iter()
                   .all(|x| x.status == ArtifactStatus::Reverted));
    }

    #[tokio::test]
    async fn create_refuses_existing_and_modify_refuses_missing() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.md");
        std::fs::write(&p, "x").unwrap();
        let (mut ctx, _) = ctx();
        assert!(matches!(ctx.create_file(&p, "y").await, Err(ContextError::AlreadyExists(_))));
        assert!(matches!(ctx.modify_file(dir.path().join("nope"), "y").await, Err(ContextError::NotFound(_))));
        assert!(ctx.artifacts().is_empty());
    }

    #[tokio::test]
    async fn commit_is_idempotent_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, store) = ctx();
        ctx.create_file(dir.path().join("a.txt"), "a").await.unwrap();
        let first = ctx.commit().await.unwrap();
        let second = ctx.commit().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].status, ArtifactStatus::Created);
        let stored = store.load_artifacts(ctx.job_id()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ArtifactStatus::Created);
    }

    #[tokio::test]
    async fn rollback_uncommitted_keeps_committed_work() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.txt");
        let dropped = dir.path().join("dropped.txt");
        let (mut ctx, _) = ctx();
        ctx.create_file(&kept, "k").await.unwrap();
        ctx.commit().await.unwrap();
        ctx.create_file(&dropped, "d").await.unwrap();
        let report = ctx.rollback_uncommitted().await;
        assert_eq!(report.reverted, 1);
        assert!(kept.exists());
        assert!(!dropped.exists());
        assert_eq!(ctx.artifacts()[0].status, ArtifactStatus::Created);
    }

    #[tokio::test]
    async fn move_and_frontmatter_are_reverted_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("inbox/note.md");
        let dest = dir.path().join("archive/note.md");
        let original = "---\ntitle:   Hola  \n---\n# Nota\n";
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, original).unwrap();
        let (mut ctx, _) = ctx();
        ctx.move_file(&src, &dest).await.unwrap();
        let mut up = Map::new();
        up.insert("status".into(), json!("done"));
        ctx.update_frontmatter(&dest, &up).await.unwrap();
        let moved = std::fs::read_to_string(&dest).unwrap();
        assert!(moved.contains("status: done"));
        let fm = &ctx.artifacts()[1];
        assert_eq!(fm.before_state.as_deref(), Some(r#"{"title":"Hola"}"#));

        let report = ctx.rollback().await;
        assert!(report.is_clean());
        assert!(!dest.exists());
        assert_eq!(std::fs::read_to_string(&src).unwrap(), original);
    }

    #[tokio::test]
    async fn irreversible_api_call_is_skipped_with_warning() {
        let (mut ctx, _) = ctx();
        ctx.record_api_call(ApiCall::new("mail", "send", json!({"to": "a@b"}), json!({"id": 1})), false, None);
        ctx.record_api_call(ApiCall::new("crm", "create", json!({}), json!({"id": 2})), true, None);
        let report = ctx.rollback().await;
        assert_eq!(report.skipped_irreversible, 2);
        assert_eq!(ctx.warnings().len(), 2);
        assert!(ctx.artifacts()
                   .iter()
                   .all(|a| a.status == ArtifactStatus::Irreversible));
        assert_eq!(ctx.artifacts()[0].target, "mail:send");
    }

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl ApiReverter for Recorder {
        async fn invoke(&self, service: &str, reverse: &ReverseAction) -> Result<(), String> {
            self.0.lock().unwrap().push(format!("{service}:{}", reverse.action));
            Ok(())
        }
    }

    #[tokio::test]
    async fn reversible_api_call_invokes_reverse_action() {
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let (ctx, _) = ctx();
        let mut ctx = ctx.with_reverter(Some(rec.clone() as Arc<dyn ApiReverter>));
        ctx.record_api_call(ApiCall::new("crm", "create_contact", json!({}), json!({"id": 7})),
                            true,
                            Some(ReverseAction::new("delete_contact", json!({"id": 7}))));
        let report = ctx.rollback().await;
        assert_eq!(report.reverted, 1);
        assert_eq!(*rec.0.lock().unwrap(), vec!["crm:delete_contact".to_string()]);
    }

    #[tokio::test]
    async fn reverse_action_without_reverter_fails_and_is_not_marked_reverted() {
        let (mut ctx, _) = ctx();
        ctx.record_api_call(ApiCall::new("crm", "create", json!({}), json!({})),
                            true,
                            Some(ReverseAction::new("delete", json!(null))));
        let report = ctx.rollback().await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(ctx.artifacts()[0].status, ArtifactStatus::Failed);
        assert!(ctx.artifacts()[0].error_message.is_some());
    }
}
