//! Pipeline: orquesta muchos jobs en paralelo bajo un techo de concurrencia.
//!
//! - Un job ocupa un slot (permiso del semáforo) durante toda su corrida,
//!   no por step; lo libera al pausarse, completar, fallar o cancelarse.
//! - Toda mutación de un job se serializa con un lock por `job_id`.
//! - La cancelación de un job en curso es cooperativa: se revisa entre steps.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::executor::{Executor, RevertReport, StepOutcome};
use super::router::{Route, Router};
use crate::config::PipelineConfig;
use crate::constants::ENGINE_VERSION;
use crate::context::ApiReverter;
use crate::errors::EngineError;
use crate::event::{EventBus, PipelineEvent, PipelineEventKind};
use crate::model::{Job, JobStatus};
use crate::processor::{ProcessorInfo, ProcessorRegistry};
use crate::repo::{ArtifactStore, InMemoryArtifactStore, InMemoryJobStore, JobFilter, JobStore};

/// Snapshot de estadísticas para la API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub active_jobs: usize,
    pub max_concurrent: usize,
    pub jobs_by_status: BTreeMap<JobStatus, usize>,
    pub processors_loaded: usize,
    pub running: bool,
    pub engine_version: &'static str,
}

/// Builder del pipeline. Sin stores explícitos usa los in-memory.
pub struct PipelineBuilder {
    registry: ProcessorRegistry,
    job_store: Option<Arc<dyn JobStore>>,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
    reverter: Option<Arc<dyn ApiReverter>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    pub fn reverter(mut self, reverter: Arc<dyn ApiReverter>) -> Self {
        self.reverter = Some(reverter);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Pipeline {
        let registry = Arc::new(self.registry);
        let job_store = self.job_store
                            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));
        let artifact_store = self.artifact_store
                                 .unwrap_or_else(|| Arc::new(InMemoryArtifactStore::new()));
        let events = Arc::new(EventBus::new(self.config.event_capacity));
        let max = self.config.max_concurrent.max(1);
        let executor = Executor::new(registry.clone(), job_store.clone(), artifact_store.clone(), events.clone())
            .with_reverter(self.reverter)
            .with_step_timeout(self.config.step_timeout);
        let inner = Inner { router: Router::new(registry.clone()),
                            registry,
                            executor,
                            job_store,
                            artifact_store,
                            events,
                            slots: Arc::new(Semaphore::new(max)),
                            active: DashMap::new(),
                            locks: DashMap::new(),
                            cancel_requested: DashMap::new(),
                            idle: Notify::new(),
                            worker: StdMutex::new(None),
                            config: self.config };
        Pipeline { inner: Arc::new(inner) }
    }
}

struct Inner {
    registry: Arc<ProcessorRegistry>,
    router: Router,
    executor: Executor,
    job_store: Arc<dyn JobStore>,
    artifact_store: Arc<dyn ArtifactStore>,
    events: Arc<EventBus>,
    config: PipelineConfig,
    slots: Arc<Semaphore>,
    active: DashMap<Uuid, ()>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    cancel_requested: DashMap<Uuid, ()>,
    idle: Notify,
    worker: StdMutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

/// Slot ocupado por un job en curso. Al soltarse libera el permiso y saca
/// el job del conjunto activo.
struct ActiveGuard {
    inner: Arc<Inner>,
    job_id: Uuid,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.active.remove(&self.job_id);
        self.inner.idle.notify_waiters();
    }
}

enum Start {
    Fresh,
    Resume(Value),
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn builder(registry: ProcessorRegistry) -> PipelineBuilder {
        PipelineBuilder { registry,
                          job_store: None,
                          artifact_store: None,
                          reverter: None,
                          config: PipelineConfig::default() }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.inner.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub fn processors(&self) -> Vec<ProcessorInfo> {
        self.inner.registry.describe()
    }

    // ---- consultas ----

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, EngineError> {
        Ok(self.inner.job_store.load_job(id).await?)
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, EngineError> {
        Ok(self.inner.job_store.list_jobs(filter).await?)
    }

    pub async fn stats(&self) -> Result<PipelineStats, EngineError> {
        Ok(PipelineStats { active_jobs: self.inner.active.len(),
                           max_concurrent: self.inner.config.max_concurrent,
                           jobs_by_status: self.inner.job_store.count_by_status().await?,
                           processors_loaded: self.inner.registry.len(),
                           running: self.is_running(),
                           engine_version: ENGINE_VERSION })
    }

    /// Jobs con un lock registrado: en curso o con una operación esperando.
    pub fn locked_jobs(&self) -> usize {
        self.inner.locks.len()
    }

    pub fn active_jobs(&self) -> usize {
        self.inner.active.len()
    }

    // ---- comandos ----

    pub async fn create_job(&self, mut job: Job) -> Result<Job, EngineError> {
        if job.status != JobStatus::Pending {
            return Err(EngineError::InvalidTransition { from: job.status,
                                                        to: JobStatus::Pending });
        }
        job.touch();
        self.inner.job_store.save_job(&job).await?;
        info!("job {} created ({}:{})", job.id, job.source.source_type, job.source.name);
        self.inner.events.emit(job.id,
                               PipelineEventKind::JobCreated { source_type: job.source.source_type.clone(),
                                                               source_name: job.source.name.clone() });
        Ok(job)
    }

    /// Procesa el job ya mismo (esperando un slot libre si hace falta) hasta
    /// que pause, complete, falle o se cancele.
    pub async fn process_job(&self, id: Uuid) -> Result<Job, EngineError> {
        let job = self.load(id).await?;
        if job.status != JobStatus::Pending {
            return Err(EngineError::InvalidTransition { from: job.status,
                                                        to: JobStatus::Processing });
        }
        let permit = self.acquire_slot().await?;
        let guard = self.claim(id, permit)?;
        self.drive(guard, Start::Fresh).await
    }

    /// Reanuda un job pausado con el input del usuario.
    pub async fn resume_job(&self, id: Uuid, input: Value) -> Result<Job, EngineError> {
        let job = self.load(id).await?;
        if job.status != JobStatus::AwaitingInput {
            return Err(EngineError::NotAwaitingInput(id));
        }
        let permit = self.acquire_slot().await?;
        let guard = self.claim(id, permit)?;
        self.drive(guard, Start::Resume(input)).await
    }

    /// Cancela un job. Si está corriendo se marca y el worker lo cancela al
    /// terminar el step actual; si no, se cancela de inmediato.
    pub async fn cancel_job(&self, id: Uuid) -> Result<Job, EngineError> {
        let mut consumed = false;
        if self.inner.active.contains_key(&id) {
            self.inner.cancel_requested.insert(id, ());
            // el worker pudo haber terminado entre ambas comprobaciones
            if self.inner.active.contains_key(&id) {
                info!("job {id}: cancellation requested");
                return self.load(id).await;
            }
            consumed = self.inner.cancel_requested.remove(&id).is_none();
        }
        let lock = self.job_lock(id);
        let held = lock.lock().await;
        let cancelled = self.cancel_locked(id, consumed).await;
        drop(held);
        self.release_lock(id, lock);
        cancelled
    }

    async fn cancel_locked(&self, id: Uuid, consumed: bool) -> Result<Job, EngineError> {
        let mut job = self.load(id).await?;
        // el worker ya tomó la marca y canceló
        if consumed && job.status == JobStatus::Cancelled {
            return Ok(job);
        }
        job.cancel()?;
        self.persist(&mut job).await?;
        info!("job {id} cancelled");
        self.inner.events.emit(id, PipelineEventKind::JobCancelled);
        Ok(job)
    }

    /// Revierte el job hasta `to_step` (todo si es `None`).
    pub async fn revert_job(&self, id: Uuid, to_step: Option<&str>) -> Result<(Job, RevertReport), EngineError> {
        if self.inner.active.contains_key(&id) {
            return Err(EngineError::JobBusy(id));
        }
        let lock = self.job_lock(id);
        let held = lock.lock().await;
        let reverted = self.revert_locked(id, to_step).await;
        drop(held);
        self.release_lock(id, lock);
        reverted
    }

    async fn revert_locked(&self, id: Uuid, to_step: Option<&str>) -> Result<(Job, RevertReport), EngineError> {
        let mut job = self.load(id).await?;
        let report = self.inner.executor.revert(&mut job, to_step).await?;
        self.inner.events.emit(id,
                               PipelineEventKind::JobReverted { to_step: to_step.map(str::to_string),
                                                                status: job.status });
        Ok((job, report))
    }

    /// Elimina el job. Con `revert_first` sólo se borra si el revert queda
    /// limpio; sin él, los artifacts creados quedan `orphaned`.
    pub async fn delete_job(&self, id: Uuid, revert_first: bool) -> Result<bool, EngineError> {
        if self.inner.active.contains_key(&id) {
            return Err(EngineError::JobBusy(id));
        }
        let lock = self.job_lock(id);
        let held = lock.lock().await;
        let deleted = self.delete_locked(id, revert_first).await;
        drop(held);
        self.release_lock(id, lock);
        deleted
    }

    async fn delete_locked(&self, id: Uuid, revert_first: bool) -> Result<bool, EngineError> {
        let Some(mut job) = self.inner.job_store.load_job(id).await? else {
            return Ok(false);
        };
        if revert_first {
            if job.status == JobStatus::AwaitingInput {
                job.cancel()?;
            }
            let report = self.inner.executor.revert(&mut job, None).await?;
            if !report.is_clean() {
                return Err(EngineError::RevertFailed { job_id: id,
                                                       reason: report.errors.join("; ") });
            }
            self.inner.artifact_store.delete_artifacts(id).await?;
        } else {
            let n = self.inner.artifact_store.mark_orphaned(id).await?;
            if n > 0 {
                warn!("job {id} deleted without revert: {n} artifact(s) orphaned");
            }
        }
        let existed = self.inner.job_store.delete_job(id).await?;
        info!("job {id} deleted");
        Ok(existed)
    }

    // ---- planificación ----

    /// Una pasada del planificador: toma jobs `pending` (prioridad DESC,
    /// FIFO) hasta llenar los slots libres y los lanza en tareas propias.
    /// Devuelve cuántos lanzó.
    pub async fn run_pending_once(&self) -> Result<usize, EngineError> {
        let free = self.inner.slots.available_permits();
        if free == 0 {
            return Ok(0);
        }
        let candidates = self.inner
                             .job_store
                             .list_jobs(&JobFilter::schedulable(free + self.inner.active.len()))
                             .await?;
        let mut launched = 0;
        for job in candidates {
            if self.inner.active.contains_key(&job.id) {
                continue;
            }
            let Ok(permit) = self.inner.slots.clone().try_acquire_owned() else {
                break;
            };
            let guard = match self.claim(job.id, permit) {
                Ok(g) => g,
                Err(_) => continue,
            };
            let this = self.clone();
            let job_id = job.id;
            debug!("scheduling job {job_id} (priority {})", job.priority);
            tokio::spawn(async move {
                if let Err(e) = this.drive(guard, Start::Fresh).await {
                    error!("job {job_id}: worker error: {e}");
                }
            });
            launched += 1;
        }
        Ok(launched)
    }

    /// Arranca el worker de fondo que llama a `run_pending_once` cada
    /// `poll_interval`. Idempotente.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        let this = self.clone();
        let interval = self.inner.config.poll_interval;
        let handle = tokio::spawn(async move {
            info!("pipeline worker started (max_concurrent={})", this.inner.config.max_concurrent);
            loop {
                if let Err(e) = this.run_pending_once().await {
                    error!("scheduler pass failed: {e}");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("pipeline worker stopped");
        });
        *worker = Some((tx, handle));
    }

    /// Detiene el worker de fondo. Los jobs en curso terminan su corrida.
    pub async fn stop(&self) {
        let taken = self.inner
                        .worker
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .take();
        if let Some((tx, handle)) = taken {
            let _ = tx.send(true);
            if let Err(e) = handle.await {
                warn!("pipeline worker ended abnormally: {e}");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Espera a que no quede ningún job ocupando slot.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.active.is_empty() {
                return;
            }
            notified.await;
        }
    }

    // ---- internos ----

    async fn load(&self, id: Uuid) -> Result<Job, EngineError> {
        self.inner
            .job_store
            .load_job(id)
            .await?
            .ok_or(EngineError::JobNotFound(id))
    }

    async fn persist(&self, job: &mut Job) -> Result<(), EngineError> {
        job.touch();
        self.inner.job_store.save_job(job).await?;
        Ok(())
    }

    fn job_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.inner.locks.entry(id).or_default().clone()
    }

    /// Suelta el lock del job y saca la entrada del mapa si nadie más la
    /// tiene tomada.
    fn release_lock(&self, id: Uuid, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.inner
            .locks
            .remove_if(&id, |_, l| Arc::strong_count(l) == 1);
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.inner
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::ShuttingDown)
    }

    fn claim(&self, id: Uuid, permit: OwnedSemaphorePermit) -> Result<ActiveGuard, EngineError> {
        if self.inner.active.insert(id, ()).is_some() {
            return Err(EngineError::JobBusy(id));
        }
        Ok(ActiveGuard { inner: self.inner.clone(),
                         job_id: id,
                         _permit: permit })
    }

    fn take_cancel(&self, id: Uuid) -> bool {
        self.inner.cancel_requested.remove(&id).is_some()
    }

    /// Conduce un job con el slot ya tomado. Un error del motor a mitad de
    /// camino deja el job `failed` si estaba activo.
    async fn drive(&self, guard: ActiveGuard, start: Start) -> Result<Job, EngineError> {
        let id = guard.job_id;
        let lock = self.job_lock(id);
        let held = lock.lock().await;
        let outcome = self.drive_locked(guard, start).await;
        drop(held);
        self.release_lock(id, lock);
        outcome
    }

    async fn drive_locked(&self, guard: ActiveGuard, start: Start) -> Result<Job, EngineError> {
        let id = guard.job_id;
        let mut job = match self.load(id).await {
            Ok(job) => job,
            Err(e) => {
                self.inner.cancel_requested.remove(&id);
                return Err(e);
            }
        };
        let mut outcome = self.advance(&mut job, start).await;
        if let Err(e) = &outcome {
            let caller_error = matches!(e, EngineError::InvalidInput(_) | EngineError::NotAwaitingInput(_));
            if !caller_error && job.is_active() {
                error!("job {id}: engine error, marking failed: {e}");
                if job.fail(format!("engine error: {e}")).is_ok() {
                    if let Err(se) = self.persist(&mut job).await {
                        error!("job {id}: could not persist failure: {se}");
                    }
                    self.inner.events.emit(id, PipelineEventKind::JobFailed { error: e.to_string() });
                }
            }
        }
        self.settle_cancel(&mut job, &mut outcome).await;
        // una cancelación que llegue desde aquí ve el job inactivo y espera el lock
        drop(guard);
        self.settle_cancel(&mut job, &mut outcome).await;
        outcome.map(|_| job)
    }

    /// Atiende una cancelación pedida después de la última revisión entre
    /// steps. Sólo un job pausado puede cancelarse a esta altura.
    async fn settle_cancel(&self, job: &mut Job, outcome: &mut Result<(), EngineError>) {
        if !self.take_cancel(job.id) {
            return;
        }
        if job.status != JobStatus::AwaitingInput {
            info!("job {}: cancellation arrived after the run ended ({}); ignored", job.id, job.status);
            return;
        }
        if let Err(e) = self.cancel_now(job).await {
            error!("job {}: could not cancel paused job: {e}", job.id);
            if outcome.is_ok() {
                *outcome = Err(e);
            }
        }
    }

    async fn advance(&self, job: &mut Job, start: Start) -> Result<(), EngineError> {
        let first = match start {
            Start::Fresh => {
                if job.status != JobStatus::Pending {
                    debug!("job {} no longer pending ({}), skipping", job.id, job.status);
                    return Ok(());
                }
                info!("job {} started", job.id);
                self.inner.events.emit(job.id, PipelineEventKind::JobStarted);
                None
            }
            Start::Resume(input) => Some(self.inner.executor.resume_step(job, input).await?),
        };
        self.run_steps(job, first).await
    }

    /// Pide al router el siguiente step y lo ejecuta, hasta completar,
    /// pausar, fallar (agotados los reintentos) o cancelarse.
    async fn run_steps(&self, job: &mut Job, mut last: Option<StepOutcome>) -> Result<(), EngineError> {
        let mut retries = 0u32;
        loop {
            match last.take() {
                Some(StepOutcome::AwaitingInput) => break,
                Some(StepOutcome::Failed) => {
                    let cancelling = self.inner.cancel_requested.contains_key(&job.id);
                    if retries < self.inner.config.max_step_retries && !cancelling {
                        retries += 1;
                        warn!("job {}: retrying after failure ({retries}/{})",
                              job.id, self.inner.config.max_step_retries);
                    } else {
                        let error = job.error_message.clone().unwrap_or_default();
                        self.inner.events.emit(job.id, PipelineEventKind::JobFailed { error });
                        return Ok(());
                    }
                }
                Some(StepOutcome::Completed | StepOutcome::Skipped) | None => {}
            }
            if self.take_cancel(job.id) {
                return self.cancel_now(job).await;
            }
            match self.inner.router.next_step(job) {
                Route::Complete => {
                    let unreachable = self.inner.router.unreachable(job);
                    if !unreachable.is_empty() {
                        debug!("job {}: not applicable: {}", job.id, unreachable.join(", "));
                    }
                    job.complete()?;
                    self.persist(job).await?;
                    info!("job {} completed", job.id);
                    self.inner.events.emit(job.id, PipelineEventKind::JobCompleted);
                    return Ok(());
                }
                Route::Next(p) => last = Some(self.inner.executor.run_step(job, p).await?),
            }
        }
        Ok(())
    }

    async fn cancel_now(&self, job: &mut Job) -> Result<(), EngineError> {
        job.cancel()?;
        self.persist(job).await?;
        info!("job {} cancelled", job.id);
        self.inner.events.emit(job.id, PipelineEventKind::JobCancelled);
        Ok(())
    }
}
