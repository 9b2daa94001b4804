//! Executor: lleva un step de un job a través de su máquina de estados.
//!
//! `not_started -> should_process -> {skipped | input_check} ->
//! {paused | running} -> {committed | rolled_back}`
//!
//! Las fallas del processor se convierten en campos del StepResult / Job y
//! nunca salen de aquí como error. Los `EngineError` que sí devuelve son del
//! propio motor (transición inválida, store caído).
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::constants::{REVERT_STEP_PREFIX, USER_INPUT_KEY};
use crate::context::{ApiReverter, ExecutionContext};
use crate::errors::{EngineError, ProcessorError};
use crate::event::{EventBus, PipelineEventKind};
use crate::model::{Job, JobStatus, RequiresInput, StepResult, StepStatus};
use crate::processor::{Processor, ProcessorRegistry, StepRunResult};
use crate::repo::{ArtifactStore, JobStore};

/// Resultado de ejecutar (o reanudar) un step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Skipped,
    Completed,
    AwaitingInput,
    Failed,
}

/// Resumen de un revert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevertReport {
    pub reverted_steps: Vec<String>,
    pub reverted_artifacts: usize,
    pub skipped_artifacts: usize,
    pub errors: Vec<String>,
}

impl RevertReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Executor {
    registry: Arc<ProcessorRegistry>,
    job_store: Arc<dyn JobStore>,
    artifact_store: Arc<dyn ArtifactStore>,
    events: Arc<EventBus>,
    reverter: Option<Arc<dyn ApiReverter>>,
    step_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(registry: Arc<ProcessorRegistry>,
               job_store: Arc<dyn JobStore>,
               artifact_store: Arc<dyn ArtifactStore>,
               events: Arc<EventBus>)
               -> Self {
        Self { registry,
               job_store,
               artifact_store,
               events,
               reverter: None,
               step_timeout: None }
    }

    pub fn with_reverter(mut self, reverter: Option<Arc<dyn ApiReverter>>) -> Self {
        self.reverter = reverter;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    fn context(&self, job: &Job, step_name: &str) -> ExecutionContext {
        ExecutionContext::new(job.id, step_name, self.artifact_store.clone()).with_reverter(self.reverter.clone())
    }

    async fn persist(&self, job: &mut Job) -> Result<(), EngineError> {
        job.touch();
        self.job_store.save_job(job).await?;
        Ok(())
    }

    fn emit_step(&self, job: &Job, step_name: &str, status: StepStatus) {
        self.events.emit(job.id,
                         PipelineEventKind::StepCompleted { step_name: step_name.to_string(),
                                                            status });
    }

    /// Corre un step nuevo del job.
    pub async fn run_step(&self, job: &mut Job, processor: Arc<dyn Processor>) -> Result<StepOutcome, EngineError> {
        let name = processor.name().to_string();
        job.start_processing(&name)?;
        let mut result = StepResult::new(job.id, &name);
        result.start();

        match processor.should_process(job).await {
            Err(e) => {
                let msg = format!("should_process of '{name}' failed: {e}");
                error!("job {}: {msg}", job.id);
                return self.finish_failed(job, result, msg, e.trace()).await;
            }
            Ok(false) => {
                debug!("job {}: step '{name}' skipped", job.id);
                result.skip(format!("{name}.should_process returned false"));
                job.record_step(result);
                self.persist(job).await?;
                self.emit_step(job, &name, StepStatus::Skipped);
                return Ok(StepOutcome::Skipped);
            }
            Ok(true) => {}
        }

        let pause_first = match processor.requires_input() {
            RequiresInput::Always => true,
            RequiresInput::Conditional => processor.needs_input(job),
            RequiresInput::Never => false,
        };
        if pause_first {
            let prompt = processor.input_schema(job);
            return self.pause(job, result, prompt).await;
        }

        job.record_step(result.clone());
        self.persist(job).await?;
        self.execute(job, processor.as_ref(), result, None).await
    }

    /// Reanuda el step pausado con el input del usuario. Un input inválido
    /// deja el job pausado y devuelve `EngineError::InvalidInput`.
    pub async fn resume_step(&self, job: &mut Job, input: Value) -> Result<StepOutcome, EngineError> {
        if job.status != JobStatus::AwaitingInput {
            return Err(EngineError::NotAwaitingInput(job.id));
        }
        let name = job.current_step
                      .clone()
                      .ok_or(EngineError::NotAwaitingInput(job.id))?;
        let processor = self.registry
                            .get(&name)
                            .ok_or_else(|| EngineError::UnknownProcessor(name.clone()))?;
        let paused = job.history
                        .last()
                        .filter(|r| r.step_name == name && r.status == StepStatus::AwaitingInput)
                        .cloned()
                        .ok_or_else(|| EngineError::StepNotInHistory(name.clone()))?;
        processor.validate_input(job, &input)
                 .await
                 .map_err(EngineError::InvalidInput)?;

        let mut result = paused;
        result.provide_input(input.clone());
        result.start();
        result.remember_data(&job.data, [USER_INPUT_KEY]);
        job.data.insert(USER_INPUT_KEY.to_string(), input.clone());
        job.start_processing(&name)?;
        job.record_step(result.clone());
        self.persist(job).await?;
        info!("job {}: step '{name}' resumed with user input", job.id);
        self.execute(job, processor.as_ref(), result, Some(input)).await
    }

    async fn pause(&self, job: &mut Job, mut result: StepResult, prompt: Option<Value>) -> Result<StepOutcome, EngineError> {
        let name = result.step_name.clone();
        result.await_input(prompt);
        job.await_input(&name)?;
        job.record_step(result);
        self.persist(job).await?;
        info!("job {}: step '{name}' awaiting input", job.id);
        self.events.emit(job.id, PipelineEventKind::StepAwaitingInput { step_name: name });
        Ok(StepOutcome::AwaitingInput)
    }

    async fn execute(&self, job: &mut Job, processor: &dyn Processor, mut result: StepResult, input: Option<Value>) -> Result<StepOutcome, EngineError> {
        let name = result.step_name.clone();
        let mut ctx = self.context(job, &name).with_user_input(input);
        let run = match self.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, processor.process(job, &mut ctx)).await {
                Ok(r) => r,
                Err(_) => StepRunResult::failure(ProcessorError::msg(format!("step '{name}' timed out after {limit:?}"))),
            },
            None => processor.process(job, &mut ctx).await,
        };

        match run {
            StepRunResult::Success { output, message } => match ctx.commit().await {
                Ok(artifacts) => {
                    result.remember_data(&job.data, output.keys());
                    result.complete(output.clone(), message, artifacts);
                    job.merge_data(&output);
                    job.record_step(result);
                    self.persist(job).await?;
                    info!("job {}: step '{name}' completed", job.id);
                    self.emit_step(job, &name, StepStatus::Completed);
                    Ok(StepOutcome::Completed)
                }
                Err(e) => {
                    let msg = format!("commit of step '{name}' failed: {e}");
                    self.rollback_and_fail(job, result, ctx, msg, None).await
                }
            },
            StepRunResult::AwaitingInput { prompt } => {
                let report = ctx.rollback_uncommitted().await;
                if !report.is_clean() {
                    warn!("job {}: discarding uncommitted work of '{name}' left {} artifact(s) failed",
                          job.id,
                          report.failed.len());
                }
                result.artifacts.extend(ctx.into_artifacts());
                self.pause(job, result, prompt).await
            }
            StepRunResult::Failure { error } => {
                let trace = error.trace();
                self.rollback_and_fail(job, result, ctx, error.to_string(), trace).await
            }
        }
    }

    /// Rollback del contexto (y de lo confirmado antes de una pausa) y cierre
    /// del step como fallido.
    async fn rollback_and_fail(&self,
                               job: &mut Job,
                               mut result: StepResult,
                               mut ctx: ExecutionContext,
                               msg: String,
                               trace: Option<String>)
                               -> Result<StepOutcome, EngineError> {
        let report = ctx.rollback().await;
        for art in result.artifacts.iter_mut().rev() {
            if let Err(e) = ctx.revert_artifact(art).await {
                art.mark_failed(e.to_string());
            }
        }
        if !report.is_clean() {
            warn!("job {}: rollback of '{}' incomplete: {:?}", job.id, result.step_name, report.failed);
        }
        result.artifacts.extend(ctx.into_artifacts());
        self.finish_failed(job, result, msg, trace).await
    }

    async fn finish_failed(&self, job: &mut Job, mut result: StepResult, msg: String, trace: Option<String>) -> Result<StepOutcome, EngineError> {
        let name = result.step_name.clone();
        error!("job {}: step '{name}' failed: {msg}", job.id);
        result.fail(msg.clone(), trace);
        job.record_step(result);
        job.fail(msg)?;
        self.persist(job).await?;
        self.emit_step(job, &name, StepStatus::Failed);
        Ok(StepOutcome::Failed)
    }

    /// Revierte los steps posteriores a `to_step` (todos si es `None`) en
    /// orden inverso de historial, y dentro de cada uno sus artifacts en orden
    /// inverso de creación.
    ///
    /// Sin errores: historial truncado, job `pending`. Con errores: los steps
    /// limpios quedan `reverted`, el problemático guarda `revert_error` y el
    /// job termina `failed`.
    pub async fn revert(&self, job: &mut Job, to_step: Option<&str>) -> Result<RevertReport, EngineError> {
        let keep = match to_step {
            None => 0,
            Some(target) => job.history
                               .iter()
                               .rposition(|r| r.step_name == target)
                               .map(|i| i + 1)
                               .ok_or_else(|| EngineError::StepNotInHistory(target.to_string()))?,
        };
        let mut report = RevertReport::default();
        if keep >= job.history.len() && job.status == JobStatus::Pending {
            debug!("job {}: nothing to revert", job.id);
            return Ok(report);
        }

        job.start_revert()?;
        self.persist(job).await?;
        info!("job {}: reverting {} step(s)", job.id, job.history.len() - keep);

        for idx in (keep..job.history.len()).rev() {
            if job.history[idx].status == StepStatus::Reverted {
                continue;
            }
            let step_name = job.history[idx].step_name.clone();
            let mut ctx = self.context(job, &format!("{REVERT_STEP_PREFIX}{step_name}"));
            let mut errors = Vec::new();

            let mut artifacts = std::mem::take(&mut job.history[idx].artifacts);
            for art in artifacts.iter_mut().rev() {
                if !art.can_revert() {
                    report.skipped_artifacts += 1;
                    continue;
                }
                match ctx.revert_artifact(art).await {
                    Ok(true) => report.reverted_artifacts += 1,
                    Ok(false) => report.skipped_artifacts += 1,
                    Err(e) => {
                        error!("job {}: revert of {} ({:?}) failed: {e}", job.id, art.target, art.artifact_type);
                        art.record_revert_error(e.to_string());
                        if let Err(se) = self.artifact_store.save_artifact(art).await {
                            warn!("job {}: could not persist artifact {}: {se}", job.id, art.id);
                        }
                        errors.push(format!("{}: {e}", art.target));
                    }
                }
            }
            job.history[idx].artifacts = artifacts;

            match self.registry.get(&step_name) {
                Some(p) => {
                    let snapshot = job.history[idx].clone();
                    match p.revert(job, &snapshot, &mut ctx).await {
                        Ok(true) => {}
                        Ok(false) => errors.push(format!("custom revert of '{step_name}' reported failure")),
                        Err(e) => errors.push(format!("custom revert of '{step_name}' failed: {e}")),
                    }
                }
                None => warn!("job {}: processor '{step_name}' no longer registered; skipping custom revert", job.id),
            }

            if !ctx.artifacts().is_empty() {
                match ctx.commit().await {
                    Ok(compensating) => {
                        let mut synthetic = StepResult::new(job.id, ctx.step_name());
                        synthetic.start();
                        synthetic.complete(Map::new(), Some(format!("compensation for '{step_name}'")), compensating);
                        job.revert_log.push(synthetic);
                    }
                    Err(e) => errors.push(format!("compensating artifacts of '{step_name}' not persisted: {e}")),
                }
            }

            let entry = &mut job.history[idx];
            if errors.is_empty() {
                entry.mark_reverted();
                report.reverted_steps.push(step_name);
            } else {
                entry.revert_error = Some(errors.join("; "));
                report.errors.extend(errors);
            }
            self.persist(job).await?;
        }

        if report.is_clean() {
            restore_data(job, keep);
            job.history.truncate(keep);
            job.finish_revert(to_step.map(str::to_string))?;
            info!("job {}: reverted to {}", job.id, to_step.unwrap_or("start"));
        } else {
            let msg = format!("revert incomplete: {}", report.errors.join("; "));
            error!("job {}: {msg}", job.id);
            job.fail_revert(msg)?;
        }
        self.persist(job).await?;
        Ok(report)
    }
}

/// Deshace sobre `job.data` lo escrito por los steps revertidos, del más
/// reciente al más antiguo.
fn restore_data(job: &mut Job, keep: usize) {
    let Job { history, data, .. } = &mut *job;
    for r in history[keep..].iter().rev() {
        r.restore_data(data);
    }
    job.touch();
}
