#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use noteflow_core::{ExecutionContext, Job, JobSource, Processor, ProcessorError, RequiresInput, StepResult, StepRunResult};
use serde_json::{json, Map, Value};
use tokio::sync::Notify;

pub fn out_dir(job: &Job) -> PathBuf {
    PathBuf::from(job.config
                     .get("out_dir")
                     .and_then(Value::as_str)
                     .unwrap_or("."))
}

pub fn job_in(dir: &std::path::Path) -> Job {
    Job::new(JobSource::new("test", "sample")).with_config("out_dir", json!(dir.to_string_lossy()))
}

fn out(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter()
         .map(|(k, v)| (k.to_string(), v.clone()))
         .collect()
}

/// Crea `out/a.txt` con "hello world".
pub struct Create;

#[async_trait]
impl Processor for Create {
    fn name(&self) -> &str {
        "create"
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let path = out_dir(job).join("out").join("a.txt");
        if let Err(e) = ctx.create_file(&path, "hello world").await {
            return StepRunResult::failure(e);
        }
        StepRunResult::success(out(&[("a_path", json!(path.to_string_lossy()))]))
    }
}

/// Agrega " [counted]" al archivo de `create`.
pub struct Append;

#[async_trait]
impl Processor for Append {
    fn name(&self) -> &str {
        "append"
    }

    fn requires(&self) -> Vec<String> {
        vec!["create".into()]
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let path = out_dir(job).join("out").join("a.txt");
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return StepRunResult::failure(e),
        };
        if let Err(e) = ctx.modify_file(&path, &format!("{current} [counted]")).await {
            return StepRunResult::failure(e);
        }
        StepRunResult::success(out(&[("counted", json!(true))]))
    }
}

/// Escribe `b.txt` y luego falla.
pub struct Boom;

#[async_trait]
impl Processor for Boom {
    fn name(&self) -> &str {
        "boom"
    }

    fn requires(&self) -> Vec<String> {
        vec!["create".into()]
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let path = out_dir(job).join("b.txt");
        if let Err(e) = ctx.create_file(&path, "partial").await {
            return StepRunResult::failure(e);
        }
        StepRunResult::failure(ProcessorError::msg("boom"))
    }
}

/// Siempre pide `{"approved": bool}` antes de correr.
pub struct Gate;

#[async_trait]
impl Processor for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    fn requires_input(&self) -> RequiresInput {
        RequiresInput::Always
    }

    fn input_schema(&self, _job: &Job) -> Option<Value> {
        Some(json!({"approved": "bool"}))
    }

    async fn validate_input(&self, _job: &Job, input: &Value) -> Result<(), String> {
        match input.get("approved") {
            Some(Value::Bool(_)) => Ok(()),
            _ => Err("expected {\"approved\": bool}".into()),
        }
    }

    async fn process(&self, _job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let approved = ctx.user_input()
                          .and_then(|v| v.get("approved"))
                          .and_then(Value::as_bool)
                          .unwrap_or(false);
        StepRunResult::success(out(&[("approved", json!(approved))]))
    }
}

/// Duerme un rato y registra el pico de ejecuciones simultáneas.
pub struct Slow {
    pub delay: Duration,
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl Slow {
    pub fn new(delay: Duration) -> Self {
        Self { delay,
               current: Arc::new(AtomicUsize::new(0)),
               peak: Arc::new(AtomicUsize::new(0)) }
    }
}

#[async_trait]
impl Processor for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn process(&self, _job: &mut Job, _ctx: &mut ExecutionContext) -> StepRunResult {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        StepRunResult::success(Map::new())
    }
}

/// Avisa que arrancó y espera a que lo liberen.
pub struct Blocking {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl Processor for Blocking {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn process(&self, _job: &mut Job, _ctx: &mut ExecutionContext) -> StepRunResult {
        self.started.notify_one();
        self.release.notified().await;
        StepRunResult::success(Map::new())
    }
}

/// Corre después de `blocking`.
pub struct After;

#[async_trait]
impl Processor for After {
    fn name(&self) -> &str {
        "after"
    }

    fn requires(&self) -> Vec<String> {
        vec!["blocking".into()]
    }

    async fn process(&self, _job: &mut Job, _ctx: &mut ExecutionContext) -> StepRunResult {
        StepRunResult::success(Map::new())
    }
}

/// Normaliza `title` pisando el valor con que se creó el job.
pub struct Overwrite;

#[async_trait]
impl Processor for Overwrite {
    fn name(&self) -> &str {
        "overwrite"
    }

    async fn process(&self, _job: &mut Job, _ctx: &mut ExecutionContext) -> StepRunResult {
        StepRunResult::success(out(&[("title", json!("normalized")), ("slug", json!("normalized"))]))
    }
}

/// Crea `out/c.txt`; tercer step después de `append`.
pub struct Third;

#[async_trait]
impl Processor for Third {
    fn name(&self) -> &str {
        "third"
    }

    fn requires(&self) -> Vec<String> {
        vec!["append".into()]
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let path = out_dir(job).join("out").join("c.txt");
        if let Err(e) = ctx.create_file(&path, "third").await {
            return StepRunResult::failure(e);
        }
        StepRunResult::success(out(&[("third", json!(true))]))
    }
}

/// Falla las primeras `failures` corridas y después escribe `flaky.txt`.
pub struct Flaky {
    pub failures: usize,
    pub attempts: Arc<AtomicUsize>,
}

impl Flaky {
    pub fn new(failures: usize) -> Self {
        Self { failures,
               attempts: Arc::new(AtomicUsize::new(0)) }
    }
}

#[async_trait]
impl Processor for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let path = out_dir(job).join(format!("flaky-{attempt}.txt"));
        if let Err(e) = ctx.create_file(&path, "try").await {
            return StepRunResult::failure(e);
        }
        if attempt <= self.failures {
            return StepRunResult::failure(ProcessorError::msg(format!("attempt {attempt} failed")));
        }
        StepRunResult::success(out(&[("attempts", json!(attempt))]))
    }
}

/// Escribe `hang.txt` y nunca termina.
pub struct Hang;

#[async_trait]
impl Processor for Hang {
    fn name(&self) -> &str {
        "hang"
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let path = out_dir(job).join("hang.txt");
        if let Err(e) = ctx.create_file(&path, "stuck").await {
            return StepRunResult::failure(e);
        }
        std::future::pending::<()>().await;
        StepRunResult::success(Map::new())
    }
}

/// `should_process` no puede decidir.
pub struct BadPredicate;

#[async_trait]
impl Processor for BadPredicate {
    fn name(&self) -> &str {
        "bad_predicate"
    }

    async fn should_process(&self, _job: &Job) -> Result<bool, ProcessorError> {
        Err(ProcessorError::msg("source unreadable"))
    }

    async fn process(&self, _job: &mut Job, _ctx: &mut ExecutionContext) -> StepRunResult {
        StepRunResult::success(Map::new())
    }
}

/// Confirma `kept.txt`, deja `draft.txt` sin confirmar y pide input.
/// Con input, termina.
pub struct Checkpoint;

#[async_trait]
impl Processor for Checkpoint {
    fn name(&self) -> &str {
        "checkpoint"
    }

    fn requires_input(&self) -> RequiresInput {
        RequiresInput::Conditional
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        if ctx.user_input().is_some() {
            return StepRunResult::success(out(&[("checked", json!(true))]));
        }
        let dir = out_dir(job);
        if let Err(e) = ctx.create_file(dir.join("kept.txt"), "kept").await {
            return StepRunResult::failure(e);
        }
        if let Err(e) = ctx.commit().await {
            return StepRunResult::failure(e);
        }
        if let Err(e) = ctx.create_file(dir.join("draft.txt"), "draft").await {
            return StepRunResult::failure(e);
        }
        StepRunResult::awaiting_input(Some(json!({"confirm": "bool"})))
    }
}

/// Crea `journaled.txt`; al revertirse deja constancia en `undo.log`.
pub struct Journaled;

#[async_trait]
impl Processor for Journaled {
    fn name(&self) -> &str {
        "journaled"
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        if let Err(e) = ctx.create_file(out_dir(job).join("journaled.txt"), "data").await {
            return StepRunResult::failure(e);
        }
        StepRunResult::success(Map::new())
    }

    async fn revert(&self, job: &mut Job, _result: &StepResult, ctx: &mut ExecutionContext) -> Result<bool, ProcessorError> {
        ctx.create_file(out_dir(job).join("undo.log"), "journaled reverted")
           .await
           .map_err(ProcessorError::from)?;
        Ok(true)
    }
}

/// Espera a que lo liberen y termina pidiendo input.
pub struct BlockThenPause {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl Processor for BlockThenPause {
    fn name(&self) -> &str {
        "block_then_pause"
    }

    fn requires_input(&self) -> RequiresInput {
        RequiresInput::Conditional
    }

    async fn process(&self, _job: &mut Job, _ctx: &mut ExecutionContext) -> StepRunResult {
        self.started.notify_one();
        self.release.notified().await;
        StepRunResult::awaiting_input(None)
    }
}
