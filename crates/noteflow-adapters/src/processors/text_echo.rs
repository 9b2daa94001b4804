//! text_echo: copia la fuente de texto al directorio de salida con un
//! encabezado de trazabilidad.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use noteflow_core::{ExecutionContext, Job, Processor, ProcessorError, StepResult, StepRunResult};
use serde_json::{json, Map, Value};

use super::drop_keys;
use crate::config::AdaptersConfig;

pub const NAME: &str = "text_echo";
pub const OUTPUT_PATH_KEY: &str = "echo_output_path";
pub const CHAR_COUNT_KEY: &str = "echo_char_count";
pub const LINE_COUNT_KEY: &str = "echo_line_count";

const TEXT_EXTENSIONS: [&str; 4] = ["txt", "md", "text", "log"];
const RULE_WIDTH: usize = 60;

pub struct TextEcho {
    config: AdaptersConfig,
}

impl TextEcho {
    pub fn new(config: AdaptersConfig) -> Self {
        Self { config }
    }

    fn output_dir(&self, job: &Job) -> PathBuf {
        job.config
           .get("output_dir")
           .and_then(Value::as_str)
           .map(PathBuf::from)
           .unwrap_or_else(|| self.config.output_dir.clone())
    }

    fn output_path(&self, job: &Job) -> PathBuf {
        let name = Path::new(&job.source.name).file_name()
                                               .map(|n| n.to_string_lossy().into_owned())
                                               .unwrap_or_else(|| format!("{}.txt", job.id));
        self.output_dir(job).join(format!("{}{}", self.config.prefix, name))
    }

    async fn run(&self, job: &Job, ctx: &mut ExecutionContext) -> Result<Map<String, Value>, ProcessorError> {
        let content = match inline_text(job) {
            Some(text) => text.to_string(),
            None => {
                let path = job.source
                              .path
                              .as_deref()
                              .ok_or_else(|| ProcessorError::msg("job has no source path nor inline text"))?;
                tokio::fs::read_to_string(path).await?
            }
        };
        let output = self.output_path(job);
        let body = format!("{}{}", header(job), content);
        ctx.create_file(&output, &body).await?;
        info!("job {}: echo written to {}", job.id, output.display());

        let mut out = Map::new();
        out.insert(OUTPUT_PATH_KEY.into(), json!(output.to_string_lossy()));
        out.insert(CHAR_COUNT_KEY.into(), json!(content.chars().count()));
        out.insert(LINE_COUNT_KEY.into(), json!(content.lines().count()));
        Ok(out)
    }
}

fn inline_text(job: &Job) -> Option<&str> {
    job.data.get("text").and_then(Value::as_str)
}

fn is_text_file(path: &str) -> bool {
    Path::new(path).extension()
                   .and_then(|e| e.to_str())
                   .map(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                   .unwrap_or(false)
}

fn header(job: &Job) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut lines = vec![rule.clone(),
                         format!("PROCESSED BY: noteflow {NAME}"),
                         format!("ORIGINAL FILE: {}", job.source.name)];
    if let Some(path) = &job.source.path {
        lines.push(format!("ORIGINAL PATH: {path}"));
    }
    lines.push(format!("JOB ID: {}", job.id));
    lines.push(format!("SOURCE TYPE: {}", job.source.source_type));
    lines.push(rule);
    lines.push(String::new());
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[async_trait]
impl Processor for TextEcho {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> String {
        "Text Echo".into()
    }

    fn description(&self) -> &str {
        "Copies text sources to the output directory with a metadata header"
    }

    async fn should_process(&self, job: &Job) -> Result<bool, ProcessorError> {
        if inline_text(job).is_some() {
            return Ok(true);
        }
        let Some(path) = job.source.path.as_deref() else {
            debug!("job {}: no source path, {NAME} not applicable", job.id);
            return Ok(false);
        };
        if !is_text_file(path) {
            debug!("job {}: {path} is not a text file", job.id);
            return Ok(false);
        }
        if !tokio::fs::try_exists(path).await? {
            warn!("job {}: source {path} does not exist", job.id);
            return Ok(false);
        }
        Ok(true)
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        let res = self.run(job, ctx).await;
        let msg = res.as_ref()
                     .ok()
                     .and_then(|o| o.get(OUTPUT_PATH_KEY))
                     .and_then(Value::as_str)
                     .map(|p| format!("Created {p}"));
        let run: StepRunResult = res.into();
        match msg {
            Some(m) => run.with_message(m),
            None => run,
        }
    }

    async fn revert(&self, job: &mut Job, _result: &StepResult, _ctx: &mut ExecutionContext) -> Result<bool, ProcessorError> {
        drop_keys(&mut job.data, &[OUTPUT_PATH_KEY, CHAR_COUNT_KEY, LINE_COUNT_KEY]);
        Ok(true)
    }
}
