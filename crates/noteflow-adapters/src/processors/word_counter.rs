//! word_counter: estadísticas de la copia de `text_echo`.
use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use log::{debug, info};
use noteflow_core::{ExecutionContext, Job, Processor, ProcessorError, StepResult, StepRunResult};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::drop_keys;
use super::text_echo::{self, OUTPUT_PATH_KEY};

pub const NAME: &str = "word_counter";
pub const WORD_COUNT_KEY: &str = "word_count";
pub const LINE_COUNT_KEY: &str = "line_count";
pub const CHAR_COUNT_KEY: &str = "char_count";
pub const STATS_PATH_KEY: &str = "stats_file_path";
pub const COUNTED_MARK: &str = " [counted]";

const TOP_WORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextStats {
    pub word_count: usize,
    pub line_count: usize,
    pub char_count: usize,
    pub unique_word_count: usize,
    /// Palabras más frecuentes (minúsculas), desempate alfabético.
    pub top_words: Vec<(String, usize)>,
}

impl TextStats {
    pub fn of(content: &str) -> Self {
        let words: Vec<String> = content.split(|c: char| !c.is_alphanumeric() && c != '_')
                                        .filter(|w| !w.is_empty())
                                        .map(str::to_lowercase)
                                        .collect();
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for w in &words {
            *freq.entry(w.as_str()).or_insert(0) += 1;
        }
        let mut top: Vec<(String, usize)> = freq.iter()
                                                .map(|(w, n)| (w.to_string(), *n))
                                                .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_WORDS);
        Self { word_count: words.len(),
               line_count: content.split('\n').count(),
               char_count: content.chars().count(),
               unique_word_count: freq.len(),
               top_words: top }
    }
}

#[derive(Debug, Default)]
pub struct WordCounter;

impl WordCounter {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, job: &Job, ctx: &mut ExecutionContext) -> Result<Map<String, Value>, ProcessorError> {
        let echo = echo_path(job).ok_or_else(|| ProcessorError::msg(format!("{OUTPUT_PATH_KEY} missing from job data")))?;
        let content = tokio::fs::read_to_string(echo).await?;
        let stats = TextStats::of(&content);

        let stats_path = format!("{echo}.stats.json");
        let doc = json!({
            "file": echo,
            "job_id": job.id,
            "stats": stats,
        });
        ctx.create_file(&stats_path, &serde_json::to_string_pretty(&doc)?).await?;
        ctx.modify_file(echo, &format!("{content}{COUNTED_MARK}")).await?;
        info!("job {}: {} words, {} lines in {echo}", job.id, stats.word_count, stats.line_count);

        let mut out = Map::new();
        out.insert(WORD_COUNT_KEY.into(), json!(stats.word_count));
        out.insert(LINE_COUNT_KEY.into(), json!(stats.line_count));
        out.insert(CHAR_COUNT_KEY.into(), json!(stats.char_count));
        out.insert(STATS_PATH_KEY.into(), json!(stats_path));
        Ok(out)
    }
}

fn echo_path(job: &Job) -> Option<&str> {
    job.data.get(OUTPUT_PATH_KEY).and_then(Value::as_str)
}

#[async_trait]
impl Processor for WordCounter {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> String {
        "Word Counter".into()
    }

    fn description(&self) -> &str {
        "Counts words, lines and characters of the echoed text"
    }

    fn requires(&self) -> Vec<String> {
        vec![text_echo::NAME.to_string()]
    }

    async fn should_process(&self, job: &Job) -> Result<bool, ProcessorError> {
        match echo_path(job) {
            Some(p) => Ok(tokio::fs::try_exists(Path::new(p)).await?),
            None => {
                debug!("job {}: no echo output, {NAME} not applicable", job.id);
                Ok(false)
            }
        }
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        self.run(job, ctx).await.into()
    }

    async fn revert(&self, job: &mut Job, _result: &StepResult, _ctx: &mut ExecutionContext) -> Result<bool, ProcessorError> {
        drop_keys(&mut job.data, &[WORD_COUNT_KEY, LINE_COUNT_KEY, CHAR_COUNT_KEY, STATS_PATH_KEY]);
        Ok(true)
    }
}
