//! review_gate: pausa para revisión humana cuando el job lo pide
//! (`config.review = true`). Input esperado: `{"approved": bool, "comment"?: str}`.
use async_trait::async_trait;
use log::info;
use noteflow_core::{ExecutionContext, Job, Processor, ProcessorError, RequiresInput, StepResult, StepRunResult};
use serde_json::{json, Map, Value};

use super::drop_keys;
use super::text_echo::OUTPUT_PATH_KEY;
use super::word_counter::{self, WORD_COUNT_KEY};

pub const NAME: &str = "review_gate";
pub const APPROVED_KEY: &str = "review_approved";
pub const COMMENT_KEY: &str = "review_comment";

#[derive(Debug, Default)]
pub struct ReviewGate;

impl ReviewGate {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, job: &Job, ctx: &mut ExecutionContext) -> Result<Map<String, Value>, ProcessorError> {
        let (approved, comment, auto) = match ctx.user_input() {
            Some(input) => (input.get("approved").and_then(Value::as_bool).unwrap_or(false),
                            input.get("comment").and_then(Value::as_str).map(str::to_string),
                            false),
            None => (true, None, true),
        };
        if !approved {
            let why = comment.as_deref().unwrap_or("no comment");
            return Err(ProcessorError::msg(format!("review rejected: {why}")));
        }

        let echo = job.data.get(OUTPUT_PATH_KEY).and_then(Value::as_str);
        match echo {
            Some(path) if path.ends_with(".md") && !auto => {
                let mut fields = Map::new();
                fields.insert("reviewed".into(), json!(true));
                if let Some(c) = &comment {
                    fields.insert("review_comment".into(), json!(c));
                }
                ctx.update_frontmatter(path, &fields).await?;
            }
            _ => {
                ctx.record_metadata("review",
                                    None,
                                    Some(json!({"approved": true, "auto": auto, "comment": comment.clone()})));
            }
        }
        info!("job {}: review approved{}", job.id, if auto { " (auto)" } else { "" });

        let mut out = Map::new();
        out.insert(APPROVED_KEY.into(), json!(true));
        if let Some(c) = comment {
            out.insert(COMMENT_KEY.into(), json!(c));
        }
        Ok(out)
    }
}

#[async_trait]
impl Processor for ReviewGate {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> String {
        "Review Gate".into()
    }

    fn description(&self) -> &str {
        "Waits for a human approval when the job asks for review"
    }

    fn requires(&self) -> Vec<String> {
        vec![word_counter::NAME.to_string()]
    }

    fn requires_input(&self) -> RequiresInput {
        RequiresInput::Conditional
    }

    fn needs_input(&self, job: &Job) -> bool {
        job.config
           .get("review")
           .and_then(Value::as_bool)
           .unwrap_or(false)
    }

    fn input_schema(&self, job: &Job) -> Option<Value> {
        Some(json!({
            "fields": {"approved": "boolean", "comment": "string (optional)"},
            "output": job.data.get(OUTPUT_PATH_KEY),
            "word_count": job.data.get(WORD_COUNT_KEY),
        }))
    }

    async fn validate_input(&self, _job: &Job, input: &Value) -> Result<(), String> {
        let obj = input.as_object().ok_or("input must be a JSON object")?;
        match obj.get("approved") {
            Some(Value::Bool(_)) => {}
            Some(_) => return Err("'approved' must be a boolean".into()),
            None => return Err("'approved' is required".into()),
        }
        match obj.get("comment") {
            None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
            Some(_) => Err("'comment' must be a string".into()),
        }
    }

    async fn process(&self, job: &mut Job, ctx: &mut ExecutionContext) -> StepRunResult {
        self.run(job, ctx).await.into()
    }

    async fn revert(&self, job: &mut Job, _result: &StepResult, _ctx: &mut ExecutionContext) -> Result<bool, ProcessorError> {
        drop_keys(&mut job.data, &[APPROVED_KEY, COMMENT_KEY]);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noteflow_core::JobSource;

    #[test]
    fn input_validation() {
        let gate = ReviewGate::new();
        let job = Job::new(JobSource::new("test", "x"));
        let check = |v: Value| tokio_test::block_on(gate.validate_input(&job, &v));
        assert!(check(json!({"approved": true})).is_ok());
        assert!(check(json!({"approved": false, "comment": "nope"})).is_ok());
        assert!(check(json!({"approved": "yes"})).is_err());
        assert!(check(json!({})).is_err());
        assert!(check(json!([true])).is_err());
        assert!(check(json!({"approved": true, "comment": 3})).is_err());
    }

    #[test]
    fn pauses_only_when_review_requested() {
        let gate = ReviewGate::new();
        let plain = Job::new(JobSource::new("test", "x"));
        assert!(!gate.needs_input(&plain));
        let reviewed = plain.clone().with_config("review", json!(true));
        assert!(gate.needs_input(&reviewed));
    }
}
