//! Comandos de la CLI `noteflow`.
//!
//! ```text
//! noteflow run <path> [--review] [--priority N]
//! noteflow list [status]
//! noteflow show <id>
//! noteflow resume <id> <json>
//! noteflow cancel <id>
//! noteflow revert <id> [to_step]
//! noteflow delete <id> [--no-revert]
//! noteflow stats
//! noteflow processors
//! ```
use noteflow_core::{Job, JobFilter, JobSource, JobStatus, Pipeline};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;

pub const USAGE: &str = "noteflow <run|list|show|resume|cancel|revert|delete|stats|processors> [args]";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run { path: String, review: bool, priority: i32 },
    List { status: Option<JobStatus> },
    Show { id: Uuid },
    Resume { id: Uuid, input: Value },
    Cancel { id: Uuid },
    Revert { id: Uuid, to_step: Option<String> },
    Delete { id: Uuid, revert: bool },
    Stats,
    Processors,
}

fn usage(msg: impl Into<String>) -> AppError {
    AppError::Usage(msg.into())
}

fn parse_id(arg: Option<&String>) -> Result<Uuid, AppError> {
    let raw = arg.ok_or_else(|| usage("falta <id>"))?;
    Uuid::parse_str(raw).map_err(|_| usage(format!("id inválido '{raw}'")))
}

impl Command {
    /// Interpreta los argumentos (sin el nombre del binario).
    pub fn parse(args: &[String]) -> Result<Self, AppError> {
        let Some((cmd, rest)) = args.split_first() else {
            return Err(usage(USAGE));
        };
        match cmd.as_str() {
            "run" => {
                let mut path = None;
                let mut review = false;
                let mut priority = 0;
                let mut i = 0;
                while i < rest.len() {
                    match rest[i].as_str() {
                        "--review" => review = true,
                        "--priority" => {
                            i += 1;
                            priority = rest.get(i)
                                           .and_then(|v| v.parse().ok())
                                           .ok_or_else(|| usage("--priority espera un entero"))?;
                        }
                        other if path.is_none() => path = Some(other.to_string()),
                        other => return Err(usage(format!("argumento inesperado '{other}'"))),
                    }
                    i += 1;
                }
                let path = path.ok_or_else(|| usage("falta <path>"))?;
                Ok(Command::Run { path, review, priority })
            }
            "list" => {
                let status = rest.first()
                                 .map(|s| s.parse::<JobStatus>())
                                 .transpose()
                                 .map_err(usage)?;
                Ok(Command::List { status })
            }
            "show" => Ok(Command::Show { id: parse_id(rest.first())? }),
            "resume" => {
                let id = parse_id(rest.first())?;
                let raw = rest.get(1).ok_or_else(|| usage("falta <json>"))?;
                Ok(Command::Resume { id,
                                     input: serde_json::from_str(raw)? })
            }
            "cancel" => Ok(Command::Cancel { id: parse_id(rest.first())? }),
            "revert" => Ok(Command::Revert { id: parse_id(rest.first())?,
                                             to_step: rest.get(1).cloned() }),
            "delete" => {
                let id = parse_id(rest.first())?;
                let revert = !rest[1..].iter().any(|a| a == "--no-revert");
                Ok(Command::Delete { id, revert })
            }
            "stats" => Ok(Command::Stats),
            "processors" => Ok(Command::Processors),
            other => Err(usage(format!("comando desconocido '{other}'; {USAGE}"))),
        }
    }
}

/// Resumen compacto de un job para la salida de la CLI.
pub fn summary(job: &Job) -> Value {
    json!({
        "id": job.id,
        "source": job.source.name,
        "status": job.status,
        "current_step": job.current_step,
        "steps": job.history.iter().map(|r| json!({"step": r.step_name, "status": r.status})).collect::<Vec<_>>(),
        "error": job.error_message,
    })
}

/// Ejecuta un comando y devuelve el documento a imprimir.
pub async fn execute(pipeline: &Pipeline, cmd: Command) -> Result<Value, AppError> {
    let out = match cmd {
        Command::Run { path, review, priority } => {
            let mut job = Job::new(JobSource::file(path)).with_priority(priority);
            if review {
                job = job.with_config("review", json!(true));
            }
            let job = pipeline.create_job(job).await?;
            summary(&pipeline.process_job(job.id).await?)
        }
        Command::List { status } => {
            let filter = status.map(JobFilter::with_status).unwrap_or_default();
            let jobs = pipeline.list_jobs(&filter).await?;
            Value::Array(jobs.iter().map(summary).collect())
        }
        Command::Show { id } => {
            let job = pipeline.get_job(id)
                              .await?
                              .ok_or(noteflow_core::EngineError::JobNotFound(id))?;
            serde_json::to_value(&job)?
        }
        Command::Resume { id, input } => summary(&pipeline.resume_job(id, input).await?),
        Command::Cancel { id } => summary(&pipeline.cancel_job(id).await?),
        Command::Revert { id, to_step } => {
            let (job, report) = pipeline.revert_job(id, to_step.as_deref()).await?;
            json!({
                "job": summary(&job),
                "reverted_steps": report.reverted_steps,
                "reverted_artifacts": report.reverted_artifacts,
                "skipped_artifacts": report.skipped_artifacts,
                "errors": report.errors,
            })
        }
        Command::Delete { id, revert } => json!({ "deleted": pipeline.delete_job(id, revert).await? }),
        Command::Stats => serde_json::to_value(pipeline.stats().await?)?,
        Command::Processors => serde_json::to_value(pipeline.processors())?,
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_run_flags() {
        let cmd = Command::parse(&args("run notes/a.md --review --priority 3")).unwrap();
        assert_eq!(cmd,
                   Command::Run { path: "notes/a.md".into(),
                                  review: true,
                                  priority: 3 });
        assert!(matches!(Command::parse(&args("run")), Err(AppError::Usage(_))));
        assert!(matches!(Command::parse(&args("run a --priority x")), Err(AppError::Usage(_))));
    }

    #[test]
    fn parses_id_commands() {
        let id = Uuid::new_v4();
        assert_eq!(Command::parse(&args(&format!("revert {id} text_echo"))).unwrap(),
                   Command::Revert { id,
                                     to_step: Some("text_echo".into()) });
        assert_eq!(Command::parse(&args(&format!("delete {id} --no-revert"))).unwrap(),
                   Command::Delete { id, revert: false });
        assert_eq!(Command::parse(&args(&format!("delete {id}"))).unwrap(),
                   Command::Delete { id, revert: true });
        assert!(matches!(Command::parse(&args("show nope")), Err(AppError::Usage(_))));
    }

    #[test]
    fn parses_resume_json_and_list_status() {
        let id = Uuid::new_v4();
        let parsed = Command::parse(&[String::from("resume"), id.to_string(), r#"{"approved":true}"#.into()]).unwrap();
        assert_eq!(parsed,
                   Command::Resume { id,
                                     input: json!({"approved": true}) });
        assert_eq!(Command::parse(&args("list awaiting_input")).unwrap(),
                   Command::List { status: Some(JobStatus::AwaitingInput) });
        assert!(matches!(Command::parse(&args("list bogus")), Err(AppError::Usage(_))));
        assert!(matches!(Command::parse(&args("frobnicate")), Err(AppError::Usage(_))));
        assert!(matches!(Command::parse(&[]), Err(AppError::Usage(_))));
    }
}
