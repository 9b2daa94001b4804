mod common;

use std::sync::Arc;

use common::{job_in, Append, Boom, Create, Journaled, Overwrite, Third};
use noteflow_core::{ArtifactStatus, ArtifactStore, ArtifactType, InMemoryArtifactStore, Job, JobSource, JobStatus, Pipeline, Processor, ProcessorRegistry, StepStatus};
use serde_json::json;

fn pipeline(list: Vec<Arc<dyn Processor>>) -> (Pipeline, Arc<InMemoryArtifactStore>) {
    let registry = ProcessorRegistry::from_processors(list).expect("valid registry");
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let p = Pipeline::builder(registry).artifact_store(artifacts.clone())
                                       .build();
    (p, artifacts)
}

#[tokio::test]
async fn full_run_then_revert_to_start_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let (p, _) = pipeline(vec![Arc::new(Create), Arc::new(Append)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();

    let done = p.process_job(job.id).await.unwrap();
    let file = dir.path().join("out").join("a.txt");
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.history.len(), 2);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello world [counted]");

    let (reverted, report) = p.revert_job(job.id, None).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.reverted_steps, vec!["append".to_string(), "create".to_string()]);
    assert_eq!(report.reverted_artifacts, 2);
    assert_eq!(reverted.status, JobStatus::Pending);
    assert!(reverted.history.is_empty());
    assert!(reverted.data.is_empty());
    assert!(reverted.current_step.is_none());
    assert!(!file.exists());
}

#[tokio::test]
async fn revert_to_step_restores_bytes_and_allows_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let (p, _) = pipeline(vec![Arc::new(Create), Arc::new(Append)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();

    let file = dir.path().join("out").join("a.txt");
    let (reverted, report) = p.revert_job(job.id, Some("create")).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(reverted.status, JobStatus::Pending);
    assert_eq!(reverted.reverted_to.as_deref(), Some("create"));
    assert_eq!(reverted.history.len(), 1);
    assert!(reverted.data.contains_key("a_path"));
    assert!(!reverted.data.contains_key("counted"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello world");

    // sólo vuelve a correr lo revertido
    let again = p.process_job(job.id).await.unwrap();
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(again.history.len(), 2);
    assert_eq!(again.history[1].step_name, "append");
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello world [counted]");
}

#[tokio::test]
async fn repeated_revert_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let (p, _) = pipeline(vec![Arc::new(Create), Arc::new(Append)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();

    let (first, _) = p.revert_job(job.id, Some("create")).await.unwrap();
    let (second, report) = p.revert_job(job.id, Some("create")).await.unwrap();
    assert!(report.is_clean());
    assert!(report.reverted_steps.is_empty());
    assert_eq!(report.reverted_artifacts, 0);
    assert_eq!(first.history.len(), second.history.len());
    assert_eq!(second.status, JobStatus::Pending);
    let file = dir.path().join("out").join("a.txt");
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello world");
}

#[tokio::test]
async fn revert_to_unknown_step_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (p, _) = pipeline(vec![Arc::new(Create)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();

    let err = p.revert_job(job.id, Some("nope")).await.unwrap_err();
    assert!(matches!(err, noteflow_core::EngineError::StepNotInHistory(ref s) if s == "nope"));
    let job = p.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn failing_step_rolls_back_its_own_effects() {
    let dir = tempfile::tempdir().unwrap();
    let (p, artifacts) = pipeline(vec![Arc::new(Create), Arc::new(Boom)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();

    let failed = p.process_job(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("boom"));
    assert!(!dir.path().join("b.txt").exists());
    assert!(dir.path().join("out").join("a.txt").exists());

    let last = failed.history.last().unwrap();
    assert_eq!(last.step_name, "boom");
    assert_eq!(last.status, StepStatus::Failed);
    assert!(last.artifacts
                .iter()
                .all(|a| a.status != ArtifactStatus::Created));
    assert!(failed.current_step_consistent());

    let stored = artifacts.load_artifacts(job.id).await.unwrap();
    let created: Vec<_> = stored.iter()
                                .filter(|a| a.status == ArtifactStatus::Created)
                                .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].step_name, "create");
}

#[tokio::test]
async fn failed_job_can_be_reverted() {
    let dir = tempfile::tempdir().unwrap();
    let (p, _) = pipeline(vec![Arc::new(Create), Arc::new(Boom)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();

    let (reverted, report) = p.revert_job(job.id, None).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(reverted.status, JobStatus::Pending);
    assert!(reverted.error_message.is_none());
    assert!(!dir.path().join("out").join("a.txt").exists());
}

#[tokio::test]
async fn revert_fails_when_file_was_removed_externally() {
    let dir = tempfile::tempdir().unwrap();
    let (p, _) = pipeline(vec![Arc::new(Create), Arc::new(Append)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();
    std::fs::remove_file(dir.path().join("out").join("a.txt")).unwrap();

    let (job, report) = p.revert_job(job.id, None).await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.history.len(), 2);
    assert!(job.history[1].revert_error.is_some());
    assert!(job.error_message
               .as_deref()
               .unwrap_or_default()
               .starts_with("revert incomplete"));
}

#[tokio::test]
async fn delete_with_revert_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (p, artifacts) = pipeline(vec![Arc::new(Create), Arc::new(Append)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();

    assert!(p.delete_job(job.id, true).await.unwrap());
    assert!(p.get_job(job.id).await.unwrap().is_none());
    assert!(artifacts.load_artifacts(job.id).await.unwrap().is_empty());
    assert!(!dir.path().join("out").join("a.txt").exists());
    assert!(!p.delete_job(job.id, true).await.unwrap());
}

#[tokio::test]
async fn delete_without_revert_orphans_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let (p, artifacts) = pipeline(vec![Arc::new(Create), Arc::new(Append)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();

    assert!(p.delete_job(job.id, false).await.unwrap());
    assert!(p.get_job(job.id).await.unwrap().is_none());
    let left = artifacts.load_artifacts(job.id).await.unwrap();
    assert_eq!(left.len(), 2);
    assert!(left.iter().all(|a| a.status == ArtifactStatus::Orphaned));
    assert!(dir.path().join("out").join("a.txt").exists());
}

#[tokio::test]
async fn revert_restores_data_the_job_was_created_with() {
    let (p, _) = pipeline(vec![Arc::new(Overwrite)]);
    let job = Job::new(JobSource::new("test", "titled")).with_data("title", json!("original"));
    let job = p.create_job(job).await.unwrap();

    let done = p.process_job(job.id).await.unwrap();
    assert_eq!(done.data.get("title"), Some(&json!("normalized")));
    let step = &done.history[0];
    assert_eq!(step.data_before.get("title"), Some(&json!("original")));
    assert_eq!(step.data_added, vec!["slug".to_string()]);

    let (reverted, report) = p.revert_job(job.id, None).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(reverted.data.get("title"), Some(&json!("original")));
    assert!(!reverted.data.contains_key("slug"));

    // la nueva corrida vuelve a ver el input original
    let again = p.process_job(job.id).await.unwrap();
    assert_eq!(again.history[0].data_before.get("title"), Some(&json!("original")));
}

#[tokio::test]
async fn revert_to_first_of_three_steps_leaves_its_artifacts_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (p, artifacts) = pipeline(vec![Arc::new(Create), Arc::new(Append), Arc::new(Third)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    let done = p.process_job(job.id).await.unwrap();
    assert_eq!(done.completed_steps(), vec!["create", "append", "third"]);
    let kept_id = done.history[0].artifacts[0].id;

    let (reverted, report) = p.revert_job(job.id, Some("create")).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.reverted_steps, vec!["third".to_string(), "append".to_string()]);
    assert_eq!(reverted.history.len(), 1);
    let create = &reverted.history[0];
    assert_eq!(create.status, StepStatus::Completed);
    assert_eq!(create.artifacts.len(), 1);
    assert_eq!(create.artifacts[0].status, ArtifactStatus::Created);

    let stored = artifacts.load_artifacts(job.id).await.unwrap();
    let kept = stored.iter().find(|a| a.id == kept_id).unwrap();
    assert_eq!(kept.status, ArtifactStatus::Created);
    assert!(stored.iter()
                  .filter(|a| a.step_name != "create")
                  .all(|a| a.status == ArtifactStatus::Reverted));

    let out = dir.path().join("out");
    assert_eq!(std::fs::read_to_string(out.join("a.txt")).unwrap(), "hello world");
    assert!(!out.join("c.txt").exists());
    assert!(reverted.data.contains_key("a_path"));
    assert!(!reverted.data.contains_key("counted"));
    assert!(!reverted.data.contains_key("third"));
}

#[tokio::test]
async fn compensating_artifacts_from_custom_revert_are_logged() {
    let dir = tempfile::tempdir().unwrap();
    let (p, artifacts) = pipeline(vec![Arc::new(Journaled)]);
    let job = p.create_job(job_in(dir.path())).await.unwrap();
    p.process_job(job.id).await.unwrap();

    let (reverted, report) = p.revert_job(job.id, None).await.unwrap();
    assert!(report.is_clean());
    assert!(reverted.history.is_empty());
    assert!(!dir.path().join("journaled.txt").exists());
    assert_eq!(std::fs::read_to_string(dir.path().join("undo.log")).unwrap(), "journaled reverted");

    assert_eq!(reverted.revert_log.len(), 1);
    let entry = &reverted.revert_log[0];
    assert_eq!(entry.step_name, "revert:journaled");
    assert_eq!(entry.status, StepStatus::Completed);
    assert_eq!(entry.artifacts.len(), 1);
    assert_eq!(entry.artifacts[0].artifact_type, ArtifactType::FileCreate);
    assert_eq!(entry.artifacts[0].status, ArtifactStatus::Created);

    let stored = artifacts.load_artifacts(job.id).await.unwrap();
    assert!(stored.iter()
                  .any(|a| a.step_name == "revert:journaled" && a.status == ArtifactStatus::Created));
}
