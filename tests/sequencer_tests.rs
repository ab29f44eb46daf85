//! Sequencer behavior: full runs, ordering, the single-lease guarantee,
//! failure handling, cancellation and retry.

mod helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use helpers::{
    create_test_pool, new_job, seed_tenant, BlockingExecutor, FailingExecutor, InstantExecutor,
    RecordingExecutor,
};
use medpipe::db::{exports, jobs, reports};
use medpipe::models::{
    ExportFormat, JobStatus, StepKey, StepStatus, ALL_FORMATS, EXECUTABLE_STEPS,
};
use medpipe::pipeline::{StepExecutor, StepSequencer};
use sqlx::SqlitePool;

fn sequencer(pool: &SqlitePool, executor: Arc<dyn StepExecutor>) -> StepSequencer {
    StepSequencer::new(pool.clone(), executor, Uuid::new_v4(), 60, ALL_FORMATS.to_vec())
}

#[tokio::test]
async fn full_run_completes_job_and_produces_artifacts() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    sequencer(&pool, Arc::new(InstantExecutor))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    let loaded = jobs::load_job(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
    assert!(loaded.completed_at.is_some());
    assert!(loaded.lease_holder.is_none());

    let steps = jobs::list_steps(&pool, job.job_id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    // Every executed step carries a log line
    for step in steps.iter().filter(|s| s.step_key != StepKey::Register) {
        assert!(step.logs.is_some(), "no logs on {}", step.step_key.as_str());
        assert!(step.started_at.is_some());
        assert!(step.completed_at.is_some());
    }

    let report = reports::load_report(&pool, job.job_id).await.unwrap().unwrap();
    assert!((0..=100).contains(&report.overall_score));

    let artifacts = exports::list_artifacts(&pool, job.job_id).await.unwrap();
    assert_eq!(artifacts.len(), 3);
}

#[tokio::test]
async fn steps_execute_in_fixed_pipeline_order() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    let (recorder, order) = RecordingExecutor::new();
    sequencer(&pool, Arc::new(recorder))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(*order.lock().unwrap(), EXECUTABLE_STEPS.to_vec());
}

#[tokio::test]
async fn concurrent_invocations_yield_exactly_one_run() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    let (recorder, order) = RecordingExecutor::new();
    let recorder: Arc<dyn StepExecutor> = Arc::new(recorder);
    let seq_a = sequencer(&pool, Arc::clone(&recorder));
    let seq_b = sequencer(&pool, recorder);

    let (a, b) = tokio::join!(
        seq_a.run(job.job_id, CancellationToken::new()),
        seq_b.run(job.job_id, CancellationToken::new()),
    );
    a.unwrap();
    b.unwrap();

    // One winner ran every step once; the loser was a no-op
    assert_eq!(*order.lock().unwrap(), EXECUTABLE_STEPS.to_vec());

    let loaded = jobs::load_job(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);

    // Terminal artifacts were not duplicated either
    let artifacts = exports::list_artifacts(&pool, job.job_id).await.unwrap();
    assert_eq!(artifacts.len(), 3);
    assert!(reports::load_report(&pool, job.job_id).await.unwrap().is_some());
}

#[tokio::test]
async fn step_failure_stops_advancement_and_fails_the_job() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    sequencer(&pool, Arc::new(FailingExecutor { fail_on: StepKey::Deid }))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    let loaded = jobs::load_job(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Failed);
    let message = loaded.error_message.unwrap();
    assert!(message.contains("deid"), "unexpected message: {}", message);

    let steps = jobs::list_steps(&pool, job.job_id).await.unwrap();
    let status_of = |key: StepKey| {
        steps
            .iter()
            .find(|s| s.step_key == key)
            .map(|s| s.status)
            .unwrap()
    };
    assert_eq!(status_of(StepKey::Schema), StepStatus::Completed);
    assert_eq!(status_of(StepKey::Translate), StepStatus::Completed);
    assert_eq!(status_of(StepKey::Deid), StepStatus::Failed);
    // No silent partial progress past the failure
    assert_eq!(status_of(StepKey::Qa), StepStatus::Queued);
    assert_eq!(status_of(StepKey::Format), StepStatus::Queued);
    assert_eq!(status_of(StepKey::Report), StepStatus::Queued);

    // No terminal artifacts for a failed job
    assert!(reports::load_report(&pool, job.job_id).await.unwrap().is_none());
    assert!(exports::list_artifacts(&pool, job.job_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn cancellation_lands_at_the_in_flight_step() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    let seq = sequencer(
        &pool,
        Arc::new(BlockingExecutor {
            delay: Duration::from_secs(30),
        }),
    );
    let token = CancellationToken::new();
    let run_token = token.clone();
    let job_id = job.job_id;

    let handle = tokio::spawn(async move { seq.run(job_id, run_token).await });

    // Let the first step start, then cancel mid-step
    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    handle.await.unwrap().unwrap();

    let loaded = jobs::load_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Cancelled);

    let steps = jobs::list_steps(&pool, job_id).await.unwrap();
    let schema = steps
        .iter()
        .find(|s| s.step_key == StepKey::Schema)
        .unwrap();
    assert_eq!(schema.status, StepStatus::Cancelled);
    // Later steps were never touched
    assert!(steps
        .iter()
        .filter(|s| s.position > schema.position)
        .all(|s| s.status == StepStatus::Queued));
}

#[tokio::test]
async fn persisted_cancel_flag_stops_a_sequencer_at_the_boundary() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    // Flag lands before the sequencer starts, as if raised by another process
    jobs::request_cancel(&pool, job.job_id).await.unwrap();

    sequencer(&pool, Arc::new(InstantExecutor))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    let loaded = jobs::load_job(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Cancelled);
    let steps = jobs::list_steps(&pool, job.job_id).await.unwrap();
    assert!(steps
        .iter()
        .filter(|s| s.step_key != StepKey::Register)
        .all(|s| s.status == StepStatus::Queued));
}

#[tokio::test]
async fn retry_resumes_from_first_non_completed_step() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    sequencer(&pool, Arc::new(FailingExecutor { fail_on: StepKey::Qa }))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        jobs::load_job(&pool, job.job_id).await.unwrap().unwrap().status,
        JobStatus::Failed
    );

    jobs::reset_job_for_retry(&pool, job.job_id).await.unwrap();
    jobs::reset_failed_steps(&pool, job.job_id).await.unwrap();

    // Retry only re-executes the steps that hadn't completed
    let (recorder, order) = RecordingExecutor::new();
    sequencer(&pool, Arc::new(recorder))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        vec![StepKey::Qa, StepKey::Format, StepKey::Report]
    );

    let loaded = jobs::load_job(&pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
    assert!(loaded.error_message.is_none());
}

#[tokio::test]
async fn late_step_reset_does_not_disturb_a_running_retry() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    // First run fails at the first executable step
    sequencer(&pool, Arc::new(FailingExecutor { fail_on: StepKey::Schema }))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    // One retry wins the re-queue and starts executing
    assert!(jobs::reset_job_for_retry(&pool, job.job_id).await.unwrap());
    jobs::reset_failed_steps(&pool, job.job_id).await.unwrap();

    let seq = sequencer(
        &pool,
        Arc::new(BlockingExecutor {
            delay: Duration::from_millis(200),
        }),
    );
    let job_id = job.job_id;
    let handle = tokio::spawn(async move { seq.run(job_id, CancellationToken::new()).await });

    // A duplicate retry loses the job re-queue but still fires its step
    // reset while the winner's step is in flight
    tokio::time::sleep(Duration::from_millis(100)).await;
    let schema = jobs::load_step(&pool, job_id, StepKey::Schema)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schema.status, StepStatus::Running);
    assert!(!jobs::reset_job_for_retry(&pool, job_id).await.unwrap());
    jobs::reset_failed_steps(&pool, job_id).await.unwrap();

    // The in-flight step was untouched and the run finishes cleanly
    handle.await.unwrap().unwrap();
    let loaded = jobs::load_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, JobStatus::Completed);
    let steps = jobs::list_steps(&pool, job_id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn duplicate_artifact_production_is_ignored() {
    let (_dir, pool) = create_test_pool().await;
    let tenant = seed_tenant(&pool).await;
    let job = jobs::create_job_with_steps(&pool, &new_job(&tenant))
        .await
        .unwrap();

    sequencer(&pool, Arc::new(InstantExecutor))
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    let loaded = jobs::load_job(&pool, job.job_id).await.unwrap().unwrap();
    let first = exports::list_artifacts(&pool, job.job_id).await.unwrap();

    // A second trigger must not create duplicates
    medpipe::pipeline::artifacts::produce_terminal_artifacts(
        &pool,
        &loaded,
        &[ExportFormat::Coco, ExportFormat::Yolo, ExportFormat::Jsonl],
    )
    .await
    .unwrap();

    let second = exports::list_artifacts(&pool, job.job_id).await.unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.artifact_id, b.artifact_id);
        assert_eq!(a.filename, b.filename);
    }
}
