//! PostgreSQL integration tests.
//!
//! Run with: `cargo test -p cinder-tests --test database_tests --features integration`

#![cfg(feature = "integration")]

use chrono::Utc;
use cinder_core::Error;
use cinder_core::ids::{ProjectId, RunnerId};
use cinder_core::job::JobStatus;
use cinder_core::pipeline::PipelineSource;
use cinder_core::resource_group::ProcessMode;
use cinder_scheduler::{Command, SchedulerConfig};
use cinder_tests::context::TestContext;
use cinder_tests::fixtures::{self, JobFixture, PipelineFixture};
use std::time::Duration;

#[tokio::test]
async fn test_pipeline_with_jobs_roundtrip() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stores = ctx.stores();

    let pipeline = PipelineFixture::new(ProjectId::new());
    let build = JobFixture::created(&pipeline, "build");
    let deploy = JobFixture::created(&pipeline, "deploy");
    stores
        .pipelines
        .create(&pipeline, &[build.clone(), deploy.clone()])
        .await
        .expect("Failed to create pipeline");

    let found = stores
        .pipelines
        .get(pipeline.id)
        .await
        .expect("Failed to get pipeline")
        .expect("Pipeline not found");
    assert_eq!(found.git_ref, "master");

    let jobs = stores
        .jobs
        .list_by_pipeline(pipeline.id)
        .await
        .expect("Failed to list jobs");
    assert_eq!(jobs.len(), 2);
}

#[tokio::test]
async fn test_job_update_detects_stale_lock() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stores = ctx.stores();

    let pipeline = PipelineFixture::new(ProjectId::new());
    let job = JobFixture::created(&pipeline, "build");
    stores.pipelines.create(&pipeline, &[job.clone()]).await.unwrap();

    let mut first = job.clone();
    first.enqueue(Utc::now()).unwrap();
    let updated = stores.jobs.update(&first).await.expect("First update");
    assert_eq!(updated.lock_version, job.lock_version + 1);

    let mut second = job.clone();
    second.cancel(Utc::now()).unwrap();
    let err = stores.jobs.update(&second).await.unwrap_err();
    assert!(matches!(err, Error::StaleObject(_)));
}

#[tokio::test]
async fn test_resource_group_acquire_and_release() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stores = ctx.stores();
    let groups = &stores.resource_groups;

    let project_id = ProjectId::new();
    let group = groups.find_or_create(project_id, "deploy-prod").await.unwrap();
    let again = groups.find_or_create(project_id, "deploy-prod").await.unwrap();
    assert_eq!(group.id, again.id);

    let pipeline = PipelineFixture::new(project_id);
    let first = JobFixture::in_group(&pipeline, "deploy", group.id);
    let second = JobFixture::in_group(&pipeline, "deploy-again", group.id);
    stores
        .pipelines
        .create(&pipeline, &[first.clone(), second.clone()])
        .await
        .unwrap();

    let entry = groups.enqueue(group.id, first.id, pipeline.id, first.created_at).await.unwrap();
    let duplicate = groups.enqueue(group.id, first.id, pipeline.id, Utc::now()).await.unwrap();
    assert_eq!(entry, duplicate);
    groups.enqueue(group.id, second.id, pipeline.id, second.created_at).await.unwrap();

    assert!(groups.try_acquire(group.id, first.id, Utc::now()).await.unwrap());
    assert!(!groups.try_acquire(group.id, second.id, Utc::now()).await.unwrap());

    let waiting: Vec<_> = groups
        .wait_list(group.id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.job_id)
        .collect();
    assert_eq!(waiting, vec![second.id]);

    assert!(!groups.release_held_by(group.id, second.id).await.unwrap());
    assert_eq!(groups.release(group.id).await.unwrap(), Some(first.id));
    assert_eq!(groups.release(group.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_lease_is_exclusive() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let leases = ctx.stores().leases;
    let ttl = Duration::from_secs(60);

    assert!(leases.acquire_lease("scheduler:sweep", "a", ttl).await.unwrap());
    assert!(!leases.acquire_lease("scheduler:sweep", "b", ttl).await.unwrap());

    leases.release_lease("scheduler:sweep", "a").await.unwrap();
    assert!(leases.acquire_lease("scheduler:sweep", "b", ttl).await.unwrap());
}

#[tokio::test]
async fn test_deploy_prod_scenario_on_postgres() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let scheduler = ctx
        .scheduler(&SchedulerConfig::default())
        .expect("Failed to build scheduler");
    let stores = scheduler.stores();

    let project_id = ProjectId::new();
    let group = stores
        .resource_groups
        .find_or_create(project_id, "deploy-prod")
        .await
        .unwrap();
    stores
        .resource_groups
        .set_process_mode(group.id, ProcessMode::OldestFirst)
        .await
        .unwrap();

    let mut deploys = Vec::new();
    for _ in 0..2 {
        let request = scheduler
            .creation()
            .execute(
                Command::new(project_id, "master", "0123456789abcdef", PipelineSource::Push)
                    .with_config(fixtures::DEPLOY_PROD),
            )
            .await
            .unwrap();
        let jobs = stores
            .jobs
            .list_by_pipeline(request.pipeline_id.unwrap())
            .await
            .unwrap();
        deploys.push(jobs[0].clone());
    }

    assert_eq!(deploys[0].status, JobStatus::Running);
    assert_eq!(deploys[1].status, JobStatus::WaitingForResource);

    scheduler.builds().succeed(deploys[0].id).await.unwrap();

    let second = stores.jobs.get(deploys[1].id).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Running);
    let group = stores.resource_groups.get(group.id).await.unwrap().unwrap();
    assert_eq!(group.holder, Some(second.id));
}

#[tokio::test]
async fn test_job_queries_on_postgres() {
    let ctx = TestContext::postgres_only()
        .await
        .expect("Failed to create context");
    let stores = ctx.stores();
    let now = Utc::now();

    let pipeline = PipelineFixture::new(ProjectId::new());
    let mut held = JobFixture::created(&pipeline, "build");
    held.status = JobStatus::Running;
    held.started_at = Some(now);
    held.runner_id = Some(RunnerId::new());
    let mut timed_out = JobFixture::created(&pipeline, "test");
    timed_out.status = JobStatus::Running;
    timed_out.timeout_secs = 60;
    timed_out.started_at = Some(now - chrono::Duration::minutes(5));
    timed_out.runner_id = Some(RunnerId::new());
    let mut stuck = JobFixture::created(&pipeline, "lint");
    stuck.status = JobStatus::Pending;
    stuck.queued_at = Some(now - chrono::Duration::days(2));
    stores
        .pipelines
        .create(&pipeline, &[held.clone(), timed_out.clone(), stuck.clone()])
        .await
        .unwrap();

    let runnable: Vec<_> = stores
        .jobs
        .list_runnable(10)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(runnable, vec![stuck.id]);

    let running = stores
        .jobs
        .count_running_by_project(&[pipeline.project_id])
        .await
        .unwrap();
    assert_eq!(running.get(&pipeline.project_id), Some(&2));

    let overdue = stores.jobs.list_timed_out(now, 10).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, timed_out.id);

    let stuck_jobs = stores
        .jobs
        .list_stuck_pending(now, chrono::Duration::hours(1), 10)
        .await
        .unwrap();
    assert_eq!(stuck_jobs.len(), 1);
    assert_eq!(stuck_jobs[0].id, stuck.id);
}
