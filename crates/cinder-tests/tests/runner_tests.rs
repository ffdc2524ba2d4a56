//! Handing runnable jobs to runners, on the in-memory adapters.

use cinder_core::ids::ProjectId;
use cinder_core::job::JobStatus;
use cinder_core::pipeline::PipelineSource;
use cinder_scheduler::Command;
use cinder_tests::TestScheduler;
use cinder_tests::fixtures::{self, RunnerFixture};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_tagged_job_needs_matching_runner() {
    let t = TestScheduler::new();
    let pipeline_id = t.pipeline(fixtures::TAGGED_JOB).await;
    let queue = t.scheduler.queue();

    assert!(queue.next_runnable_job(&RunnerFixture::untagged()).await.unwrap().is_none());
    assert!(
        queue
            .next_runnable_job(&RunnerFixture::tagged(&["linux"]))
            .await
            .unwrap()
            .is_none()
    );

    let runner = RunnerFixture::tagged(&["linux", "docker"]);
    let job = queue.next_runnable_job(&runner).await.unwrap().unwrap();

    assert_eq!(job.pipeline_id, pipeline_id);
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.runner_id, Some(runner.id));
}

#[tokio::test]
async fn test_pickup_marks_pipeline_running() {
    let t = TestScheduler::new();
    let pipeline_id = t.pipeline(fixtures::BUILD_ONLY).await;

    t.scheduler
        .queue()
        .next_runnable_job(&RunnerFixture::untagged())
        .await
        .unwrap()
        .unwrap();

    let pipeline = t.stores().pipelines.get(pipeline_id).await.unwrap().unwrap();
    assert_eq!(pipeline.status, JobStatus::Running);
}

#[tokio::test]
async fn test_protected_runner_only_takes_protected_jobs() {
    let t = TestScheduler::new();
    t.pipeline(fixtures::BUILD_ONLY).await;
    let runner = RunnerFixture::protected_only();

    assert!(t.scheduler.queue().next_runnable_job(&runner).await.unwrap().is_none());

    let request = t
        .execute(
            Command::new(t.project_id, "main", "0123456789abcdef", PipelineSource::Push)
                .with_config(fixtures::BUILD_ONLY)
                .protected(true),
        )
        .await;
    let job = t.scheduler.queue().next_runnable_job(&runner).await.unwrap().unwrap();
    assert_eq!(Some(job.pipeline_id), request.pipeline_id);
}

#[tokio::test]
async fn test_waiting_job_not_handed_out() {
    let t = TestScheduler::new();
    let holder = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    t.pipeline(fixtures::DEPLOY_PROD).await;
    let runner = RunnerFixture::untagged();

    let job = t.scheduler.queue().next_runnable_job(&runner).await.unwrap().unwrap();
    assert_eq!(job.id, holder.id);
    assert_eq!(job.runner_id, Some(runner.id));

    assert!(t.scheduler.queue().next_runnable_job(&runner).await.unwrap().is_none());
}

#[tokio::test]
async fn test_fair_scheduling_prefers_idle_project() {
    let t = TestScheduler::new();
    let runner = RunnerFixture::untagged();
    let queue = t.scheduler.queue();

    t.pipeline(fixtures::BUILD_ONLY).await;
    let busy_second = t.pipeline(fixtures::BUILD_ONLY).await;
    let first = queue.next_runnable_job(&runner).await.unwrap().unwrap();
    assert_eq!(first.project_id, t.project_id);

    let idle_project = ProjectId::new();
    let request = t
        .execute(
            Command::new(idle_project, "master", "0123456789abcdef", PipelineSource::Push)
                .with_config(fixtures::BUILD_ONLY),
        )
        .await;

    let next = queue.next_runnable_job(&runner).await.unwrap().unwrap();
    assert_eq!(next.project_id, idle_project);
    assert_eq!(Some(next.pipeline_id), request.pipeline_id);

    let last = queue.next_runnable_job(&runner).await.unwrap().unwrap();
    assert_eq!(last.pipeline_id, busy_second);
}
