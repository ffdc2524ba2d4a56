//! Resource group scenarios across pipelines, on the in-memory adapters.

use cinder_core::job::JobStatus;
use cinder_core::resource_group::ProcessMode;
use cinder_tests::TestScheduler;
use cinder_tests::fixtures::{self, RunnerFixture};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_deploy_prod_oldest_first() {
    let t = TestScheduler::new();
    t.group("deploy-prod", ProcessMode::OldestFirst).await;

    let first = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    let second_pipeline = t.pipeline(fixtures::DEPLOY_PROD).await;
    let second = t.job(second_pipeline, "deploy").await;

    assert_eq!(first.status, JobStatus::Running);
    assert_eq!(second.status, JobStatus::WaitingForResource);
    assert_eq!(t.holder("deploy-prod").await, Some(first.id));

    t.scheduler.builds().succeed(first.id).await.unwrap();

    assert_eq!(t.reload(second.id).await.status, JobStatus::Running);
    assert_eq!(t.holder("deploy-prod").await, Some(second.id));
    assert!(t.wait_list("deploy-prod").await.is_empty());

    let pipeline = t
        .stores()
        .pipelines
        .get(second_pipeline)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pipeline.status, JobStatus::Running);
}

#[tokio::test]
async fn test_newest_first_grants_latest_waiter() {
    let t = TestScheduler::new();
    t.group("deploy-prod", ProcessMode::NewestFirst).await;

    let holder = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    let older = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    let newer = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;

    t.scheduler.builds().succeed(holder.id).await.unwrap();

    assert_eq!(t.holder("deploy-prod").await, Some(newer.id));
    assert_eq!(t.reload(older.id).await.status, JobStatus::WaitingForResource);
}

#[tokio::test]
async fn test_oldest_first_waits_for_upcoming_job() {
    let t = TestScheduler::new();
    t.group("deploy-prod", ProcessMode::OldestFirst).await;
    let runner = RunnerFixture::untagged();

    let staged = t.pipeline(fixtures::BUILD_TEST_DEPLOY).await;
    let hotfix = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;

    // The staged deploy registered first and still blocks the lane.
    assert_eq!(hotfix.status, JobStatus::WaitingForResource);
    assert_eq!(t.holder("deploy-prod").await, None);

    for name in ["build", "test"] {
        let job = t
            .scheduler
            .queue()
            .next_runnable_job(&runner)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.name, name);
        t.scheduler.builds().succeed(job.id).await.unwrap();
    }

    let deploy = t.job(staged, "deploy").await;
    assert_eq!(deploy.status, JobStatus::Running);
    assert_eq!(t.holder("deploy-prod").await, Some(deploy.id));
    assert_eq!(t.wait_list("deploy-prod").await, vec![hotfix.id]);
}

#[tokio::test]
async fn test_manual_job_does_not_hold_lane() {
    let t = TestScheduler::new();
    t.group("deploy-prod", ProcessMode::OldestFirst).await;

    let first = t.pipeline(fixtures::DEPLOY_WITH_ROLLBACK).await;
    let deploy = t.job(first, "deploy").await;
    assert_eq!(deploy.status, JobStatus::Running);
    t.scheduler.builds().succeed(deploy.id).await.unwrap();

    let pipeline = t.stores().pipelines.get(first).await.unwrap().unwrap();
    assert_eq!(pipeline.status, JobStatus::Success);
    assert_eq!(t.job(first, "rollback").await.status, JobStatus::Created);

    let next = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    t.scheduler.worker().perform().await.unwrap();

    assert_eq!(t.reload(next.id).await.status, JobStatus::Running);
    assert_eq!(t.holder("deploy-prod").await, Some(next.id));
    assert!(t.wait_list("deploy-prod").await.is_empty());
}

#[tokio::test]
async fn test_canceled_waiting_job_never_runs() {
    let t = TestScheduler::new();
    t.group("deploy-prod", ProcessMode::OldestFirst).await;

    let holder = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    let canceled = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    let next = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;

    t.scheduler.builds().cancel(canceled.id).await.unwrap();
    assert_eq!(t.wait_list("deploy-prod").await, vec![next.id]);

    t.scheduler.builds().succeed(holder.id).await.unwrap();

    assert_eq!(t.holder("deploy-prod").await, Some(next.id));
    let canceled = t.reload(canceled.id).await;
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert!(canceled.started_at.is_none());
}

#[tokio::test]
async fn test_release_of_free_group_is_noop() {
    let t = TestScheduler::new();
    let group = t.group("deploy-prod", ProcessMode::Unordered).await;

    let released = t.scheduler.resource_groups().release(group.id).await.unwrap();

    assert_eq!(released, None);
    assert_eq!(t.holder("deploy-prod").await, None);
}

#[tokio::test]
async fn test_group_key_interpolated_from_ref_and_job() {
    let t = TestScheduler::new();

    let job = t.job(t.pipeline(fixtures::INTERPOLATED_GROUP).await, "test").await;

    let group = t
        .stores()
        .resource_groups
        .get(job.resource_group_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.key, "master-test");
    assert_eq!(group.holder, Some(job.id));
}

#[tokio::test]
async fn test_groups_are_independent() {
    let t = TestScheduler::new();

    let staging = t.job(t.pipeline(&fixtures::deploy_to("staging")).await, "deploy").await;
    let production = t
        .job(t.pipeline(&fixtures::deploy_to("production")).await, "deploy")
        .await;

    assert_eq!(staging.status, JobStatus::Running);
    assert_eq!(production.status, JobStatus::Running);
}
