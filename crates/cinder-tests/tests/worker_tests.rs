//! Scheduler worker sweeps, on the in-memory adapters.

use chrono::{Duration, Utc};
use cinder_core::job::{FailureReason, JobStatus};
use cinder_scheduler::worker::SWEEP_LEASE_KEY;
use cinder_scheduler::{SchedulerConfig, Stores, SweepReport};
use cinder_tests::fixtures;
use cinder_tests::{FailingJobRepository, TestScheduler};
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test]
async fn test_sweep_isolates_failing_promotion() {
    let mut stores = Stores::in_memory();
    let jobs = Arc::new(FailingJobRepository::new(stores.jobs.clone()));
    stores.jobs = jobs.clone();
    let t = TestScheduler::build(stores, SchedulerConfig::default());

    let mut waiters = Vec::new();
    for key in ["alpha", "beta", "gamma"] {
        t.pipeline(&fixtures::deploy_to(key)).await;
        let waiter = t.job(t.pipeline(&fixtures::deploy_to(key)).await, "deploy").await;
        assert_eq!(waiter.status, JobStatus::WaitingForResource);
        waiters.push(waiter);
    }

    // Free every group behind the scheduler's back so only the sweep hands them on.
    for key in ["alpha", "beta", "gamma"] {
        let group = t
            .stores()
            .resource_groups
            .find_or_create(t.project_id, key)
            .await
            .unwrap();
        t.stores().resource_groups.release(group.id).await.unwrap();
    }
    jobs.fail_for(waiters[0].id);

    let report = t.scheduler.worker().perform().await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            promoted: 2,
            errors: 1,
            ..Default::default()
        }
    );
    assert_eq!(t.reload(waiters[0].id).await.status, JobStatus::WaitingForResource);
    assert_eq!(t.holder("alpha").await, None);
    assert_eq!(t.wait_list("alpha").await, vec![waiters[0].id]);
    assert_eq!(t.holder("beta").await, Some(waiters[1].id));
    assert_eq!(t.holder("gamma").await, Some(waiters[2].id));
}

#[tokio::test]
async fn test_stuck_pending_job_dropped() {
    let t = TestScheduler::new();
    let pipeline_id = t.pipeline(fixtures::BUILD_TEST_DEPLOY).await;

    let mut build = t.job(pipeline_id, "build").await;
    build.queued_at = Some(Utc::now() - Duration::hours(25));
    t.stores().jobs.update(&build).await.unwrap();

    let report = t.scheduler.worker().perform().await.unwrap();

    assert_eq!(report.dropped, 1);
    let build = t.reload(build.id).await;
    assert_eq!(build.status, JobStatus::Failed);
    assert_eq!(build.failure_reason, Some(FailureReason::StuckOrTimeoutFailure));
    assert_eq!(t.job(pipeline_id, "deploy").await.status, JobStatus::Skipped);
    assert!(t.wait_list("deploy-prod").await.is_empty());
}

#[tokio::test]
async fn test_timed_out_holder_dropped_and_resource_passed_on() {
    let t = TestScheduler::new();
    let mut holder = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;
    let waiter = t.job(t.pipeline(fixtures::DEPLOY_PROD).await, "deploy").await;

    holder.started_at = Some(Utc::now() - Duration::hours(2));
    t.stores().jobs.update(&holder).await.unwrap();

    let report = t.scheduler.worker().perform().await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(
        t.reload(holder.id).await.failure_reason,
        Some(FailureReason::StuckOrTimeoutFailure)
    );
    assert_eq!(t.holder("deploy-prod").await, Some(waiter.id));
}

#[tokio::test]
async fn test_lease_prevents_concurrent_sweeps() {
    let t = TestScheduler::new();
    let leases = &t.stores().leases;

    assert!(
        leases
            .acquire_lease(SWEEP_LEASE_KEY, "other-worker", std::time::Duration::from_secs(60))
            .await
            .unwrap()
    );
    let report = t.scheduler.worker().perform().await.unwrap();
    assert!(report.skipped);

    leases.release_lease(SWEEP_LEASE_KEY, "other-worker").await.unwrap();
    let report = t.scheduler.worker().perform().await.unwrap();
    assert!(!report.skipped);
}
