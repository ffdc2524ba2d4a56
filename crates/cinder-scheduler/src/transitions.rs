//! Persisting job state machine transitions.

use chrono::Utc;
use cinder_core::Result;
use cinder_core::events::{Event, JobStatusChangedPayload};
use cinder_core::job::{Job, JobEvent, Transition};
use cinder_core::ports::{EventBus, JobRepository};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fires job events, saves the job and announces the status change.
#[derive(Clone)]
pub struct JobTransitions {
    jobs: Arc<dyn JobRepository>,
    events: Arc<dyn EventBus>,
}

impl JobTransitions {
    pub fn new(jobs: Arc<dyn JobRepository>, events: Arc<dyn EventBus>) -> Self {
        Self { jobs, events }
    }

    /// Apply `event` to `job` and persist it.
    ///
    /// `job` must carry the lock version it was read with; a concurrent
    /// update surfaces as `Error::StaleObject` and nothing is published.
    pub async fn apply(&self, job: &Job, event: JobEvent) -> Result<(Job, Transition)> {
        let now = Utc::now();
        let mut updated = job.clone();
        let transition = updated.fire(event, now)?;
        let updated = self.jobs.update(&updated).await?;

        debug!(
            job_id = %updated.id,
            job = %updated.name,
            from = %transition.from,
            to = %transition.to,
            "Job transitioned"
        );

        publish(
            self.events.as_ref(),
            Event::JobStatusChanged(JobStatusChangedPayload {
                job_id: updated.id,
                pipeline_id: updated.pipeline_id,
                name: updated.name.clone(),
                from: transition.from,
                to: transition.to,
                failure_reason: updated.failure_reason,
                runner_id: updated.runner_id,
                changed_at: now,
            }),
        )
        .await;

        Ok((updated, transition))
    }
}

/// Publish an event for a change that is already committed.
///
/// The change stands even if the bus is unavailable, so failures are only logged.
pub(crate) async fn publish(events: &dyn EventBus, event: Event) {
    let subject = event.subject();
    if let Err(e) = events.publish(event).await {
        warn!(subject = %subject, error = %e, "Failed to publish event");
    }
}
