//! Pipeline creation service.

use chrono::Utc;
use cinder_core::Result;
use cinder_core::events::{Event, PipelineCreationChangedPayload};
use cinder_core::pipeline::PipelineCreationRequest;
use cinder_core::ports::{CreationRequestRepository, EventBus};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::{Chain, Command, Context, Outcome};
use crate::transitions::publish;

/// Runs the creation chain for a command and tracks it with a creation request.
pub struct PipelineCreationService {
    chain: Chain,
    requests: Arc<dyn CreationRequestRepository>,
    events: Arc<dyn EventBus>,
}

impl PipelineCreationService {
    pub fn new(
        chain: Chain,
        requests: Arc<dyn CreationRequestRepository>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            chain,
            requests,
            events,
        }
    }

    /// Create a pipeline.
    ///
    /// Chain halts are reported through the returned request, which ends up
    /// `succeeded` with the pipeline id or `failed` with the error message.
    pub async fn execute(&self, command: Command) -> Result<PipelineCreationRequest> {
        let mut request = PipelineCreationRequest::new(command.project_id, Utc::now());
        self.requests.create(&request).await?;
        self.announce(&request).await;

        info!(
            request_id = %request.id,
            project_id = %command.project_id,
            git_ref = %command.git_ref,
            source = command.source.as_str(),
            "Creating pipeline"
        );

        match self.chain.perform(Context::new(command)).await {
            Outcome::Completed(ctx) => {
                let pipeline = ctx.pipeline()?;
                request.succeed(pipeline.id, Utc::now());
                info!(
                    request_id = %request.id,
                    pipeline_id = %pipeline.id,
                    status = %pipeline.status,
                    "Pipeline created"
                );
            }
            Outcome::Halted { context, reason } => {
                if context.persisted {
                    request.pipeline_id = context.pipeline.as_ref().map(|p| p.id);
                }
                request.fail(reason.message, Utc::now());
                warn!(
                    request_id = %request.id,
                    error = request.error.as_deref().unwrap_or_default(),
                    "Pipeline creation failed"
                );
            }
        }

        self.requests.update(&request).await?;
        self.announce(&request).await;
        Ok(request)
    }

    async fn announce(&self, request: &PipelineCreationRequest) {
        publish(
            self.events.as_ref(),
            Event::PipelineCreationChanged(PipelineCreationChangedPayload {
                request_id: request.id,
                project_id: request.project_id,
                status: request.status,
                error: request.error.clone(),
                pipeline_id: request.pipeline_id,
                changed_at: request.updated_at,
            }),
        )
        .await;
    }
}
