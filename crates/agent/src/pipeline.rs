use std::sync::Arc;

use tracing::debug;

use tutorbot_core::domain::processing::{DeliveryReport, ProcessingResult};
use tutorbot_core::transport::InboundEnvelope;

use crate::delivery::DeliveryAgent;
use crate::processor::{IdempotentProcessor, ProcessError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Own messages and blank texts never reach the processor.
    Ignored,
    Handled { result: ProcessingResult, delivery: DeliveryReport },
}

/// One inbound transport message: process exactly once, then deliver.
pub struct MessagePipeline {
    processor: Arc<IdempotentProcessor>,
    delivery: Arc<DeliveryAgent>,
}

impl MessagePipeline {
    pub fn new(processor: Arc<IdempotentProcessor>, delivery: Arc<DeliveryAgent>) -> Self {
        Self { processor, delivery }
    }

    pub async fn handle(
        &self,
        envelope: &InboundEnvelope,
    ) -> Result<PipelineOutcome, ProcessError> {
        if !envelope.is_actionable() {
            debug!(
                event_name = "agent.pipeline.ignored",
                message_id = %envelope.message_id,
                from_me = envelope.from_me,
                "envelope is not actionable"
            );
            return Ok(PipelineOutcome::Ignored);
        }

        let message = envelope.to_inbound();
        let result = self.processor.process(&message).await?;
        let delivery = self.delivery.deliver(envelope, &result).await;
        Ok(PipelineOutcome::Handled { result, delivery })
    }
}
