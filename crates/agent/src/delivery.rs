use std::sync::Arc;

use tracing::{error, info, warn};

use tutorbot_core::backoff::Backoff;
use tutorbot_core::config::DeliveryConfig;
use tutorbot_core::domain::message::MessageId;
use tutorbot_core::domain::processing::{DeliveryAttempt, DeliveryReport, ProcessingResult};
use tutorbot_core::transport::{InboundEnvelope, MessageSender, OutboundMessage};

pub struct DeliveryAgent {
    sender: Arc<dyn MessageSender>,
    max_retries: u32,
    backoff: Backoff,
}

impl DeliveryAgent {
    pub fn new(sender: Arc<dyn MessageSender>, max_retries: u32, backoff: Backoff) -> Self {
        Self { sender, max_retries, backoff }
    }

    pub fn from_config(sender: Arc<dyn MessageSender>, config: &DeliveryConfig) -> Self {
        Self::new(sender, config.max_retries, config.backoff())
    }

    pub async fn deliver(
        &self,
        envelope: &InboundEnvelope,
        result: &ProcessingResult,
    ) -> DeliveryReport {
        self.deliver_with_retries(envelope, result, self.max_retries).await
    }

    /// Sends the reply to the sender of `envelope`, at most `max_retries + 1` times.
    ///
    /// Cached results are never sent again: the first processing already did.
    pub async fn deliver_with_retries(
        &self,
        envelope: &InboundEnvelope,
        result: &ProcessingResult,
        max_retries: u32,
    ) -> DeliveryReport {
        if result.cached {
            info!(
                event_name = "agent.delivery.skipped",
                correlation_id = %result.idempotency_key,
                "cached result, response already delivered"
            );
            return DeliveryReport::skipped();
        }

        let message_id = MessageId(envelope.message_id.clone());
        let outbound = OutboundMessage {
            instance: envelope.instance.clone(),
            phone: envelope.phone.clone(),
            text: result.response_text.clone(),
        };
        let mut attempts = Vec::new();

        for attempt in 0..=max_retries {
            match self.sender.send(&outbound).await {
                Ok(receipt) => {
                    attempts.push(DeliveryAttempt {
                        message_id: message_id.clone(),
                        attempt_number: attempt + 1,
                        delivered: true,
                    });
                    info!(
                        event_name = "agent.delivery.sent",
                        correlation_id = %result.idempotency_key,
                        message_id = %message_id,
                        attempts = attempt + 1,
                        status = %receipt.status,
                        "response delivered"
                    );
                    break;
                }
                Err(send_error) => {
                    attempts.push(DeliveryAttempt {
                        message_id: message_id.clone(),
                        attempt_number: attempt + 1,
                        delivered: false,
                    });
                    warn!(
                        event_name = "agent.delivery.attempt_failed",
                        correlation_id = %result.idempotency_key,
                        message_id = %message_id,
                        attempt = attempt + 1,
                        error = %send_error,
                        "send attempt failed"
                    );
                    if attempt < max_retries {
                        self.backoff.wait(attempt).await;
                    }
                }
            }
        }

        let report = DeliveryReport::from_attempts(&attempts);
        if !report.delivered {
            error!(
                event_name = "agent.delivery.exhausted",
                correlation_id = %result.idempotency_key,
                message_id = %message_id,
                attempts = report.attempts,
                "giving up on delivery after exhausting retries"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use tutorbot_core::backoff::Backoff;
    use tutorbot_core::domain::conversation::Stage;
    use tutorbot_core::domain::message::IdempotencyKey;
    use tutorbot_core::domain::processing::ProcessingResult;
    use tutorbot_core::transport::{
        InboundEnvelope, MessageSender, OutboundMessage, SendReceipt, TransportError,
    };

    use super::DeliveryAgent;

    /// Fails the first `failures` sends, then succeeds.
    struct FlakySender {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        async fn send(&self, _message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TransportError::Request("connection reset".to_string()))
            } else {
                Ok(SendReceipt { status: "PENDING".to_string(), message_id: None })
            }
        }
    }

    fn agent(sender: Arc<FlakySender>) -> DeliveryAgent {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4));
        DeliveryAgent::new(sender, 3, backoff)
    }

    fn envelope() -> InboundEnvelope {
        InboundEnvelope {
            instance: "tutorbot".to_string(),
            phone: "5511999990000".to_string(),
            message: "oi".to_string(),
            message_id: "m1".to_string(),
            timestamp: 1_700_000_000,
            from_me: false,
        }
    }

    fn result(cached: bool) -> ProcessingResult {
        ProcessingResult {
            response_text: "Olá!".to_string(),
            cached,
            stage: Stage::Qualification,
            idempotency_key: IdempotencyKey("wa:5511999990000:m1".to_string()),
        }
    }

    #[tokio::test]
    async fn cached_results_are_not_sent() {
        let sender = Arc::new(FlakySender { failures: 0, calls: AtomicU32::new(0) });

        let report = agent(sender.clone()).deliver(&envelope(), &result(true)).await;

        assert!(report.skipped);
        assert!(!report.delivered);
        assert_eq!(report.attempts, 0);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_until_the_send_succeeds() {
        let sender = Arc::new(FlakySender { failures: 2, calls: AtomicU32::new(0) });

        let report = agent(sender.clone()).deliver(&envelope(), &result(false)).await;

        assert!(report.delivered);
        assert_eq!(report.attempts, 3);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reports_failure_after_exhausting_retries() {
        let sender = Arc::new(FlakySender { failures: u32::MAX, calls: AtomicU32::new(0) });

        let report =
            agent(sender.clone()).deliver_with_retries(&envelope(), &result(false), 2).await;

        assert!(!report.delivered);
        assert!(!report.skipped);
        assert_eq!(report.attempts, 3);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }
}
