use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use tutorbot_agent::{MessagePipeline, PipelineOutcome};
use tutorbot_core::errors::{ApplicationError, DomainError};
use tutorbot_whatsapp::{parse_webhook, WebhookEvent};

/// Counts message tasks still running so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct InFlight {
    inner: Arc<InFlightInner>,
}

#[derive(Default)]
struct InFlightInner {
    count: AtomicUsize,
    idle: Notify,
}

pub struct InFlightGuard {
    inner: Arc<InFlightInner>,
}

impl InFlight {
    pub fn start(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { inner: Arc::clone(&self.inner) }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Waits until no task is running. Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct WebhookState {
    pipeline: Arc<MessagePipeline>,
    in_flight: InFlight,
}

impl WebhookState {
    pub fn new(pipeline: Arc<MessagePipeline>, in_flight: InFlight) -> Self {
        Self { pipeline, in_flight }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook/whatsapp", post(receive)).with_state(state)
}

/// Validates and acknowledges immediately; processing and delivery run on
/// their own task.
pub async fn receive(
    State(state): State<WebhookState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let envelope = match parse_webhook(&body) {
        Ok(WebhookEvent::Message(envelope)) => envelope,
        Ok(WebhookEvent::Unsupported { event }) => {
            debug!(event_name = "server.webhook.unsupported", event = %event, "ignoring event");
            let body = json!({"status": "ignored", "reason": "unsupported_event"});
            return (StatusCode::OK, Json(body));
        }
        Err(parse_error) => {
            let interface =
                ApplicationError::from(DomainError::InvalidMessage(parse_error.to_string()))
                    .into_interface("webhook");
            warn!(
                event_name = "server.webhook.rejected",
                correlation_id = interface.correlation_id(),
                error = %parse_error,
                "webhook payload rejected"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "status": "rejected",
                    "error": interface.user_message(),
                    "correlation_id": interface.correlation_id(),
                })),
            );
        }
    };

    if !envelope.is_actionable() {
        return (StatusCode::OK, Json(json!({"status": "ignored", "reason": "not_actionable"})));
    }

    let correlation_id = envelope.to_inbound().idempotency_key().to_string();
    let guard = state.in_flight.start();
    let pipeline = Arc::clone(&state.pipeline);
    let task_correlation_id = correlation_id.clone();

    tokio::spawn(async move {
        let _guard = guard;
        match pipeline.handle(&envelope).await {
            Ok(PipelineOutcome::Handled { result, delivery }) => info!(
                event_name = "server.webhook.handled",
                correlation_id = %task_correlation_id,
                cached = result.cached,
                stage = result.stage.as_str(),
                delivered = delivery.delivered,
                delivery_skipped = delivery.skipped,
                delivery_attempts = delivery.attempts,
                "message handled"
            ),
            Ok(PipelineOutcome::Ignored) => {}
            Err(process_error) => {
                let failure = ApplicationError::from(process_error);
                error!(
                    event_name = "server.webhook.processing_failed",
                    correlation_id = %task_correlation_id,
                    error = %failure,
                    "message processing failed; transport redelivery is safe"
                );
            }
        }
    });

    (StatusCode::ACCEPTED, Json(json!({"status": "accepted", "correlation_id": correlation_id})))
}
