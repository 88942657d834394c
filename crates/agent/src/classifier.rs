use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use tutorbot_core::backoff::Backoff;
use tutorbot_core::config::ClassifierConfig;
use tutorbot_core::domain::classification::ClassificationResult;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("classifier call timed out")]
    Timeout,
    #[error("classifier connection failed: {0}")]
    Connection(String),
    #[error("classifier upstream returned status {status}")]
    Upstream { status: u16 },
    #[error("classifier rejected credentials (status {status})")]
    Auth { status: u16 },
    #[error("classifier quota exhausted")]
    Quota,
    #[error("classifier returned a malformed payload: {0}")]
    Malformed(String),
    #[error("classifier endpoint is not configured")]
    NotConfigured,
}

impl ClassifierError {
    /// Timeouts, connection failures and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Upstream { status } => *status >= 500,
            Self::Auth { .. } | Self::Quota | Self::Malformed(_) | Self::NotConfigured => false,
        }
    }
}

/// Remote intent model boundary.
///
/// Returns the raw `{intent, confidence, entities, routing_hint?}` payload.
#[async_trait]
pub trait IntentModel: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<Value, ClassifierError>;
}

/// Correlation ids attached to every classifier log line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnContext {
    pub trace_id: String,
    pub turn_id: String,
}

impl TurnContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self { trace_id: trace_id.into(), turn_id: Uuid::new_v4().to_string() }
    }
}

pub struct ClassifierClient {
    model: Arc<dyn IntentModel>,
    timeout: Duration,
    retries: u32,
    backoff: Backoff,
}

impl ClassifierClient {
    pub fn new(
        model: Arc<dyn IntentModel>,
        timeout: Duration,
        retries: u32,
        backoff: Backoff,
    ) -> Self {
        Self { model, timeout, retries, backoff }
    }

    pub fn from_config(model: Arc<dyn IntentModel>, config: &ClassifierConfig) -> Self {
        Self::new(model, config.timeout(), config.retries, config.backoff())
    }

    /// Never fails: any error degrades to the synthetic fallback classification.
    pub async fn classify(&self, ctx: &TurnContext, text: &str) -> ClassificationResult {
        let started = Instant::now();
        match self.try_classify(text, started).await {
            Ok(result) => {
                info!(
                    event_name = "agent.classifier.classified",
                    trace_id = %ctx.trace_id,
                    turn_id = %ctx.turn_id,
                    intent = result.intent.as_str(),
                    confidence = result.confidence,
                    latency_ms = result.latency_ms,
                    text_len = text.chars().count(),
                    "message classified"
                );
                result
            }
            Err(error) => {
                let result = ClassificationResult::fallback(error.to_string(), elapsed_ms(started));
                warn!(
                    event_name = "agent.classifier.fallback",
                    trace_id = %ctx.trace_id,
                    turn_id = %ctx.turn_id,
                    intent = result.intent.as_str(),
                    confidence = result.confidence,
                    latency_ms = result.latency_ms,
                    text_len = text.chars().count(),
                    transient = error.is_transient(),
                    error = %error,
                    "classification failed; using fallback"
                );
                result
            }
        }
    }

    /// The tagged result before degradation; exposed for callers that want the cause.
    pub async fn try_classify(
        &self,
        text: &str,
        started: Instant,
    ) -> Result<ClassificationResult, ClassifierError> {
        let mut attempt = 0;
        loop {
            let call = self.model.classify(text);
            let outcome = match tokio::time::timeout(self.timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClassifierError::Timeout),
            };

            match outcome {
                Ok(payload) => {
                    let latency_ms = elapsed_ms(started);
                    return Ok(ClassificationResult::from_payload(&payload, latency_ms));
                }
                Err(error) if error.is_transient() && attempt < self.retries => {
                    self.backoff.wait(attempt).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// `POST {base_url}/classify` with `{"prompt": ...}`.
pub struct HttpIntentModel {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpIntentModel {
    pub fn new(client: Client, base_url: &str, api_key: Option<SecretString>) -> Self {
        Self { client, endpoint: format!("{}/classify", base_url.trim_end_matches('/')), api_key }
    }
}

#[async_trait]
impl IntentModel for HttpIntentModel {
    async fn classify(&self, prompt: &str) -> Result<Value, ClassifierError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({ "prompt": prompt }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ClassifierError::Timeout
            } else {
                ClassifierError::Connection(error.to_string())
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ClassifierError::Auth { status: status.as_u16() })
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(ClassifierError::Quota),
            _ if !status.is_success() => {
                return Err(ClassifierError::Upstream { status: status.as_u16() })
            }
            _ => {}
        }

        let body = response.text().await.map_err(|error| {
            if error.is_timeout() {
                ClassifierError::Timeout
            } else {
                ClassifierError::Connection(error.to_string())
            }
        })?;
        serde_json::from_str::<Value>(&body)
            .map_err(|error| ClassifierError::Malformed(error.to_string()))
    }
}

/// Used when no classifier endpoint is configured; every message takes the fallback step.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineIntentModel;

#[async_trait]
impl IntentModel for OfflineIntentModel {
    async fn classify(&self, _prompt: &str) -> Result<Value, ClassifierError> {
        Err(ClassifierError::NotConfigured)
    }
}
