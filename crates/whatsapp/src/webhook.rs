use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use tutorbot_core::transport::InboundEnvelope;

const MESSAGE_UPSERT: &str = "messages.upsert";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    Message(InboundEnvelope),
    /// Presence updates, receipts and other gateway events.
    Unsupported { event: String },
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook payload is not valid: {0}")]
    Malformed(String),
    #[error("webhook payload is missing `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    instance: String,
    data: MessageData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageData {
    key: MessageKey,
    #[serde(default)]
    message: Option<MessageBody>,
    #[serde(default)]
    message_timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageKey {
    remote_jid: String,
    #[serde(default)]
    from_me: bool,
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    #[serde(default)]
    conversation: Option<String>,
    #[serde(default)]
    extended_text_message: Option<ExtendedText>,
}

#[derive(Debug, Deserialize)]
struct ExtendedText {
    #[serde(default)]
    text: Option<String>,
}

/// Parses a webhook body. Non-text messages come back with an empty `message`,
/// which the pipeline treats as not actionable.
pub fn parse_webhook(body: &Value) -> Result<WebhookEvent, WebhookError> {
    if let Some(event) = body.get("event").and_then(Value::as_str) {
        if !is_message_upsert(event) {
            return Ok(WebhookEvent::Unsupported { event: event.to_string() });
        }
    }

    let payload = WebhookPayload::deserialize(body)
        .map_err(|error| WebhookError::Malformed(error.to_string()))?;

    if payload.data.key.remote_jid.trim().is_empty() {
        return Err(WebhookError::MissingField("data.key.remoteJid"));
    }
    if payload.data.key.id.trim().is_empty() {
        return Err(WebhookError::MissingField("data.key.id"));
    }

    let message = payload.data.message.unwrap_or_default();
    let text = message
        .conversation
        .or_else(|| message.extended_text_message.and_then(|extended| extended.text))
        .unwrap_or_default();

    Ok(WebhookEvent::Message(InboundEnvelope {
        instance: payload.instance,
        phone: payload.data.key.remote_jid,
        message: text,
        message_id: payload.data.key.id,
        timestamp: timestamp_secs(payload.data.message_timestamp.as_ref()),
        from_me: payload.data.key.from_me,
    }))
}

/// The gateway spells the event both `messages.upsert` and `MESSAGES_UPSERT`.
fn is_message_upsert(event: &str) -> bool {
    event.replace('_', ".").eq_ignore_ascii_case(MESSAGE_UPSERT)
}

/// Seconds since epoch; sent as a number or a numeric string. Missing means 0.
fn timestamp_secs(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number.as_i64().unwrap_or_default(),
        Some(Value::String(text)) => text.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}
