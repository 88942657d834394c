use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::Stage;
use crate::domain::message::{ConversationId, IdempotencyKey, MessageId};

/// Durable proof that a message was handled. Created once, never overwritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub idempotency_key: IdempotencyKey,
    pub conversation_id: ConversationId,
    pub response_text: String,
    pub stage_before: Stage,
    pub stage_after: Stage,
    pub processed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub response_text: String,
    /// `true` when the response was produced by an earlier processing of the same key.
    pub cached: bool,
    pub stage: Stage,
    pub idempotency_key: IdempotencyKey,
}

impl ProcessingResult {
    pub fn from_record(record: &ProcessedRecord) -> Self {
        Self {
            response_text: record.response_text.clone(),
            cached: true,
            stage: record.stage_after,
            idempotency_key: record.idempotency_key.clone(),
        }
    }
}

/// Retry bookkeeping within a single delivery call. Not persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub message_id: MessageId,
    pub attempt_number: u32,
    pub delivered: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub attempts: u32,
    pub skipped: bool,
}

impl DeliveryReport {
    /// Nothing was sent by this call; the response went out with the first processing.
    pub fn skipped() -> Self {
        Self { delivered: false, attempts: 0, skipped: true }
    }

    pub fn from_attempts(attempts: &[DeliveryAttempt]) -> Self {
        Self {
            delivered: attempts.last().is_some_and(|attempt| attempt.delivered),
            attempts: u32::try_from(attempts.len()).unwrap_or(u32::MAX),
            skipped: false,
        }
    }
}
