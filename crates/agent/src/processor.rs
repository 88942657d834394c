//! Exactly-once handling of one inbound message.
//!
//! The ledger check at the top short-circuits redeliveries; the atomic
//! `mark_processed` at the bottom resolves two processors racing on the same
//! key, in which case the loser hands back the winner's stored response.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use tutorbot_core::domain::conversation::{ConversationState, TurnUpdate};
use tutorbot_core::domain::message::{IdempotencyKey, InboundMessage};
use tutorbot_core::domain::processing::{ProcessedRecord, ProcessingResult};
use tutorbot_core::errors::ApplicationError;
use tutorbot_core::flows::engine::{FlowEngine, StepInput, TutoringFlow};
use tutorbot_core::flows::router::{Router, StepName};
use tutorbot_db::repositories::{IdempotencyLedger, RepositoryError};
use tutorbot_db::state_store::{StateStore, StateStoreError};

use crate::calendar::{requested_window, GuardedCalendar};
use crate::classifier::{ClassifierClient, TurnContext};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    State(#[from] StateStoreError),
    #[error("idempotency ledger failure: {0}")]
    Ledger(#[from] RepositoryError),
    #[error("ledger rejected `{0}` but holds no record for it")]
    MissingRecord(String),
}

impl From<ProcessError> for ApplicationError {
    fn from(value: ProcessError) -> Self {
        Self::Persistence(value.to_string())
    }
}

pub struct IdempotentProcessor {
    ledger: Arc<dyn IdempotencyLedger>,
    store: Arc<dyn StateStore>,
    classifier: ClassifierClient,
    calendar: Arc<GuardedCalendar>,
    router: Router,
    engine: FlowEngine<TutoringFlow>,
}

impl IdempotentProcessor {
    pub fn new(
        ledger: Arc<dyn IdempotencyLedger>,
        store: Arc<dyn StateStore>,
        classifier: ClassifierClient,
        calendar: Arc<GuardedCalendar>,
    ) -> Self {
        Self {
            ledger,
            store,
            classifier,
            calendar,
            router: Router::new(),
            engine: FlowEngine::default(),
        }
    }

    pub async fn process(
        &self,
        message: &InboundMessage,
    ) -> Result<ProcessingResult, ProcessError> {
        let key = message.idempotency_key();

        if self.ledger.has_processed(&key).await? {
            // A purge can race the check; without a record the message is simply handled again.
            if let Some(record) = self.ledger.get_record(&key).await? {
                info!(
                    event_name = "agent.processor.duplicate",
                    correlation_id = %key,
                    conversation_id = %message.conversation_id,
                    "message already processed, replaying stored response"
                );
                return Ok(ProcessingResult::from_record(&record));
            }
        }

        let state = self
            .store
            .get(&message.conversation_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(message.conversation_id.clone(), Utc::now()));
        let stage_before = state.stage;

        let ctx = TurnContext::new(key.as_str());
        let classification = self.classifier.classify(&ctx, &message.text).await;
        let step = self.router.resolve(&classification);

        let availability = match step {
            StepName::Scheduling => match requested_window(&state, &classification.entities) {
                Some(window) => Some(self.calendar.check(window).await),
                None => None,
            },
            _ => None,
        };

        let outcome = self.engine.execute(
            step,
            &StepInput {
                state: &state,
                text: &message.text,
                entities: &classification.entities,
                availability: availability.as_ref(),
            },
        );
        let stage_after = outcome.next_stage;

        let mut context_patch = outcome.context_patch;
        context_patch.insert("last_intent".to_string(), json!(classification.intent.as_str()));
        self.store
            .apply_turn(
                &message.conversation_id,
                TurnUpdate { context_patch, entities_patch: classification.entities.clone() },
            )
            .await?;
        if stage_after != stage_before {
            self.store.update_stage(&message.conversation_id, stage_after).await?;
        }

        let record = ProcessedRecord {
            idempotency_key: key.clone(),
            conversation_id: message.conversation_id.clone(),
            response_text: outcome.response_text,
            stage_before,
            stage_after,
            processed_at: Utc::now(),
        };

        if !self.ledger.mark_processed(&record).await? {
            return self.replay_winner(&key).await;
        }

        info!(
            event_name = "agent.processor.processed",
            correlation_id = %key,
            conversation_id = %message.conversation_id,
            step = step.as_str(),
            intent = classification.intent.as_str(),
            stage_before = stage_before.as_str(),
            stage_after = stage_after.as_str(),
            response_len = record.response_text.chars().count(),
            "message processed"
        );

        Ok(ProcessingResult {
            response_text: record.response_text,
            cached: false,
            stage: stage_after,
            idempotency_key: key,
        })
    }

    async fn replay_winner(&self, key: &IdempotencyKey) -> Result<ProcessingResult, ProcessError> {
        let winner = self
            .ledger
            .get_record(key)
            .await?
            .ok_or_else(|| ProcessError::MissingRecord(key.to_string()))?;
        info!(
            event_name = "agent.processor.lost_race",
            correlation_id = %key,
            "concurrent processor finished first, discarding local result"
        );
        Ok(ProcessingResult::from_record(&winner))
    }
}
