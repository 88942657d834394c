use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use tutorbot_core::domain::conversation::ConversationState;
use tutorbot_core::domain::message::{ConversationId, IdempotencyKey};
use tutorbot_core::domain::processing::ProcessedRecord;

use super::{ConversationRepository, IdempotencyLedger, RepositoryError};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    states: RwLock<HashMap<String, ConversationState>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(id.as_str()).cloned())
    }

    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
        let mut states = self.states.write().await;
        states.insert(state.conversation_id.0.clone(), state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryIdempotencyLedger {
    records: RwLock<HashMap<String, ProcessedRecord>>,
}

impl InMemoryIdempotencyLedger {
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait::async_trait]
impl IdempotencyLedger for InMemoryIdempotencyLedger {
    async fn has_processed(&self, key: &IdempotencyKey) -> Result<bool, RepositoryError> {
        Ok(self.records.read().await.contains_key(key.as_str()))
    }

    async fn mark_processed(&self, record: &ProcessedRecord) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        match records.entry(record.idempotency_key.0.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ProcessedRecord>, RepositoryError> {
        Ok(self.records.read().await.get(key.as_str()).cloned())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.processed_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
