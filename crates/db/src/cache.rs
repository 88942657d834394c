use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use tutorbot_core::config::CacheConfig;
use tutorbot_core::domain::conversation::ConversationState;
use tutorbot_core::domain::message::ConversationId;
use tutorbot_core::resilience::TtlCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Fast, possibly stale tier in front of the conversation repository.
/// Callers treat every error as a miss.
#[async_trait]
pub trait StateCache: Send + Sync {
    async fn get(&self, id: &ConversationId) -> Result<Option<ConversationState>, CacheError>;
    async fn put(&self, state: &ConversationState) -> Result<(), CacheError>;
    async fn invalidate(&self, id: &ConversationId) -> Result<(), CacheError>;
}

pub struct InMemoryStateCache {
    entries: TtlCache<ConversationId, ConversationState>,
}

impl InMemoryStateCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { entries: TtlCache::new(ttl, max_entries) }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }
}

#[async_trait]
impl StateCache for InMemoryStateCache {
    async fn get(&self, id: &ConversationId) -> Result<Option<ConversationState>, CacheError> {
        Ok(self.entries.get_fresh(id))
    }

    async fn put(&self, state: &ConversationState) -> Result<(), CacheError> {
        self.entries.insert(state.conversation_id.clone(), state.clone());
        Ok(())
    }

    async fn invalidate(&self, id: &ConversationId) -> Result<(), CacheError> {
        self.entries.remove(id);
        Ok(())
    }
}

/// Always misses. Used when `cache.enabled = false`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledStateCache;

#[async_trait]
impl StateCache for DisabledStateCache {
    async fn get(&self, _id: &ConversationId) -> Result<Option<ConversationState>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _state: &ConversationState) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate(&self, _id: &ConversationId) -> Result<(), CacheError> {
        Ok(())
    }
}
