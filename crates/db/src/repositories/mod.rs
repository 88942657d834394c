use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use tutorbot_core::domain::conversation::ConversationState;
use tutorbot_core::domain::message::{ConversationId, IdempotencyKey};
use tutorbot_core::domain::processing::ProcessedRecord;

pub mod conversation;
pub mod ledger;
pub mod memory;

pub use conversation::SqlConversationRepository;
pub use ledger::SqlIdempotencyLedger;
pub use memory::{InMemoryConversationRepository, InMemoryIdempotencyLedger};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of [`ConversationState`]; the source of truth behind any cache.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>, RepositoryError>;

    /// Insert or replace.
    async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError>;
}

/// Records which inbound messages were already handled.
///
/// `mark_processed` is an atomic create-if-absent; the returned flag is `false`
/// when another writer got there first, in which case nothing is overwritten.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn has_processed(&self, key: &IdempotencyKey) -> Result<bool, RepositoryError>;

    async fn mark_processed(&self, record: &ProcessedRecord) -> Result<bool, RepositoryError>;

    async fn get_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<ProcessedRecord>, RepositoryError>;

    /// Deletes records processed strictly before `cutoff`, returning how many went.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Fixed-width RFC 3339 so stored timestamps order lexicographically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
