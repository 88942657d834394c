pub mod cache;
pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod state_store;

pub use cache::{CacheError, DisabledStateCache, InMemoryStateCache, StateCache};
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    ConversationRepository, IdempotencyLedger, InMemoryConversationRepository,
    InMemoryIdempotencyLedger, RepositoryError, SqlConversationRepository, SqlIdempotencyLedger,
};
pub use state_store::{StateStore, StateStoreError, TieredStateStore};
