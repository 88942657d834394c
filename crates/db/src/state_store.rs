//! Two-tier conversation state: the repository is the source of truth, the
//! cache only saves latency.
//!
//! Every read-modify-write runs under a per-conversation async mutex. The lock
//! table lives in this process only; cross-process exactly-once is handled by
//! the idempotency ledger, not here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, warn};

use tutorbot_core::domain::conversation::{merge_into, ConversationState, Stage, TurnUpdate};
use tutorbot_core::domain::message::ConversationId;

use crate::cache::StateCache;
use crate::repositories::{ConversationRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("durable state write failed: {0}")]
    Durable(#[from] RepositoryError),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, id: &ConversationId)
        -> Result<Option<ConversationState>, StateStoreError>;

    async fn save(&self, state: &ConversationState) -> Result<(), StateStoreError>;

    /// Writes the new stage durably and drops the cached copy.
    async fn update_stage(&self, id: &ConversationId, stage: Stage)
        -> Result<(), StateStoreError>;

    /// Merges `patch` into the context; existing keys not in the patch survive.
    async fn append_context(
        &self,
        id: &ConversationId,
        patch: Map<String, Value>,
    ) -> Result<(), StateStoreError>;

    /// Applies one processed message: merges both patches, bumps the message
    /// count and returns the stored result. Creates the conversation if needed.
    async fn apply_turn(
        &self,
        id: &ConversationId,
        update: TurnUpdate,
    ) -> Result<ConversationState, StateStoreError>;
}

type LockTable = DashMap<ConversationId, Arc<Mutex<()>>>;

/// Held conversation lock. Dropping it removes the table entry once no other
/// task holds or waits on the same mutex.
struct ConversationLock<'a> {
    locks: &'a LockTable,
    id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct TieredStateStore {
    durable: Arc<dyn ConversationRepository>,
    cache: Arc<dyn StateCache>,
    locks: LockTable,
}

impl TieredStateStore {
    pub fn new(durable: Arc<dyn ConversationRepository>, cache: Arc<dyn StateCache>) -> Self {
        Self { durable, cache, locks: DashMap::new() }
    }

    async fn lock(&self, id: &ConversationId) -> ConversationLock<'_> {
        let mutex = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        ConversationLock { locks: &self.locks, id: id.clone(), guard: Some(guard) }
    }

    /// Load-modify-store against the durable tier while holding the
    /// conversation's lock, then refresh or drop the cache entry.
    async fn mutate<F>(
        &self,
        id: &ConversationId,
        invalidate: bool,
        change: F,
    ) -> Result<ConversationState, StateStoreError>
    where
        F: FnOnce(ConversationState) -> ConversationState + Send,
    {
        let _lock = self.lock(id).await;

        let now = Utc::now();
        let current = self
            .durable
            .find(id)
            .await
            .map_err(|error| self.durable_failure(id, "read", error))?
            .unwrap_or_else(|| ConversationState::new(id.clone(), now));

        let next = change(current);
        self.durable.save(&next).await.map_err(|error| self.durable_failure(id, "write", error))?;

        if invalidate {
            self.invalidate_cache(id).await;
        } else {
            self.populate_cache(&next).await;
        }

        Ok(next)
    }

    async fn populate_cache(&self, state: &ConversationState) {
        if let Err(error) = self.cache.put(state).await {
            warn!(
                event_name = "state.cache.write_failed",
                conversation_id = %state.conversation_id,
                error = %error,
                "cache write failed; continuing with durable state"
            );
        }
    }

    async fn invalidate_cache(&self, id: &ConversationId) {
        if let Err(error) = self.cache.invalidate(id).await {
            warn!(
                event_name = "state.cache.invalidate_failed",
                conversation_id = %id,
                error = %error,
                "cache invalidation failed; entry will expire by ttl"
            );
        }
    }

    fn durable_failure(
        &self,
        id: &ConversationId,
        operation: &'static str,
        source: RepositoryError,
    ) -> StateStoreError {
        error!(
            event_name = "state.durable.failed",
            conversation_id = %id,
            operation,
            error = %source,
            "durable state store failure"
        );
        StateStoreError::Durable(source)
    }
}

#[async_trait]
impl StateStore for TieredStateStore {
    async fn get(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>, StateStoreError> {
        match self.cache.get(id).await {
            Ok(Some(state)) => return Ok(Some(state)),
            Ok(None) => {}
            Err(error) => {
                warn!(
                    event_name = "state.cache.read_failed",
                    conversation_id = %id,
                    error = %error,
                    "cache read failed; falling back to durable store"
                );
            }
        }

        // Filling under the lock keeps a slow read from reviving an entry that
        // update_stage has just invalidated.
        let _lock = self.lock(id).await;
        let found =
            self.durable.find(id).await.map_err(|error| self.durable_failure(id, "read", error))?;
        if let Some(state) = &found {
            self.populate_cache(state).await;
        }
        Ok(found)
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StateStoreError> {
        let id = &state.conversation_id;
        let _lock = self.lock(id).await;

        self.durable.save(state).await.map_err(|error| self.durable_failure(id, "write", error))?;
        self.populate_cache(state).await;
        Ok(())
    }

    async fn update_stage(
        &self,
        id: &ConversationId,
        stage: Stage,
    ) -> Result<(), StateStoreError> {
        self.mutate(id, true, |state| state.with_stage(stage, Utc::now())).await?;
        Ok(())
    }

    async fn append_context(
        &self,
        id: &ConversationId,
        patch: Map<String, Value>,
    ) -> Result<(), StateStoreError> {
        self.mutate(id, false, move |mut state| {
            merge_into(&mut state.context, &patch);
            state.updated_at = Utc::now();
            state
        })
        .await?;
        Ok(())
    }

    async fn apply_turn(
        &self,
        id: &ConversationId,
        update: TurnUpdate,
    ) -> Result<ConversationState, StateStoreError> {
        self.mutate(id, false, move |state| state.with_turn_applied(&update, Utc::now())).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Map, Value};

    use tutorbot_core::domain::conversation::{ConversationState, Stage, TurnUpdate};
    use tutorbot_core::domain::message::ConversationId;

    use super::{StateStore, StateStoreError, TieredStateStore};
    use crate::cache::{CacheError, DisabledStateCache, InMemoryStateCache, StateCache};
    use crate::repositories::{
        ConversationRepository, InMemoryConversationRepository, RepositoryError,
        SqlConversationRepository,
    };
    use crate::{connect_with_settings, migrations};

    fn conversation(id: &str) -> ConversationId {
        ConversationId(id.to_string())
    }

    fn patch(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    fn store_with(
        durable: Arc<dyn ConversationRepository>,
        cache: Arc<dyn StateCache>,
    ) -> TieredStateStore {
        TieredStateStore::new(durable, cache)
    }

    /// Repository whose reads yield so concurrent writers interleave.
    #[derive(Default)]
    struct SlowRepository {
        inner: InMemoryConversationRepository,
    }

    #[async_trait]
    impl ConversationRepository for SlowRepository {
        async fn find(
            &self,
            id: &ConversationId,
        ) -> Result<Option<ConversationState>, RepositoryError> {
            let found = self.inner.find(id).await;
            tokio::time::sleep(Duration::from_millis(2)).await;
            found
        }

        async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
            self.inner.save(state).await
        }
    }

    /// Repository whose first read stalls long enough for a writer to run.
    #[derive(Default)]
    struct StallingFirstRead {
        inner: InMemoryConversationRepository,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl ConversationRepository for StallingFirstRead {
        async fn find(
            &self,
            id: &ConversationId,
        ) -> Result<Option<ConversationState>, RepositoryError> {
            let found = self.inner.find(id).await;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            found
        }

        async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
            self.inner.save(state).await
        }
    }

    struct FailingRepository;

    #[async_trait]
    impl ConversationRepository for FailingRepository {
        async fn find(
            &self,
            _id: &ConversationId,
        ) -> Result<Option<ConversationState>, RepositoryError> {
            Ok(None)
        }

        async fn save(&self, _state: &ConversationState) -> Result<(), RepositoryError> {
            Err(RepositoryError::Unavailable("disk full".to_string()))
        }
    }

    #[derive(Default)]
    struct BrokenCache {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StateCache for BrokenCache {
        async fn get(&self, _id: &ConversationId) -> Result<Option<ConversationState>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn put(&self, _state: &ConversationState) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn invalidate(&self, _id: &ConversationId) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn concurrent_append_context_loses_no_keys() {
        let store = Arc::new(store_with(
            Arc::new(SlowRepository::default()),
            Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64)),
        ));
        let id = conversation("wa:5511");

        let mut handles = Vec::new();
        for index in 0..16 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.append_context(&id, patch(&format!("key_{index}"), json!(index))).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("append");
        }

        let state = store.get(&id).await.expect("get").expect("state exists");
        for index in 0..16 {
            assert_eq!(state.context.get(&format!("key_{index}")), Some(&json!(index)));
        }
    }

    #[tokio::test]
    async fn update_stage_invalidates_the_cached_copy() {
        let durable = Arc::new(InMemoryConversationRepository::default());
        let cache = Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64));
        let store = store_with(durable, cache.clone());
        let id = conversation("wa:1");

        store.apply_turn(&id, TurnUpdate::default()).await.expect("create");
        assert!(cache.get(&id).await.expect("cache read").is_some());

        store.update_stage(&id, Stage::Qualification).await.expect("update stage");

        assert_eq!(cache.get(&id).await.expect("cache read"), None);
        let read_back = store.get(&id).await.expect("get").expect("exists");
        assert_eq!(read_back.stage, Stage::Qualification);
        let recached = cache.get(&id).await.expect("cache read").map(|state| state.stage);
        assert_eq!(recached, Some(Stage::Qualification));
    }

    #[tokio::test]
    async fn apply_turn_initializes_merges_and_counts() {
        let store = store_with(
            Arc::new(InMemoryConversationRepository::default()),
            Arc::new(DisabledStateCache),
        );
        let id = conversation("wa:2");

        let first = store
            .apply_turn(
                &id,
                TurnUpdate {
                    context_patch: patch("last_step", json!("greeting")),
                    entities_patch: patch("student_name", json!("Ana")),
                },
            )
            .await
            .expect("first turn");
        assert_eq!(first.stage, Stage::Greeting);
        assert_eq!(first.message_count, 1);

        let second = store
            .apply_turn(
                &id,
                TurnUpdate {
                    context_patch: patch("last_step", json!("qualification")),
                    entities_patch: patch("subject", json!("matemática")),
                },
            )
            .await
            .expect("second turn");
        assert_eq!(second.message_count, 2);
        assert_eq!(second.context.get("last_step"), Some(&json!("qualification")));
        assert_eq!(second.entities.get("student_name"), Some(&json!("Ana")));
        assert_eq!(second.entities.get("subject"), Some(&json!("matemática")));
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn disabling_the_cache_does_not_change_results() {
        async fn scenario(store: &TieredStateStore) -> (Stage, Map<String, Value>, u32) {
            let id = conversation("wa:3");
            store.apply_turn(&id, TurnUpdate::default()).await.expect("turn");
            store.update_stage(&id, Stage::Qualification).await.expect("stage");
            store.append_context(&id, patch("channel", json!("whatsapp"))).await.expect("append");
            store.apply_turn(&id, TurnUpdate::default()).await.expect("turn");
            let state = store.get(&id).await.expect("get").expect("exists");
            (state.stage, state.context, state.message_count)
        }

        let cached = store_with(
            Arc::new(InMemoryConversationRepository::default()),
            Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64)),
        );
        let uncached = store_with(
            Arc::new(InMemoryConversationRepository::default()),
            Arc::new(DisabledStateCache),
        );

        assert_eq!(scenario(&cached).await, scenario(&uncached).await);
    }

    #[tokio::test]
    async fn cache_failures_are_never_fatal() {
        let cache = Arc::new(BrokenCache::default());
        let store = store_with(Arc::new(InMemoryConversationRepository::default()), cache.clone());
        let id = conversation("wa:4");

        store.apply_turn(&id, TurnUpdate::default()).await.expect("turn despite cache");
        store.update_stage(&id, Stage::Information).await.expect("stage despite cache");
        let state = store.get(&id).await.expect("get despite cache").expect("exists");

        assert_eq!(state.stage, Stage::Information);
        assert!(cache.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn durable_failure_propagates_and_leaves_cache_untouched() {
        let cache = Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64));
        let store = store_with(Arc::new(FailingRepository), cache.clone());
        let id = conversation("wa:5");

        let error = store.apply_turn(&id, TurnUpdate::default()).await.expect_err("durable fails");

        assert!(matches!(error, StateStoreError::Durable(RepositoryError::Unavailable(_))));
        assert_eq!(cache.get(&id).await.expect("cache read"), None);
    }

    #[tokio::test]
    async fn slow_cache_fill_does_not_revive_an_invalidated_stage() {
        let durable = Arc::new(StallingFirstRead::default());
        let cache = Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64));
        let id = conversation("wa:8");
        durable
            .inner
            .save(&ConversationState::new(id.clone(), Utc::now()))
            .await
            .expect("seed durable");
        let store = Arc::new(store_with(durable.clone(), cache.clone()));

        let reader = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move { store.get(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.update_stage(&id, Stage::Qualification).await.expect("update stage");
        reader.await.expect("join").expect("first read");

        let durable_stage = durable.inner.find(&id).await.expect("find").map(|s| s.stage);
        let served = store.get(&id).await.expect("get").map(|state| state.stage);
        assert_eq!(durable_stage, Some(Stage::Qualification));
        assert_eq!(served, Some(Stage::Qualification));
    }

    #[tokio::test]
    async fn lock_table_is_empty_once_operations_finish() {
        let store = Arc::new(store_with(
            Arc::new(SlowRepository::default()),
            Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64)),
        ));

        let mut handles = Vec::new();
        for index in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = conversation(&format!("wa:{}", index % 3));
                store.append_context(&id, patch("n", json!(index))).await?;
                store.update_stage(&id, Stage::Information).await?;
                store.get(&id).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("operations");
        }

        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn save_writes_durably_then_refreshes_the_cache() {
        let durable = Arc::new(InMemoryConversationRepository::default());
        let cache = Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64));
        let store = store_with(durable.clone(), cache.clone());
        let id = conversation("wa:9");

        let mut state = ConversationState::new(id.clone(), Utc::now());
        state.stage = Stage::Scheduling;
        store.save(&state).await.expect("save");

        assert_eq!(durable.find(&id).await.expect("find"), Some(state.clone()));
        assert_eq!(cache.get(&id).await.expect("cache read"), Some(state));
    }

    #[tokio::test]
    async fn failed_save_leaves_the_cached_copy_alone() {
        let cache = Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64));
        let store = store_with(Arc::new(FailingRepository), cache.clone());
        let id = conversation("wa:10");
        let cached = ConversationState::new(id.clone(), Utc::now());
        cache.put(&cached).await.expect("seed cache");

        let mut changed = cached.clone();
        changed.stage = Stage::Completed;
        let error = store.save(&changed).await.expect_err("durable fails");

        assert!(matches!(error, StateStoreError::Durable(RepositoryError::Unavailable(_))));
        assert_eq!(cache.get(&id).await.expect("cache read"), Some(cached));
    }

    #[tokio::test]
    async fn stale_cache_entry_is_replaced_after_durable_write() {
        let durable = Arc::new(InMemoryConversationRepository::default());
        let cache = Arc::new(InMemoryStateCache::new(Duration::from_secs(60), 64));
        let store = store_with(durable, cache.clone());
        let id = conversation("wa:6");

        let mut stale = ConversationState::new(id.clone(), Utc::now());
        stale.stage = Stage::Completed;
        cache.put(&stale).await.expect("seed stale cache");

        store.update_stage(&id, Stage::Scheduling).await.expect("stage");

        let read_back = store.get(&id).await.expect("get").expect("exists");
        assert_eq!(read_back.stage, Stage::Scheduling);
    }

    #[tokio::test]
    async fn works_against_the_sql_repository() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let store = store_with(
            Arc::new(SqlConversationRepository::new(pool.clone())),
            Arc::new(DisabledStateCache),
        );
        let id = conversation("wa:7");

        store.append_context(&id, patch("a", json!(1))).await.expect("append a");
        store.append_context(&id, patch("b", json!(2))).await.expect("append b");
        store.update_stage(&id, Stage::Qualification).await.expect("stage");

        let state = store.get(&id).await.expect("get").expect("exists");
        assert_eq!(state.stage, Stage::Qualification);
        assert_eq!(state.context.get("a"), Some(&json!(1)));
        assert_eq!(state.context.get("b"), Some(&json!(2)));
        pool.close().await;
    }
}
