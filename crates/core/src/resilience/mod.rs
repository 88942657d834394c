//! Circuit breaker, token bucket and result cache composed around one
//! quota-bound collaborator.

pub mod breaker;
pub mod cache;
pub mod rate_limit;

use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use breaker::{BreakerConfig, CallPermit, CircuitBreaker, CircuitState};
pub use cache::TtlCache;
pub use rate_limit::{RateLimitConfig, TokenBucket};

/// Where a guarded answer came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// The collaborator answered this call.
    Fresh,
    /// Served from a cache entry still within its TTL.
    Cached,
    /// Served from an expired cache entry because the call was refused or failed.
    Stale,
    /// Nothing usable was available; the caller-supplied default was used.
    Default,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Cached => "cached",
            Self::Stale => "stale",
            Self::Default => "default",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resilient<V> {
    pub value: V,
    pub source: ResultSource,
}

#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    #[error("circuit open for {collaborator}")]
    CircuitOpen { collaborator: String },
    #[error("rate limit exceeded for {collaborator}")]
    RateLimited { collaborator: String },
    #[error("upstream failure: {0}")]
    Upstream(E),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResilienceConfig {
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1_000,
        }
    }
}

pub struct ResilienceWrapper<K, V> {
    name: String,
    breaker: CircuitBreaker,
    limiter: TokenBucket,
    cache: TtlCache<K, V>,
}

impl<K, V> ResilienceWrapper<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: impl Into<String>, config: ResilienceConfig) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), config.breaker),
            limiter: TokenBucket::new(config.rate_limit),
            cache: TtlCache::new(config.cache_ttl, config.cache_max_entries),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Runs `op` behind the cache, the rate limiter and the breaker, in that order.
    ///
    /// A refused or failed call falls back to the last cached value for `key`
    /// when one exists; only without one does the error reach the caller.
    pub async fn call<F, Fut, E>(
        &self,
        key: K,
        op: F,
    ) -> Result<Resilient<V>, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::fmt::Display,
    {
        if let Some(value) = self.cache.get_fresh(&key) {
            return Ok(Resilient { value, source: ResultSource::Cached });
        }

        if !self.limiter.try_acquire() {
            debug!(
                event_name = "resilience.limiter.rejected",
                collaborator = %self.name,
                "call rejected by rate limiter"
            );
            return self
                .stale(&key)
                .ok_or_else(|| ResilienceError::RateLimited { collaborator: self.name.clone() });
        }

        let Some(permit) = self.breaker.acquire() else {
            debug!(
                event_name = "resilience.breaker.rejected",
                collaborator = %self.name,
                "call short-circuited by open breaker"
            );
            return self
                .stale(&key)
                .ok_or_else(|| ResilienceError::CircuitOpen { collaborator: self.name.clone() });
        };

        match op().await {
            Ok(value) => {
                permit.success();
                self.cache.insert(key, value.clone());
                Ok(Resilient { value, source: ResultSource::Fresh })
            }
            Err(error) => {
                permit.failure();
                warn!(
                    event_name = "resilience.call.failed",
                    collaborator = %self.name,
                    error = %error,
                    circuit_state = self.breaker.state().as_str(),
                    "guarded call failed"
                );
                self.stale(&key).ok_or(ResilienceError::Upstream(error))
            }
        }
    }

    /// Like [`call`](Self::call) but never fails: with nothing cached the
    /// supplied default is returned and tagged [`ResultSource::Default`].
    pub async fn call_or_default<F, Fut, E>(&self, key: K, default: V, op: F) -> Resilient<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::fmt::Display,
    {
        match self.call(key, op).await {
            Ok(resilient) => resilient,
            Err(error) => {
                warn!(
                    event_name = "resilience.call.defaulted",
                    collaborator = %self.name,
                    error = %error,
                    "no cached answer available, using default"
                );
                Resilient { value: default, source: ResultSource::Default }
            }
        }
    }

    fn stale(&self, key: &K) -> Option<Resilient<V>> {
        self.cache.get_stale(key).map(|value| Resilient { value, source: ResultSource::Stale })
    }
}
