use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { capacity: 10, refill_per_sec: 1.0 }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: bursts up to `capacity`, long-run average of `refill_per_sec`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    pub fn starting_at(config: RateLimitConfig, now: Instant) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec.max(0.0),
            bucket: Mutex::new(Bucket { tokens: capacity, last_refill: now }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut bucket = self.lock();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = bucket.last_refill.max(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        match self.bucket.lock() {
            Ok(bucket) => bucket,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
