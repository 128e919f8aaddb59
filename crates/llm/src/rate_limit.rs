//! Provider Rate Limiting
//!
//! A token bucket per workspace, shared by every analysis loop of that
//! workspace. Waiters queue on a fair async mutex, so tokens are handed out
//! in request order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for provider rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum burst size.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Tokens added per second.
    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,
}

/// Slowest accepted refill rate: one token every ~17 minutes.
const MIN_REFILL_PER_SECOND: f64 = 1e-3;

fn default_capacity() -> u32 {
    10
}

fn default_refill_per_second() -> f64 {
    1.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_second: default_refill_per_second(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("rate_limit.capacity must be at least 1".to_string());
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second < MIN_REFILL_PER_SECOND {
            return Err(format!(
                "rate_limit.refill_per_second must be a finite number of at least {}",
                MIN_REFILL_PER_SECOND
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// FIFO-fair token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        Self {
            capacity,
            refill_per_second: config.refill_per_second.max(MIN_REFILL_PER_SECOND),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
    }

    /// Wait until a token is available and take it.
    ///
    /// The lock is held while sleeping so later callers cannot overtake.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            self.refill(&mut state);
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }
            let missing = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(missing / self.refill_per_second);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit: waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token without waiting. Fails when the bucket is empty or
    /// another caller is queued.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (rounded down).
    pub async fn available(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens.floor() as u32
    }
}

/// Token buckets keyed by workspace name.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    config: RateLimitConfig,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiterRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Bucket for a workspace, created on first use.
    pub fn for_workspace(&self, workspace: &str) -> Arc<TokenBucket> {
        self.buckets
            .entry(workspace.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(&self.config)))
            .clone()
    }

    /// Take one token from the workspace's bucket.
    pub async fn acquire(&self, workspace: &str) {
        self.for_workspace(workspace).acquire().await;
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
