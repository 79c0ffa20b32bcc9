//! # Rate-Limited Provider
//!
//! Wraps any `AiProvider` in a token bucket so a shared local model is not
//! flooded by concurrent questions. Time spent waiting for a token counts
//! against the caller's deadline.

use crate::{
    errors::SqlRagError,
    providers::ai::{AiProvider, Completion, DecodingParams, Prompt},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Arc<Mutex<Bucket>>,
}

impl TokenBucket {
    pub fn new(max_calls: u32, period: Duration) -> Self {
        let capacity = f64::from(max_calls.max(1));
        let refill_per_sec = capacity / period.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_per_sec,
            state: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Takes a token if one is available, otherwise returns how long until the next one.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Waits for a token, giving up with `RateLimited` if that would take longer than `budget`.
    pub async fn acquire(&self, budget: Duration) -> Result<(), SqlRagError> {
        let started = Instant::now();
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let spent = started.elapsed();
                    if spent + wait > budget {
                        return Err(SqlRagError::RateLimited(wait));
                    }
                    debug!(
                        wait_ms = wait.as_millis() as u64,
                        "Rate limit reached; waiting for a token"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitedProvider {
    inner: Box<dyn AiProvider>,
    bucket: TokenBucket,
}

impl RateLimitedProvider {
    pub fn new(inner: Box<dyn AiProvider>, max_calls: u32, period: Duration) -> Self {
        Self {
            inner,
            bucket: TokenBucket::new(max_calls, period),
        }
    }
}

#[async_trait]
impl AiProvider for RateLimitedProvider {
    async fn complete(
        &self,
        prompt: &Prompt,
        params: &DecodingParams,
        deadline: Duration,
    ) -> Result<Completion, SqlRagError> {
        let started = Instant::now();
        self.bucket.acquire(deadline).await?;
        let remaining = deadline.saturating_sub(started.elapsed());
        self.inner.complete(prompt, params, remaining).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_over_time() {
        let bucket = TokenBucket::new(2, Duration::from_secs(2));
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_when_wait_exceeds_budget() {
        let bucket = TokenBucket::new(1, Duration::from_secs(60));
        bucket.acquire(Duration::from_secs(1)).await.unwrap();
        let err = bucket.acquire(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SqlRagError::RateLimited(_)));
    }
}
