use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

// Smallest wait between refill checks, keeps float rounding from spinning.
const MIN_WAIT: Duration = Duration::from_millis(1);
const EPSILON: f64 = 1e-9;

struct Bucket {
    tokens: f64,
    refreshed_at: Instant,
}

/// Token bucket shared by every fetch attempt.
///
/// Holds up to `burst` tokens and refills continuously at one token per
/// `window`, so the sustained rate does not depend on the burst size.
/// Starts full. Accounting is serialized behind an internal mutex, so callers
/// only need an `Arc<RateLimiter>`.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(burst: u32, window: Duration) -> Self {
        let capacity = f64::from(burst.max(1));
        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_per_sec: 1.0 / window_secs,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                refreshed_at: Instant::now(),
            }),
        }
    }

    /// Waits for a token and consumes it.
    ///
    /// Dropping the returned future before it completes never consumes a token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refreshed_at).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.refreshed_at = now;

                if bucket.tokens + EPSILON >= 1.0 {
                    bucket.tokens = (bucket.tokens - 1.0).max(0.0);
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec).max(MIN_WAIT)
            };
            debug!(?wait, "Rate limit reached, waiting for a token");
            tokio::time::sleep(wait).await;
        }
    }
}
