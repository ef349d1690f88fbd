//! Token-bucket rate limiting for externally triggered operations
//! (hot-reload ingestion, status queries).
use std::sync::Mutex;
use std::time::Instant;

/// Default sustained rate for externally triggered operations.
pub const DEFAULT_OPS_PER_MINUTE: u32 = 600;

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket refilled continuously at the sustained rate, holding up to
/// twice that rate as burst headroom. Thread-safe.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<State>,
}

impl TokenBucket {
    /// Bucket allowing `per_minute` sustained operations with 2x burst.
    pub fn per_minute(per_minute: u32) -> Self {
        let capacity = (per_minute as f64) * 2.0;
        Self {
            capacity,
            refill_per_sec: per_minute as f64 / 60.0,
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1)
    }

    /// Take `n` tokens if all are available. Never blocks.
    pub fn try_acquire_n(&self, n: u32) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= n as f64 {
            state.tokens -= n as f64;
            true
        } else {
            false
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::per_minute(DEFAULT_OPS_PER_MINUTE)
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_capacity_is_twice_the_rate() {
        let bucket = TokenBucket::per_minute(30);
        let mut granted = 0;
        while bucket.try_acquire() {
            granted += 1;
            assert!(granted <= 61, "bucket never stopped granting");
        }
        assert_eq!(granted, 60);
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::per_minute(6000); // 100 tokens/sec
        while bucket.try_acquire() {}
        assert!(!bucket.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(100));
        // ~10 tokens refilled
        assert!(bucket.try_acquire());
    }

    #[test]
    fn bulk_acquire_is_all_or_nothing() {
        let bucket = TokenBucket::per_minute(5); // capacity 10
        assert!(bucket.try_acquire_n(10));
        assert!(!bucket.try_acquire_n(5));
    }
}
