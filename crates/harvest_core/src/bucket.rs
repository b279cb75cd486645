use std::time::{Duration, Instant};

// Absorbs float drift so a bucket refilled for exactly one token's worth of time grants it.
const TOKEN_EPSILON: f64 = 1e-9;

/// Token bucket refilled continuously at `refill_per_sec`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens that refills completely over `window`.
    pub fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        let refill_per_sec = if window.is_zero() {
            f64::INFINITY
        } else {
            capacity / window.as_secs_f64()
        };
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: now,
        }
    }

    /// Rebuilds a bucket with a known token level (checkpoint restore).
    pub fn with_tokens(mut self, tokens: f64) -> Self {
        self.tokens = tokens.clamp(0.0, self.capacity);
        self
    }

    fn refill(&mut self, now: Instant) {
        if self.refill_per_sec.is_infinite() {
            self.tokens = self.capacity;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Takes one token, or returns how long until one is available.
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::try_from_secs_f64(missing / self.refill_per_sec).unwrap_or(Duration::MAX))
    }

    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}
