use std::fmt;
use std::time::{Duration, Instant};

use crate::{DirectiveSet, FailureKind, FetchError, TokenBucket, MAX_CRAWL_DELAY};

// Stand-in for "never" when an instant would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Host-independent politeness limits.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyLimits {
    /// Lower bound on spacing between fetches to one host.
    pub default_crawl_delay: Duration,
    pub budget_capacity: u32,
    pub budget_window: Duration,
    pub directive_ttl: Duration,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            default_crawl_delay: Duration::from_secs(1),
            budget_capacity: 100,
            budget_window: Duration::from_secs(60 * 60),
            directive_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Disallowed,
    /// Crawl-delay spacing since the previous fetch has not elapsed yet.
    TooSoon { wait: Duration },
    /// The host's request budget is spent.
    RateLimited { retry_after: Duration },
    PolicyUnavailable,
}

impl DenyReason {
    pub fn into_failure(self, detail: impl Into<String>) -> FetchError {
        let kind = match self {
            DenyReason::Disallowed => FailureKind::Disallowed,
            DenyReason::TooSoon { wait: retry_after } | DenyReason::RateLimited { retry_after } => {
                FailureKind::RateLimited {
                    retry_after: Some(retry_after),
                }
            }
            DenyReason::PolicyUnavailable => FailureKind::PolicyUnavailable,
        };
        FetchError::new(kind, detail)
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Disallowed => write!(f, "disallowed"),
            DenyReason::TooSoon { wait } => write!(f, "too soon, wait {} ms", wait.as_millis()),
            DenyReason::RateLimited { retry_after } => {
                write!(f, "rate limited for {} ms", retry_after.as_millis())
            }
            DenyReason::PolicyUnavailable => write!(f, "policy unavailable"),
        }
    }
}

/// Politeness state for one host: directives, spacing and rate budget.
#[derive(Debug, Clone)]
pub struct HostPolicy {
    directives: DirectiveSet,
    directives_expire_at: Instant,
    crawl_delay: Duration,
    last_fetch: Option<Instant>,
    // Random extra spacing drawn when the last fetch was reserved.
    pending_spacing: Duration,
    bucket: TokenBucket,
    fetch_count: u64,
}

impl HostPolicy {
    pub fn new(directives: DirectiveSet, limits: &PolicyLimits, now: Instant) -> Self {
        let crawl_delay = effective_crawl_delay(&directives, limits);
        Self {
            directives,
            directives_expire_at: instant_after(now, limits.directive_ttl),
            crawl_delay,
            last_fetch: None,
            pending_spacing: Duration::ZERO,
            bucket: TokenBucket::new(limits.budget_capacity, limits.budget_window, now),
            fetch_count: 0,
        }
    }

    /// Rebuilds a policy from checkpointed parts.
    pub fn from_parts(
        directives: DirectiveSet,
        limits: &PolicyLimits,
        directives_expire_at: Instant,
        last_fetch: Option<Instant>,
        tokens: f64,
        now: Instant,
    ) -> Self {
        let mut policy = Self::new(directives, limits, now);
        policy.directives_expire_at = directives_expire_at;
        policy.last_fetch = last_fetch;
        policy.bucket = policy.bucket.with_tokens(tokens);
        policy
    }

    /// Swaps in freshly fetched directives; spacing and budget carry over.
    pub fn refresh_directives(&mut self, directives: DirectiveSet, limits: &PolicyLimits, now: Instant) {
        self.crawl_delay = effective_crawl_delay(&directives, limits);
        self.directives = directives;
        self.directives_expire_at = instant_after(now, limits.directive_ttl);
    }

    pub fn directives_expired(&self, now: Instant) -> bool {
        now >= self.directives_expire_at
    }

    /// Checks `path` against the directives, spacing and budget, and on success
    /// reserves the next fetch slot at `now`.
    ///
    /// `extra_spacing` is added on top of the crawl-delay before the *next*
    /// reservation may succeed.
    pub fn check_and_reserve(
        &mut self,
        path: &str,
        now: Instant,
        extra_spacing: Duration,
    ) -> Result<(), DenyReason> {
        if !self.directives.is_allowed(path) {
            return Err(DenyReason::Disallowed);
        }
        if let Some(earliest) = self.next_allowed_at() {
            if now < earliest {
                return Err(DenyReason::TooSoon {
                    wait: earliest - now,
                });
            }
        }
        self.bucket
            .try_take(now)
            .map_err(|retry_after| DenyReason::RateLimited { retry_after })?;

        self.last_fetch = Some(now);
        self.pending_spacing = extra_spacing;
        Ok(())
    }

    /// Moves the last-fetch stamp to the actual send time of a reserved fetch.
    pub fn record_fetch(&mut self, at: Instant) {
        self.last_fetch = Some(match self.last_fetch {
            Some(previous) => previous.max(at),
            None => at,
        });
        self.fetch_count += 1;
    }

    pub fn next_allowed_at(&self) -> Option<Instant> {
        self.last_fetch
            .map(|last| instant_after(last, self.crawl_delay.saturating_add(self.pending_spacing)))
    }

    pub fn directives(&self) -> &DirectiveSet {
        &self.directives
    }

    pub fn directives_expire_at(&self) -> Instant {
        self.directives_expire_at
    }

    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    pub fn last_fetch(&self) -> Option<Instant> {
        self.last_fetch
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetch_count
    }

    pub fn tokens(&mut self, now: Instant) -> f64 {
        self.bucket.available(now)
    }
}

/// `at + by`, saturating to a far-future instant instead of overflowing.
pub fn instant_after(at: Instant, by: Duration) -> Instant {
    at.checked_add(by)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}

fn effective_crawl_delay(directives: &DirectiveSet, limits: &PolicyLimits) -> Duration {
    directives
        .crawl_delay
        .map_or(limits.default_crawl_delay, |delay| {
            delay.min(MAX_CRAWL_DELAY).max(limits.default_crawl_delay)
        })
}
