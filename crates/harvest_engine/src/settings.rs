use std::time::Duration;

use harvest_core::{BackoffPolicy, EscalationPolicy, PolicyLimits, RetryPolicy};

use crate::EngineError;

/// Per-host request budget: `capacity` fetches refilled evenly over `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    pub capacity: u32,
    pub window: Duration,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            capacity: 100,
            window: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub concurrency_limit: usize,
    /// Attempts per target, the first one included.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_fraction: f64,
    /// Longest server `Retry-After` waited out; longer hints fail the target.
    pub max_retry_after: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub redirect_limit: usize,
    pub user_agent_pool: Vec<String>,
    pub accept_language: String,
    pub render_wait_timeout: Duration,
    pub max_render_sessions: usize,
    pub escalation_threshold: u32,
    pub escalation_window: Duration,
    pub escalate_within_target: bool,
    /// Hosts that start on the rendered strategy.
    pub render_first_hosts: Vec<String>,
    /// Product token matched against robots `User-agent` groups.
    pub robots_agent: String,
    pub directive_ttl: Duration,
    pub directive_failure_ttl: Duration,
    pub default_crawl_delay: Duration,
    /// Upper bound of the random extra spacing added after each fetch.
    pub spacing_jitter: Duration,
    pub rate_budget: RateBudget,
    /// Visible text below this many characters means the page needs rendering.
    pub min_content_chars: usize,
    pub max_bytes: u64,
    /// Case-insensitive body substrings that identify challenge or ban pages.
    pub block_markers: Vec<String>,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter_fraction: 0.2,
            max_retry_after: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            redirect_limit: 5,
            user_agent_pool: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0".to_string(),
            ],
            accept_language: "en-US,en;q=0.5".to_string(),
            render_wait_timeout: Duration::from_secs(10),
            max_render_sessions: 2,
            escalation_threshold: 3,
            escalation_window: Duration::from_secs(10 * 60),
            escalate_within_target: true,
            render_first_hosts: Vec::new(),
            robots_agent: "harvestbot".to_string(),
            directive_ttl: Duration::from_secs(24 * 60 * 60),
            directive_failure_ttl: Duration::from_secs(60),
            default_crawl_delay: Duration::from_secs(1),
            spacing_jitter: Duration::ZERO,
            rate_budget: RateBudget::default(),
            min_content_chars: 100,
            max_bytes: 5 * 1024 * 1024,
            block_markers: [
                "cf-chl-",
                "challenge-platform",
                "g-recaptcha",
                "h-captcha",
                "/checkpoint/challenge",
                "unusual traffic from your computer",
            ]
            .iter()
            .map(|marker| marker.to_string())
            .collect(),
        }
    }
}

impl HarvestSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| Err(EngineError::InvalidSettings(reason.to_string()));
        if self.concurrency_limit == 0 {
            return invalid("concurrency_limit must be at least 1");
        }
        if self.max_retries == 0 {
            return invalid("max_retries must be at least 1");
        }
        if self.user_agent_pool.iter().all(|ua| ua.trim().is_empty()) {
            return invalid("user_agent_pool must contain a user agent");
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return invalid("jitter_fraction must be within 0.0..=1.0");
        }
        if self.base_backoff > self.max_backoff {
            return invalid("base_backoff must not exceed max_backoff");
        }
        if self.request_timeout.is_zero() {
            return invalid("request_timeout must be positive");
        }
        if self.max_render_sessions == 0 {
            return invalid("max_render_sessions must be at least 1");
        }
        if self.robots_agent.trim().is_empty() {
            return invalid("robots_agent must not be empty");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff: BackoffPolicy {
                base: self.base_backoff,
                max: self.max_backoff,
                jitter_fraction: self.jitter_fraction,
            },
            escalate_within_target: self.escalate_within_target,
            max_retry_after: self.max_retry_after,
        }
    }

    pub fn policy_limits(&self) -> PolicyLimits {
        PolicyLimits {
            default_crawl_delay: self.default_crawl_delay,
            budget_capacity: self.rate_budget.capacity,
            budget_window: self.rate_budget.window,
            directive_ttl: self.directive_ttl,
        }
    }

    pub fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            threshold: self.escalation_threshold,
            window: self.escalation_window,
        }
    }

    /// Whole-attempt budget for a rendered fetch: load plus content-ready wait.
    pub fn rendered_timeout(&self) -> Duration {
        self.request_timeout.saturating_add(self.render_wait_timeout)
    }
}
