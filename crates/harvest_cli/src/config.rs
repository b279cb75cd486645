//! RON run configuration. Durations are plain milliseconds so the file stays
//! readable; every field is optional and falls back to the engine default.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use harvest_engine::{HarvestSettings, RateBudget};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub concurrency_limit: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_fraction: f64,
    pub max_retry_after_ms: u64,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub redirect_limit: usize,
    pub user_agent_pool: Vec<String>,
    pub accept_language: String,
    pub render_wait_timeout_ms: u64,
    pub max_render_sessions: usize,
    pub escalation_threshold: u32,
    pub escalation_window_ms: u64,
    pub escalate_within_target: bool,
    pub render_first_hosts: Vec<String>,
    pub robots_agent: String,
    pub directive_ttl_ms: u64,
    pub directive_failure_ttl_ms: u64,
    pub default_crawl_delay_ms: u64,
    pub spacing_jitter_ms: u64,
    pub rate_budget_capacity: u32,
    pub rate_budget_window_ms: u64,
    pub min_content_chars: usize,
    pub max_bytes: u64,
    pub block_markers: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&HarvestSettings::default())
    }
}

impl From<&HarvestSettings> for RunConfig {
    fn from(settings: &HarvestSettings) -> Self {
        Self {
            concurrency_limit: settings.concurrency_limit,
            max_retries: settings.max_retries,
            base_backoff_ms: millis(settings.base_backoff),
            max_backoff_ms: millis(settings.max_backoff),
            jitter_fraction: settings.jitter_fraction,
            max_retry_after_ms: millis(settings.max_retry_after),
            request_timeout_ms: millis(settings.request_timeout),
            connect_timeout_ms: millis(settings.connect_timeout),
            redirect_limit: settings.redirect_limit,
            user_agent_pool: settings.user_agent_pool.clone(),
            accept_language: settings.accept_language.clone(),
            render_wait_timeout_ms: millis(settings.render_wait_timeout),
            max_render_sessions: settings.max_render_sessions,
            escalation_threshold: settings.escalation_threshold,
            escalation_window_ms: millis(settings.escalation_window),
            escalate_within_target: settings.escalate_within_target,
            render_first_hosts: settings.render_first_hosts.clone(),
            robots_agent: settings.robots_agent.clone(),
            directive_ttl_ms: millis(settings.directive_ttl),
            directive_failure_ttl_ms: millis(settings.directive_failure_ttl),
            default_crawl_delay_ms: millis(settings.default_crawl_delay),
            spacing_jitter_ms: millis(settings.spacing_jitter),
            rate_budget_capacity: settings.rate_budget.capacity,
            rate_budget_window_ms: millis(settings.rate_budget.window),
            min_content_chars: settings.min_content_chars,
            max_bytes: settings.max_bytes,
            block_markers: settings.block_markers.clone(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        ron::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn into_settings(self) -> HarvestSettings {
        HarvestSettings {
            concurrency_limit: self.concurrency_limit,
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter_fraction: self.jitter_fraction,
            max_retry_after: Duration::from_millis(self.max_retry_after_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            redirect_limit: self.redirect_limit,
            user_agent_pool: self.user_agent_pool,
            accept_language: self.accept_language,
            render_wait_timeout: Duration::from_millis(self.render_wait_timeout_ms),
            max_render_sessions: self.max_render_sessions,
            escalation_threshold: self.escalation_threshold,
            escalation_window: Duration::from_millis(self.escalation_window_ms),
            escalate_within_target: self.escalate_within_target,
            render_first_hosts: self.render_first_hosts,
            robots_agent: self.robots_agent,
            directive_ttl: Duration::from_millis(self.directive_ttl_ms),
            directive_failure_ttl: Duration::from_millis(self.directive_failure_ttl_ms),
            default_crawl_delay: Duration::from_millis(self.default_crawl_delay_ms),
            spacing_jitter: Duration::from_millis(self.spacing_jitter_ms),
            rate_budget: RateBudget {
                capacity: self.rate_budget_capacity,
                window: Duration::from_millis(self.rate_budget_window_ms),
            },
            min_content_chars: self.min_content_chars,
            max_bytes: self.max_bytes,
            block_markers: self.block_markers,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
